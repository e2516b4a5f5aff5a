use super::{displaced, ByteOrder, CodeBuffer, RelocationTarget, TargetError, TargetResult};

const B_OPCODE: u32 = 0x1400_0000;
const BRANCH_OPCODE_MASK: u32 = 0xFC00_0000;
const IMM26_MASK: u32 = 0x03FF_FFFF;
const IMM16_MASK: u32 = 0xFFFF << 5;
const BRANCH_RANGE_WORDS: i64 = 1 << 25;

/// 64-bit ARM. Calls are `bl imm26` relative to the instruction itself; addresses that do not
/// live in a literal slot are built with a `movz`/`movk` quad.
#[derive(Clone, Copy, Debug, Default)]
pub struct Aarch64Target;

fn read_insn(code: &CodeBuffer<'_>, at: usize) -> TargetResult<u32> {
    Ok(u32::from_le_bytes(code.read_array(at)?))
}

fn write_insn(code: &mut CodeBuffer<'_>, at: usize, insn: u32) -> TargetResult<()> {
    code.write(at, &insn.to_le_bytes())
}

fn encode_rel26(location: usize, displacement: i64) -> TargetResult<u32> {
    let target = (location as i64).wrapping_add(displacement) as u64;
    if displacement % 4 != 0 {
        return Err(TargetError::Misaligned { location, target });
    }
    let imm26 = displacement / 4;
    if !(-BRANCH_RANGE_WORDS..BRANCH_RANGE_WORDS).contains(&imm26) {
        return Err(TargetError::DisplacementOutOfRange { location, target });
    }
    Ok((imm26 as i32 as u32) & IMM26_MASK)
}

fn decode_rel26(insn: u32) -> i64 {
    let imm26 = (insn & IMM26_MASK) as i32;
    (((imm26 << 6) >> 6) as i64) * 4
}

impl RelocationTarget for Aarch64Target {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn pointer_size(&self) -> usize {
        8
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Little
    }

    fn store_address_sequence(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        location: usize,
        _sequence: u8,
    ) -> TargetResult<()> {
        for chunk in 0..4 {
            let at = displaced(location, chunk * 4)?;
            let imm16 = ((value >> (chunk * 16)) & 0xFFFF) as u32;
            let insn = read_insn(code, at)?;
            write_insn(code, at, (insn & !IMM16_MASK) | (imm16 << 5))?;
        }
        Ok(())
    }

    fn load_address_sequence(
        &self,
        code: &CodeBuffer<'_>,
        location: usize,
        _sequence: u8,
    ) -> TargetResult<u64> {
        let mut value = 0u64;
        for chunk in 0..4 {
            let insn = read_insn(code, displaced(location, chunk * 4)?)?;
            value |= (((insn & IMM16_MASK) >> 5) as u64) << (chunk * 16);
        }
        Ok(value)
    }

    fn load_call_target(&self, code: &CodeBuffer<'_>, location: usize) -> TargetResult<u64> {
        let insn = read_insn(code, location)?;
        Ok((location as i64).wrapping_add(decode_rel26(insn)) as u64)
    }

    fn store_call_target(
        &self,
        code: &mut CodeBuffer<'_>,
        target: u64,
        location: usize,
    ) -> TargetResult<()> {
        let displacement = (target as i64).wrapping_sub(location as i64);
        self.store_relative_target(code, displacement, location)
    }

    fn store_relative_target(
        &self,
        code: &mut CodeBuffer<'_>,
        displacement: i64,
        location: usize,
    ) -> TargetResult<()> {
        let imm26 = encode_rel26(location, displacement)?;
        let opcode = read_insn(code, location)? & BRANCH_OPCODE_MASK;
        write_insn(code, location, opcode | imm26)
    }

    fn use_trampoline(&self, target: u64, base_location: usize) -> bool {
        let displacement = (target as i64).wrapping_sub(base_location as i64);
        !(-BRANCH_RANGE_WORDS * 4..BRANCH_RANGE_WORDS * 4).contains(&displacement)
    }

    fn patch_virtual_guard(
        &self,
        code: &mut CodeBuffer<'_>,
        location: usize,
        destination: usize,
    ) -> TargetResult<()> {
        let displacement = (destination as i64).wrapping_sub(location as i64);
        let imm26 = encode_rel26(location, displacement)?;
        write_insn(code, location, B_OPCODE | imm26)
    }

    fn flush_cache(&self, code: &CodeBuffer<'_>) {
        crate::native::flush_instruction_cache(code.bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BL: u32 = 0x9400_0000;

    #[test]
    fn bl_keeps_its_opcode() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&BL.to_le_bytes());
        let mut code = CodeBuffer::new(&mut bytes, 0x1_0000);
        Aarch64Target
            .store_call_target(&mut code, 0x0_f000, 0x1_0000)
            .expect("in range");
        let insn = u32::from_le_bytes(code.read_array(0x1_0000).expect("read"));
        assert_eq!(insn & BRANCH_OPCODE_MASK, BL);
        assert_eq!(
            Aarch64Target.load_call_target(&code, 0x1_0000).expect("load"),
            0x0_f000
        );
    }

    #[test]
    fn unaligned_branch_is_rejected() {
        let mut bytes = [0u8; 4];
        let mut code = CodeBuffer::new(&mut bytes, 0);
        assert!(matches!(
            Aarch64Target.store_relative_target(&mut code, 6, 0),
            Err(TargetError::Misaligned { .. })
        ));
    }

    #[test]
    fn movz_movk_quad_round_trips() {
        // movz x0, #0; movk x0, #0, lsl 16; movk x0, #0, lsl 32; movk x0, #0, lsl 48
        let seq = [0xD280_0000_u32, 0xF2A0_0000, 0xF2C0_0000, 0xF2E0_0000];
        let mut bytes = [0u8; 16];
        for (i, insn) in seq.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&insn.to_le_bytes());
        }
        let mut code = CodeBuffer::new(&mut bytes, 0x2000);
        Aarch64Target
            .store_address_sequence(&mut code, 0x1234_5678_9abc_def0, 0x2000, 1)
            .expect("store");
        assert_eq!(
            Aarch64Target
                .load_address_sequence(&code, 0x2000, 1)
                .expect("load"),
            0x1234_5678_9abc_def0
        );
        let first = u32::from_le_bytes(code.read_array(0x2000).expect("read"));
        assert_eq!(first & !IMM16_MASK, seq[0]);
    }

    #[test]
    fn guard_branches_forward() {
        let mut bytes = [0u8; 4];
        let mut code = CodeBuffer::new(&mut bytes, 0x100);
        Aarch64Target
            .patch_virtual_guard(&mut code, 0x100, 0x140)
            .expect("patch");
        assert_eq!(
            u32::from_le_bytes(code.read_array(0x100).expect("read")),
            B_OPCODE | 0x10
        );
    }
}
