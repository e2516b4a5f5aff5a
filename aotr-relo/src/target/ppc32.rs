use super::{displaced, ByteOrder, CodeBuffer, RelocationTarget, TargetError, TargetResult};

const B_OPCODE: u32 = 0x4800_0000;
const LINK_BIT: u32 = 0x1;
const LI_MASK: u32 = 0x03FF_FFFC;
const BRANCH_RANGE: i64 = 1 << 25;

/// 32-bit big-endian POWER. Pointers are split over a `lis`/`ori` pair whose 16-bit immediates
/// sit two bytes into each instruction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ppc32Target;

fn read_insn(code: &CodeBuffer<'_>, at: usize) -> TargetResult<u32> {
    Ok(u32::from_be_bytes(code.read_array(at)?))
}

fn write_insn(code: &mut CodeBuffer<'_>, at: usize, insn: u32) -> TargetResult<()> {
    code.write(at, &insn.to_be_bytes())
}

fn write_half(code: &mut CodeBuffer<'_>, at: usize, half: u16) -> TargetResult<()> {
    code.write(at, &half.to_be_bytes())
}

fn read_half(code: &CodeBuffer<'_>, at: usize) -> TargetResult<u16> {
    Ok(u16::from_be_bytes(code.read_array(at)?))
}

fn encode_li(location: usize, displacement: i64) -> TargetResult<u32> {
    let target = (location as i64).wrapping_add(displacement) as u32 as u64;
    if displacement % 4 != 0 {
        return Err(TargetError::Misaligned { location, target });
    }
    if !(-BRANCH_RANGE..BRANCH_RANGE).contains(&displacement) {
        return Err(TargetError::DisplacementOutOfRange { location, target });
    }
    Ok((displacement as i32 as u32) & LI_MASK)
}

fn decode_li(insn: u32) -> i64 {
    let li = (insn & LI_MASK) as i32;
    ((li << 6) >> 6) as i64
}

impl RelocationTarget for Ppc32Target {
    fn name(&self) -> &'static str {
        "ppc32"
    }

    fn pointer_size(&self) -> usize {
        4
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Big
    }

    fn supports_ordered_pairs(&self) -> bool {
        true
    }

    fn ordered_pair_prefix(&self) -> usize {
        2
    }

    fn load_address_pair(
        &self,
        code: &CodeBuffer<'_>,
        high: usize,
        low: usize,
    ) -> TargetResult<u64> {
        let hi = read_half(code, high)? as u64;
        let lo = read_half(code, low)? as u64;
        Ok((hi << 16) | lo)
    }

    fn store_address_pair(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        high: usize,
        low: usize,
        _relo_flags: u8,
    ) -> TargetResult<()> {
        let value = value as u32;
        write_half(code, high, (value >> 16) as u16)?;
        write_half(code, low, (value & 0xFFFF) as u16)
    }

    fn store_address_sequence(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        location: usize,
        _sequence: u8,
    ) -> TargetResult<()> {
        self.store_address_pair(
            code,
            value,
            displaced(location, 2)?,
            displaced(location, 6)?,
            0,
        )
    }

    fn load_address_sequence(
        &self,
        code: &CodeBuffer<'_>,
        location: usize,
        _sequence: u8,
    ) -> TargetResult<u64> {
        self.load_address_pair(code, displaced(location, 2)?, displaced(location, 6)?)
    }

    fn load_call_target(&self, code: &CodeBuffer<'_>, location: usize) -> TargetResult<u64> {
        let insn = read_insn(code, location)?;
        Ok((location as i64).wrapping_add(decode_li(insn)) as u32 as u64)
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
        let li = encode_li(location, displacement)?;
        write_insn(code, location, B_OPCODE | li | LINK_BIT)
    }

    fn use_trampoline(&self, target: u64, base_location: usize) -> bool {
        let displacement = (target as i64).wrapping_sub(base_location as i64);
        !(-BRANCH_RANGE..BRANCH_RANGE).contains(&displacement)
    }

    fn patch_virtual_guard(
        &self,
        code: &mut CodeBuffer<'_>,
        location: usize,
        destination: usize,
    ) -> TargetResult<()> {
        let displacement = (destination as i64).wrapping_sub(location as i64);
        let li = encode_li(location, displacement)?;
        write_insn(code, location, B_OPCODE | li)
    }

    fn flush_cache(&self, code: &CodeBuffer<'_>) {
        crate::native::flush_instruction_cache(code.bytes());
    }
}
