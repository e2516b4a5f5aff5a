use super::{displaced, ByteOrder, CodeBuffer, RelocationTarget, TargetError, TargetResult};

const JMP_REL32: u8 = 0xE9;

/// 64-bit x86. Call sites carry a rel32 measured from the end of the displacement field.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86_64Target;

fn rel32(location: usize, target: u64) -> TargetResult<i32> {
    let end = displaced(location, 4)
        .map_err(|_| TargetError::DisplacementOutOfRange { location, target })?;
    let rel = (target as i64).wrapping_sub(end as i64);
    i32::try_from(rel).map_err(|_| TargetError::DisplacementOutOfRange { location, target })
}

impl RelocationTarget for X86_64Target {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn pointer_size(&self) -> usize {
        8
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Little
    }

    fn eip_base_for_call_offset(&self, location: usize) -> TargetResult<usize> {
        displaced(location, 4)
    }

    fn load_call_target(&self, code: &CodeBuffer<'_>, location: usize) -> TargetResult<u64> {
        let rel = i32::from_le_bytes(code.read_array(location)?);
        Ok((displaced(location, 4)? as i64).wrapping_add(rel as i64) as u64)
    }

    fn store_call_target(
        &self,
        code: &mut CodeBuffer<'_>,
        target: u64,
        location: usize,
    ) -> TargetResult<()> {
        let rel = rel32(location, target)?;
        code.write(location, &rel.to_le_bytes())
    }

    fn store_relative_target(
        &self,
        code: &mut CodeBuffer<'_>,
        displacement: i64,
        location: usize,
    ) -> TargetResult<()> {
        let rel = i32::try_from(displacement).map_err(|_| TargetError::DisplacementOutOfRange {
            location,
            target: (location as i64).wrapping_add(displacement) as u64,
        })?;
        code.write(location, &rel.to_le_bytes())
    }

    fn use_trampoline(&self, target: u64, base_location: usize) -> bool {
        let rel = (target as i64).wrapping_sub(base_location as i64);
        i32::try_from(rel).is_err()
    }

    fn patch_virtual_guard(
        &self,
        code: &mut CodeBuffer<'_>,
        location: usize,
        destination: usize,
    ) -> TargetResult<()> {
        let rel = rel32(displaced(location, 1)?, destination as u64)?;
        let mut insn = [0u8; 5];
        insn[0] = JMP_REL32;
        insn[1..].copy_from_slice(&rel.to_le_bytes());
        code.write(location, &insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_target_round_trips_through_rel32() {
        let mut bytes = [0u8; 32];
        let mut code = CodeBuffer::new(&mut bytes, 0x4000);
        X86_64Target
            .store_call_target(&mut code, 0x3000, 0x4008)
            .expect("in range");
        assert_eq!(
            code.read(0x4008, 4).expect("read"),
            &(0x3000_i32 - 0x400c).to_le_bytes()
        );
        assert_eq!(
            X86_64Target.load_call_target(&code, 0x4008).expect("load"),
            0x3000
        );
    }

    #[test]
    fn far_targets_need_a_trampoline() {
        assert!(!X86_64Target.use_trampoline(0x1000, 0x2000));
        assert!(X86_64Target.use_trampoline(0x7fff_0000_0000, 0x2000));
        let mut bytes = [0u8; 8];
        let mut code = CodeBuffer::new(&mut bytes, 0);
        assert!(matches!(
            X86_64Target.store_call_target(&mut code, 0x7fff_0000_0000, 0),
            Err(TargetError::DisplacementOutOfRange { .. })
        ));
    }

    #[test]
    fn guard_becomes_jmp() {
        let mut bytes = [0x90u8; 16];
        let mut code = CodeBuffer::new(&mut bytes, 0x100);
        X86_64Target
            .patch_virtual_guard(&mut code, 0x100, 0x10f)
            .expect("patch");
        assert_eq!(code.read(0x100, 5).expect("read"), &[0xE9, 10, 0, 0, 0]);
    }

    #[test]
    fn call_site_at_the_top_of_memory_is_out_of_range() {
        let location = usize::MAX - 2;
        assert!(matches!(
            X86_64Target.eip_base_for_call_offset(location),
            Err(TargetError::OutOfBounds { address, len: 4 }) if address == location
        ));
        let mut bytes = [0u8; 2];
        let mut code = CodeBuffer::new(&mut bytes, location);
        assert!(matches!(
            X86_64Target.store_call_target(&mut code, 0x1000, location),
            Err(TargetError::DisplacementOutOfRange { .. })
        ));
    }
}
