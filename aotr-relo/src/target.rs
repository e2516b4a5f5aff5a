use relo_abi::is_ordered_pair_kind;

mod aarch64;
mod ppc32;
mod x86_64;

pub use aarch64::Aarch64Target;
pub use ppc32::Ppc32Target;
pub use x86_64::X86_64Target;

pub type TargetResult<T> = Result<T, TargetError>;

/// `location + by`, or an out-of-bounds access of `by` bytes when the sum wraps.
pub(crate) fn displaced(location: usize, by: usize) -> TargetResult<usize> {
    location
        .checked_add(by)
        .ok_or(TargetError::OutOfBounds { address: location, len: by })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    OutOfBounds { address: usize, len: usize },
    DisplacementOutOfRange { location: usize, target: u64 },
    Misaligned { location: usize, target: u64 },
    Unsupported(&'static str),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::OutOfBounds { address, len } => {
                write!(f, "access of {len} bytes at {address:#x} is outside the body")
            }
            TargetError::DisplacementOutOfRange { location, target } => write!(
                f,
                "target {target:#x} is out of branch range from {location:#x}"
            ),
            TargetError::Misaligned { location, target } => write!(
                f,
                "target {target:#x} is not instruction aligned relative to {location:#x}"
            ),
            TargetError::Unsupported(op) => {
                write!(f, "{op} is not supported on this target")
            }
        }
    }
}

impl std::error::Error for TargetError {}

/// Freshly copied-in code of one body; locations are absolute addresses.
pub struct CodeBuffer<'a> {
    bytes: &'a mut [u8],
    base: usize,
}

impl<'a> CodeBuffer<'a> {
    pub fn new(bytes: &'a mut [u8], base: usize) -> Self {
        Self { bytes, base }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    fn range(&self, address: usize, len: usize) -> TargetResult<std::ops::Range<usize>> {
        let start = address
            .checked_sub(self.base)
            .ok_or(TargetError::OutOfBounds { address, len })?;
        let end = start
            .checked_add(len)
            .ok_or(TargetError::OutOfBounds { address, len })?;
        if end > self.bytes.len() {
            return Err(TargetError::OutOfBounds { address, len });
        }
        Ok(start..end)
    }

    pub fn read(&self, address: usize, len: usize) -> TargetResult<&[u8]> {
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    pub fn read_array<const N: usize>(&self, address: usize) -> TargetResult<[u8; N]> {
        let bytes = self.read(address, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn write(&mut self, address: usize, data: &[u8]) -> TargetResult<()> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }
}

pub(crate) fn decode_u16(order: ByteOrder, bytes: [u8; 2]) -> u16 {
    match order {
        ByteOrder::Little => u16::from_le_bytes(bytes),
        ByteOrder::Big => u16::from_be_bytes(bytes),
    }
}

pub(crate) fn decode_u32(order: ByteOrder, bytes: [u8; 4]) -> u32 {
    match order {
        ByteOrder::Little => u32::from_le_bytes(bytes),
        ByteOrder::Big => u32::from_be_bytes(bytes),
    }
}

pub(crate) fn decode_u64(order: ByteOrder, bytes: [u8; 8]) -> u64 {
    match order {
        ByteOrder::Little => u64::from_le_bytes(bytes),
        ByteOrder::Big => u64::from_be_bytes(bytes),
    }
}

pub(crate) fn encode_u16(order: ByteOrder, value: u16) -> [u8; 2] {
    match order {
        ByteOrder::Little => value.to_le_bytes(),
        ByteOrder::Big => value.to_be_bytes(),
    }
}

pub(crate) fn encode_u32(order: ByteOrder, value: u32) -> [u8; 4] {
    match order {
        ByteOrder::Little => value.to_le_bytes(),
        ByteOrder::Big => value.to_be_bytes(),
    }
}

pub(crate) fn encode_u64(order: ByteOrder, value: u64) -> [u8; 8] {
    match order {
        ByteOrder::Little => value.to_le_bytes(),
        ByteOrder::Big => value.to_be_bytes(),
    }
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> TargetResult<[u8; N]> {
    let end = offset
        .checked_add(N)
        .ok_or(TargetError::OutOfBounds { address: offset, len: N })?;
    let slice = bytes.get(offset..end).ok_or(TargetError::OutOfBounds {
        address: offset,
        len: N,
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn field_mut(bytes: &mut [u8], offset: usize, len: usize) -> TargetResult<&mut [u8]> {
    let end = offset
        .checked_add(len)
        .ok_or(TargetError::OutOfBounds { address: offset, len })?;
    bytes
        .get_mut(offset..end)
        .ok_or(TargetError::OutOfBounds { address: offset, len })
}

/// Architecture and pointer-width dependent reads and writes of record fields and code bytes.
///
/// Record fields are addressed by byte offset into the record slice. Code locations are
/// absolute addresses inside a [`CodeBuffer`].
pub trait RelocationTarget {
    fn name(&self) -> &'static str;
    fn pointer_size(&self) -> usize;
    fn byte_order(&self) -> ByteOrder;

    fn load_u8(&self, bytes: &[u8], offset: usize) -> TargetResult<u8> {
        Ok(field::<1>(bytes, offset)?[0])
    }

    fn load_u16(&self, bytes: &[u8], offset: usize) -> TargetResult<u16> {
        Ok(decode_u16(self.byte_order(), field(bytes, offset)?))
    }

    fn load_u32(&self, bytes: &[u8], offset: usize) -> TargetResult<u32> {
        Ok(decode_u32(self.byte_order(), field(bytes, offset)?))
    }

    fn load_i32(&self, bytes: &[u8], offset: usize) -> TargetResult<i32> {
        Ok(self.load_u32(bytes, offset)? as i32)
    }

    fn store_u8(&self, bytes: &mut [u8], offset: usize, value: u8) -> TargetResult<()> {
        field_mut(bytes, offset, 1)?[0] = value;
        Ok(())
    }

    fn store_u16(&self, bytes: &mut [u8], offset: usize, value: u16) -> TargetResult<()> {
        field_mut(bytes, offset, 2)?.copy_from_slice(&encode_u16(self.byte_order(), value));
        Ok(())
    }

    fn store_u32(&self, bytes: &mut [u8], offset: usize, value: u32) -> TargetResult<()> {
        field_mut(bytes, offset, 4)?.copy_from_slice(&encode_u32(self.byte_order(), value));
        Ok(())
    }

    /// Pointer-width payload field.
    fn load_relocation_record_value(&self, bytes: &[u8], offset: usize) -> TargetResult<u64> {
        match self.pointer_size() {
            8 => Ok(decode_u64(self.byte_order(), field(bytes, offset)?)),
            _ => Ok(self.load_u32(bytes, offset)? as u64),
        }
    }

    fn store_relocation_record_value(
        &self,
        bytes: &mut [u8],
        offset: usize,
        value: u64,
    ) -> TargetResult<()> {
        match self.pointer_size() {
            8 => {
                field_mut(bytes, offset, 8)?
                    .copy_from_slice(&encode_u64(self.byte_order(), value));
                Ok(())
            }
            _ => self.store_u32(bytes, offset, value as u32),
        }
    }

    fn load_pointer(&self, code: &CodeBuffer<'_>, location: usize) -> TargetResult<u64> {
        match self.pointer_size() {
            8 => Ok(decode_u64(self.byte_order(), code.read_array(location)?)),
            _ => Ok(decode_u32(self.byte_order(), code.read_array(location)?) as u64),
        }
    }

    fn store_pointer(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        location: usize,
    ) -> TargetResult<()> {
        match self.pointer_size() {
            8 => code.write(location, &encode_u64(self.byte_order(), value)),
            _ => code.write(location, &encode_u32(self.byte_order(), value as u32)),
        }
    }

    fn load_address(&self, code: &CodeBuffer<'_>, location: usize) -> TargetResult<u64> {
        self.load_pointer(code, location)
    }

    fn store_address(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        location: usize,
    ) -> TargetResult<()> {
        self.store_pointer(code, value, location)
    }

    fn load_address_pair(
        &self,
        _code: &CodeBuffer<'_>,
        _high: usize,
        _low: usize,
    ) -> TargetResult<u64> {
        Err(TargetError::Unsupported("load_address_pair"))
    }

    fn store_address_pair(
        &self,
        _code: &mut CodeBuffer<'_>,
        _value: u64,
        _high: usize,
        _low: usize,
        _relo_flags: u8,
    ) -> TargetResult<()> {
        Err(TargetError::Unsupported("store_address_pair"))
    }

    /// Materializes `value` with the multi-instruction sequence selected by `sequence`.
    fn store_address_sequence(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        location: usize,
        _sequence: u8,
    ) -> TargetResult<()> {
        self.store_address(code, value, location)
    }

    fn load_address_sequence(
        &self,
        code: &CodeBuffer<'_>,
        location: usize,
        _sequence: u8,
    ) -> TargetResult<u64> {
        self.load_address(code, location)
    }

    fn store_relative_address_sequence(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        location: usize,
        sequence: u8,
    ) -> TargetResult<()> {
        self.store_address_sequence(code, value, location, sequence)
    }

    fn store_address_ram(
        &self,
        code: &mut CodeBuffer<'_>,
        value: u64,
        location: usize,
    ) -> TargetResult<()> {
        self.store_address(code, value, location)
    }

    /// Base address call displacements at `location` are measured from.
    fn eip_base_for_call_offset(&self, location: usize) -> TargetResult<usize> {
        Ok(location)
    }

    fn load_call_target(&self, _code: &CodeBuffer<'_>, _location: usize) -> TargetResult<u64> {
        Err(TargetError::Unsupported("load_call_target"))
    }

    fn store_call_target(
        &self,
        _code: &mut CodeBuffer<'_>,
        _target: u64,
        _location: usize,
    ) -> TargetResult<()> {
        Err(TargetError::Unsupported("store_call_target"))
    }

    /// Stores an already computed displacement into the call at `location`.
    fn store_relative_target(
        &self,
        _code: &mut CodeBuffer<'_>,
        _displacement: i64,
        _location: usize,
    ) -> TargetResult<()> {
        Err(TargetError::Unsupported("store_relative_target"))
    }

    fn use_trampoline(&self, _target: u64, _base_location: usize) -> bool {
        false
    }

    /// Rewrites the guard at `location` into an unconditional branch to `destination`.
    fn patch_virtual_guard(
        &self,
        _code: &mut CodeBuffer<'_>,
        _location: usize,
        _destination: usize,
    ) -> TargetResult<()> {
        Err(TargetError::Unsupported("patch_virtual_guard"))
    }

    fn load_cp_index(&self, code: &CodeBuffer<'_>, location: usize) -> TargetResult<u64> {
        self.load_pointer(code, displaced(location, self.pointer_size())?)
    }

    fn load_thunk_cp_index(&self, code: &CodeBuffer<'_>, location: usize) -> TargetResult<u64> {
        self.load_pointer(code, displaced(location, self.pointer_size())?)
    }

    /// Points a copied thunk at its VM dispatch helper; the helper slot is the last word.
    fn perform_thunk_relocation(&self, thunk: &mut [u8], helper: u64) -> TargetResult<()> {
        let size = self.pointer_size();
        let offset = thunk
            .len()
            .checked_sub(size)
            .ok_or(TargetError::OutOfBounds {
                address: 0,
                len: size,
            })?;
        self.store_relocation_record_value(thunk, offset, helper)
    }

    fn flush_cache(&self, _code: &CodeBuffer<'_>) {}

    fn supports_ordered_pairs(&self) -> bool {
        false
    }

    /// Bytes skipped at each half of an ordered pair to reach the immediate field.
    fn ordered_pair_prefix(&self) -> usize {
        0
    }

    fn is_ordered_pair_relocation(&self, tag: u8) -> bool {
        self.supports_ordered_pairs() && is_ordered_pair_kind(tag)
    }
}

pub fn target_by_name(name: &str) -> Option<Box<dyn RelocationTarget>> {
    match name {
        "x86_64" | "amd64" => Some(Box::new(X86_64Target)),
        "aarch64" | "arm64" => Some(Box::new(Aarch64Target)),
        "ppc32" | "powerpc" => Some(Box::new(Ppc32Target)),
        _ => None,
    }
}

/// Target matching the machine this crate was built for, when one exists.
pub fn host_target() -> Option<Box<dyn RelocationTarget>> {
    if cfg!(target_arch = "x86_64") {
        Some(Box::new(X86_64Target))
    } else if cfg!(target_arch = "aarch64") {
        Some(Box::new(Aarch64Target))
    } else if cfg!(target_arch = "powerpc") {
        Some(Box::new(Ppc32Target))
    } else {
        None
    }
}
