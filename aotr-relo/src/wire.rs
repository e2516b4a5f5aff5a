use std::fmt::Write;

use relo_abi::{
    FIELD_SIZE, FLAG_EIP_RELATIVE, FLAG_MASK, FLAG_WIDE_OFFSETS, FieldWidth, OFFSET_FLAGS,
    OFFSET_SIZE, OFFSET_TYPE, RelocationKind, kind_by_tag,
};

use crate::target::{
    ByteOrder, RelocationTarget, decode_u16, decode_u32, decode_u64, encode_u16, encode_u32,
    encode_u64,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    UnexpectedEof,
    GroupSizeMismatch { declared: u64, available: usize },
    ZeroSizeRecord { offset: usize },
    RecordOverrun { offset: usize, size: usize },
    UnknownTag { offset: usize, tag: u8 },
    TruncatedRecord { offset: usize, tag: u8, size: usize },
    UnalignedOffsets { tag: u8, trailing: usize },
    UnknownField { tag: u8, field: String },
    RecordTooLarge { tag: u8, size: usize },
    OffsetTooLarge(u64),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "unexpected end of relocation data"),
            WireError::GroupSizeMismatch {
                declared,
                available,
            } => write!(
                f,
                "relocation group declares {declared} bytes but {available} are available"
            ),
            WireError::ZeroSizeRecord { offset } => {
                write!(f, "zero-sized relocation record at offset {offset}")
            }
            WireError::RecordOverrun { offset, size } => write!(
                f,
                "relocation record at offset {offset} with size {size} runs past the group"
            ),
            WireError::UnknownTag { offset, tag } => {
                write!(f, "unknown relocation type {tag} at offset {offset}")
            }
            WireError::TruncatedRecord { offset, tag, size } => write!(
                f,
                "relocation record type {tag} at offset {offset} is too short ({size} bytes)"
            ),
            WireError::UnalignedOffsets { tag, trailing } => write!(
                f,
                "relocation record type {tag} has {trailing} stray bytes in its offset list"
            ),
            WireError::UnknownField { tag, field } => {
                write!(f, "relocation type {tag} has no field {field}")
            }
            WireError::RecordTooLarge { tag, size } => {
                write!(f, "relocation record type {tag} too large: {size} bytes")
            }
            WireError::OffsetTooLarge(offset) => {
                write!(f, "code offset {offset:#x} does not fit a wide offset")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// Byte-order aware reader over relocation data.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
    order: ByteOrder,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8], order: ByteOrder) -> Self {
        Self {
            bytes,
            offset: 0,
            order,
        }
    }

    pub(crate) fn at(bytes: &'a [u8], offset: usize, order: ByteOrder) -> Self {
        Self {
            bytes,
            offset,
            order,
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, WireError> {
        let value = self
            .bytes
            .get(self.offset)
            .ok_or(WireError::UnexpectedEof)?;
        self.offset += 1;
        Ok(*value)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_exact_array::<2>()?;
        Ok(decode_u16(self.order, bytes))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_exact_array::<4>()?;
        Ok(decode_u32(self.order, bytes))
    }

    pub(crate) fn read_word(&mut self, pointer_size: usize) -> Result<u64, WireError> {
        match pointer_size {
            8 => Ok(decode_u64(self.order, self.read_exact_array::<8>()?)),
            _ => Ok(self.read_u32()? as u64),
        }
    }

    fn read_exact_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let bytes = self.read_exact(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(WireError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.offset >= self.bytes.len()
    }
}

/// A decoded relocation group: the size word, the optional well-known classes offset, and the
/// packed records that follow.
#[derive(Clone, Copy)]
pub struct GroupView<'a> {
    bytes: &'a [u8],
    target: &'a dyn RelocationTarget,
    first_record: usize,
    well_known_classes: Option<u64>,
}

impl<'a> GroupView<'a> {
    pub fn parse(
        bytes: &'a [u8],
        target: &'a dyn RelocationTarget,
        use_svm: bool,
    ) -> Result<Self, WireError> {
        let pointer_size = target.pointer_size();
        let mut cursor = Cursor::new(bytes, target.byte_order());
        let declared = cursor.read_word(pointer_size)?;
        let well_known_classes = if use_svm {
            Some(cursor.read_word(pointer_size)?)
        } else {
            None
        };
        let size = usize::try_from(declared).map_err(|_| WireError::GroupSizeMismatch {
            declared,
            available: bytes.len(),
        })?;
        if size > bytes.len() || size < cursor.offset() {
            return Err(WireError::GroupSizeMismatch {
                declared,
                available: bytes.len(),
            });
        }
        Ok(Self {
            bytes: &bytes[..size],
            target,
            first_record: cursor.offset(),
            well_known_classes,
        })
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn well_known_classes_offset(&self) -> Option<u64> {
        self.well_known_classes
    }

    pub fn records(&self) -> Records<'a> {
        Records {
            bytes: self.bytes,
            target: self.target,
            offset: self.first_record,
            failed: false,
        }
    }
}

/// Walks records by their declared sizes. Stops after the first decoding error.
pub struct Records<'a> {
    bytes: &'a [u8],
    target: &'a dyn RelocationTarget,
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<RecordView<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        let result = RecordView::decode(self.bytes, self.offset, self.target);
        match &result {
            Ok(record) => self.offset += record.size(),
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

/// Typed view of one binary record. Field reads go through the target.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    bytes: &'a [u8],
    offset_in_group: usize,
    kind: &'static RelocationKind,
    target: &'a dyn RelocationTarget,
}

impl<'a> RecordView<'a> {
    pub fn decode(
        group: &'a [u8],
        offset: usize,
        target: &'a dyn RelocationTarget,
    ) -> Result<Self, WireError> {
        let mut cursor = Cursor::at(group, offset, target.byte_order());
        let size = cursor.read_u16()? as usize;
        let tag = cursor.read_u8()?;
        if size == 0 {
            return Err(WireError::ZeroSizeRecord { offset });
        }
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= group.len())
            .ok_or(WireError::RecordOverrun { offset, size })?;
        let kind = kind_by_tag(tag)
            .filter(|kind| kind.is_supported())
            .ok_or(WireError::UnknownTag { offset, tag })?;
        let header = kind
            .size_in_bytes(target.pointer_size())
            .ok_or(WireError::UnknownTag { offset, tag })?;
        if size < header {
            return Err(WireError::TruncatedRecord { offset, tag, size });
        }
        Ok(Self {
            bytes: &group[offset..end],
            offset_in_group: offset,
            kind,
            target,
        })
    }

    pub fn kind(&self) -> &'static RelocationKind {
        self.kind
    }

    pub fn tag(&self) -> u8 {
        self.kind.tag
    }

    pub fn name(&self) -> &'static str {
        self.kind.name
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn offset_in_group(&self) -> usize {
        self.offset_in_group
    }

    pub fn target(&self) -> &'a dyn RelocationTarget {
        self.target
    }

    pub fn flags(&self) -> u8 {
        self.bytes[OFFSET_FLAGS]
    }

    /// Relocation-specific flag bits, without the cross-platform ones.
    pub fn relo_flags(&self) -> u8 {
        self.flags() & !FLAG_MASK
    }

    pub fn wide_offsets(&self) -> bool {
        self.flags() & FLAG_WIDE_OFFSETS != 0
    }

    pub fn eip_relative(&self) -> bool {
        self.flags() & FLAG_EIP_RELATIVE != 0
    }

    fn header_and_payload(&self) -> usize {
        self.kind
            .size_in_bytes(self.target.pointer_size())
            .unwrap_or(self.bytes.len())
    }

    pub fn field_by_index(&self, index: usize) -> Result<u64, WireError> {
        let pointer_size = self.target.pointer_size();
        let field = self.kind.fields.get(index);
        let offset = self.kind.field_offset(index, pointer_size);
        let (Some(field), Some(offset)) = (field, offset) else {
            return Err(WireError::UnknownField {
                tag: self.tag(),
                field: index.to_string(),
            });
        };
        let value = match field.width {
            FieldWidth::U8 => self.target.load_u8(self.bytes, offset).map(u64::from),
            FieldWidth::U16 => self.target.load_u16(self.bytes, offset).map(u64::from),
            FieldWidth::U32 => self.target.load_u32(self.bytes, offset).map(u64::from),
            FieldWidth::I32 => self
                .target
                .load_i32(self.bytes, offset)
                .map(|value| value as i64 as u64),
            FieldWidth::Word => self.target.load_relocation_record_value(self.bytes, offset),
        };
        value.map_err(|_| WireError::UnexpectedEof)
    }

    pub fn field(&self, name: &str) -> Result<u64, WireError> {
        let index = self
            .kind
            .field_index(name)
            .ok_or_else(|| WireError::UnknownField {
                tag: self.tag(),
                field: name.to_string(),
            })?;
        self.field_by_index(index)
    }

    /// Trailing code offsets, relative to the relocation origin.
    pub fn offsets(&self) -> Result<Offsets<'a>, WireError> {
        let start = self.header_and_payload();
        let width = if self.wide_offsets() { 4 } else { OFFSET_SIZE };
        let trailing = self.bytes.len() - start;
        if trailing % width != 0 {
            return Err(WireError::UnalignedOffsets {
                tag: self.tag(),
                trailing: trailing % width,
            });
        }
        Ok(Offsets {
            cursor: Cursor::at(self.bytes, start, self.target.byte_order()),
            wide: self.wide_offsets(),
        })
    }

    /// Header, payload fields and offsets, one per line.
    pub fn describe(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "{} (type {}) size {} flags {:#04x} @ {:#x}",
            self.name(),
            self.tag(),
            self.size(),
            self.flags(),
            self.offset_in_group
        );
        for (index, field) in self.kind.fields.iter().enumerate() {
            match self.field_by_index(index) {
                Ok(value) => {
                    let _ = writeln!(out, "\t{} {:#x}", field.name, value);
                }
                Err(err) => {
                    let _ = writeln!(out, "\t{} <{}>", field.name, err);
                }
            }
        }
        match self.offsets() {
            Ok(offsets) => {
                let list = offsets
                    .map(|offset| format!("{offset:#x}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                let _ = writeln!(out, "\toffsets [{list}]");
            }
            Err(err) => {
                let _ = writeln!(out, "\toffsets <{err}>");
            }
        }
    }
}

pub struct Offsets<'a> {
    cursor: Cursor<'a>,
    wide: bool,
}

impl Iterator for Offsets<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor.is_eof() {
            return None;
        }
        if self.wide {
            self.cursor.read_u32().ok()
        } else {
            self.cursor.read_u16().ok().map(u32::from)
        }
    }
}

/// Record description used by [`GroupBuilder`].
#[derive(Clone, Debug, Default)]
pub struct RecordSpec {
    tag: u8,
    flags: u8,
    force_wide: bool,
    fields: Vec<(String, u64)>,
    offsets: Vec<u64>,
}

impl RecordSpec {
    pub fn new(tag: u8) -> Self {
        Self {
            tag,
            ..Self::default()
        }
    }

    pub fn field(mut self, name: &str, value: u64) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    pub fn eip_relative(mut self) -> Self {
        self.flags |= FLAG_EIP_RELATIVE;
        self
    }

    pub fn relo_flags(mut self, flags: u8) -> Self {
        self.flags |= flags & !FLAG_MASK;
        self
    }

    pub fn wide_offsets(mut self) -> Self {
        self.force_wide = true;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offsets.push(offset);
        self
    }

    pub fn pair(self, high: u64, low: u64) -> Self {
        self.offset(high).offset(low)
    }
}

/// Writes a relocation group the way the compiler lays it out for `target`.
pub struct GroupBuilder<'t> {
    target: &'t dyn RelocationTarget,
    well_known_classes: Option<u64>,
    records: Vec<u8>,
}

impl<'t> GroupBuilder<'t> {
    pub fn new(target: &'t dyn RelocationTarget) -> Self {
        Self {
            target,
            well_known_classes: None,
            records: Vec::new(),
        }
    }

    pub fn with_well_known_classes(mut self, offset: u64) -> Self {
        self.well_known_classes = Some(offset);
        self
    }

    /// Appends a record; returns its offset within the record area.
    pub fn push(&mut self, spec: RecordSpec) -> Result<usize, WireError> {
        let record = encode_record(self.target, &spec)?;
        let at = self.records.len();
        self.records.extend_from_slice(&record);
        Ok(at)
    }

    pub fn header_size(&self) -> usize {
        let words = if self.well_known_classes.is_some() { 2 } else { 1 };
        words * self.target.pointer_size()
    }

    pub fn finish(self) -> Vec<u8> {
        let total = self.header_size() + self.records.len();
        let mut out = Vec::with_capacity(total);
        write_word(self.target, &mut out, total as u64);
        if let Some(offset) = self.well_known_classes {
            write_word(self.target, &mut out, offset);
        }
        out.extend_from_slice(&self.records);
        out
    }
}

fn write_word(target: &dyn RelocationTarget, out: &mut Vec<u8>, value: u64) {
    match target.pointer_size() {
        8 => out.extend_from_slice(&encode_u64(target.byte_order(), value)),
        _ => out.extend_from_slice(&encode_u32(target.byte_order(), value as u32)),
    }
}

pub fn encode_record(target: &dyn RelocationTarget, spec: &RecordSpec) -> Result<Vec<u8>, WireError> {
    let pointer_size = target.pointer_size();
    let order = target.byte_order();
    let kind = kind_by_tag(spec.tag)
        .filter(|kind| kind.is_supported())
        .ok_or(WireError::UnknownTag {
            offset: 0,
            tag: spec.tag,
        })?;
    let header = kind
        .size_in_bytes(pointer_size)
        .ok_or(WireError::UnknownTag {
            offset: 0,
            tag: spec.tag,
        })?;
    let mut out = vec![0u8; header];

    for (name, value) in &spec.fields {
        let unknown = || WireError::UnknownField {
            tag: spec.tag,
            field: name.clone(),
        };
        let index = kind.field_index(name).ok_or_else(unknown)?;
        let offset = kind.field_offset(index, pointer_size).ok_or_else(unknown)?;
        let stored = match kind.fields[index].width {
            FieldWidth::U8 => target.store_u8(&mut out, offset, *value as u8),
            FieldWidth::U16 => target.store_u16(&mut out, offset, *value as u16),
            FieldWidth::U32 | FieldWidth::I32 => target.store_u32(&mut out, offset, *value as u32),
            FieldWidth::Word => target.store_relocation_record_value(&mut out, offset, *value),
        };
        stored.map_err(|_| WireError::UnexpectedEof)?;
    }

    let mut flags = spec.flags;
    let wide = spec.force_wide || spec.offsets.iter().any(|offset| *offset > u16::MAX as u64);
    if wide {
        flags |= FLAG_WIDE_OFFSETS;
    }
    for offset in &spec.offsets {
        if wide {
            let value = u32::try_from(*offset).map_err(|_| WireError::OffsetTooLarge(*offset))?;
            out.extend_from_slice(&encode_u32(order, value));
        } else {
            out.extend_from_slice(&encode_u16(order, *offset as u16));
        }
    }

    let size = u16::try_from(out.len()).map_err(|_| WireError::RecordTooLarge {
        tag: spec.tag,
        size: out.len(),
    })?;
    out[FIELD_SIZE..FIELD_SIZE + 2].copy_from_slice(&encode_u16(order, size));
    out[OFFSET_TYPE] = spec.tag;
    out[OFFSET_FLAGS] = flags;
    Ok(out)
}

/// Renders every record of a group, one block per record.
pub fn disassemble_group(
    bytes: &[u8],
    target: &dyn RelocationTarget,
    use_svm: bool,
) -> Result<String, WireError> {
    let group = GroupView::parse(bytes, target, use_svm)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "relocation group: {} bytes, target {}",
        group.size(),
        target.name()
    );
    if let Some(offset) = group.well_known_classes_offset() {
        let _ = writeln!(out, "well-known classes chain @ {offset:#x}");
    }
    for record in group.records() {
        record?.describe(&mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Ppc32Target, X86_64Target};
    use relo_abi::{CONSTANT_POOL, HELPER_ADDRESS, RAM_METHOD};

    #[test]
    fn cursor_reads_in_target_order() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let mut little = Cursor::new(&bytes, ByteOrder::Little);
        assert_eq!(little.read_u16().expect("u16"), 0x0201);
        let mut big = Cursor::new(&bytes, ByteOrder::Big);
        assert_eq!(big.read_u32().expect("u32"), 0x0102_0304);
        assert_eq!(big.read_u8(), Err(WireError::UnexpectedEof));
    }

    #[test]
    fn encoded_record_carries_header_and_offsets() {
        let spec = RecordSpec::new(HELPER_ADDRESS)
            .field("helper_id", 7)
            .eip_relative()
            .offset(0x10)
            .offset(0x20);
        let record = encode_record(&X86_64Target, &spec).expect("encode");
        assert_eq!(record.len(), 8 + 4);
        assert_eq!(u16::from_le_bytes([record[0], record[1]]), 12);
        assert_eq!(record[OFFSET_TYPE], HELPER_ADDRESS);
        assert_eq!(record[OFFSET_FLAGS], FLAG_EIP_RELATIVE);
        assert_eq!(&record[4..8], &7u32.to_le_bytes());
    }

    #[test]
    fn offsets_past_u16_switch_to_wide() {
        let spec = RecordSpec::new(RAM_METHOD).offset(0x1_0000);
        let record = encode_record(&Ppc32Target, &spec).expect("encode");
        assert_eq!(record[OFFSET_FLAGS] & FLAG_WIDE_OFFSETS, FLAG_WIDE_OFFSETS);
        assert_eq!(&record[4..], &0x1_0000u32.to_be_bytes());
    }

    #[test]
    fn unknown_field_names_are_rejected() {
        let spec = RecordSpec::new(CONSTANT_POOL).field("helper_id", 1);
        assert!(matches!(
            encode_record(&X86_64Target, &spec),
            Err(WireError::UnknownField { .. })
        ));
    }

    #[test]
    fn group_size_must_fit_the_blob() {
        let mut builder = GroupBuilder::new(&X86_64Target);
        builder
            .push(RecordSpec::new(RAM_METHOD).offset(4))
            .expect("push");
        let mut bytes = builder.finish();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            GroupView::parse(&bytes, &X86_64Target, false),
            Err(WireError::GroupSizeMismatch { .. })
        ));
    }
}
