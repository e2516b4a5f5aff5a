mod common;

use common::*;
use relo::{GroupView, WireError, disassemble_group, encode_record};

#[test]
fn offsets_past_u16_switch_the_record_to_wide() {
    let target = X86_64Target;
    let narrow = encode_record(&target, &RecordSpec::new(abi::RAM_METHOD).offset(0xFFFF))
        .expect("narrow record should encode");
    let wide = encode_record(&target, &RecordSpec::new(abi::RAM_METHOD).offset(0x1_0000))
        .expect("wide record should encode");

    assert_eq!(narrow[abi::OFFSET_FLAGS] & abi::FLAG_WIDE_OFFSETS, 0);
    assert_ne!(wide[abi::OFFSET_FLAGS] & abi::FLAG_WIDE_OFFSETS, 0);
    assert_eq!(wide.len(), narrow.len() + 2);
}

#[test]
fn parsed_group_yields_records_in_order() {
    let target = X86_64Target;
    let mut builder = GroupBuilder::new(&target);
    builder
        .push(RecordSpec::new(abi::HELPER_ADDRESS).field("helper_id", 9).offset(4))
        .expect("helper should encode");
    builder
        .push(
            RecordSpec::new(abi::RAM_METHOD)
                .offset(0x10)
                .offset(0x2_0000),
        )
        .expect("ram method should encode");
    let bytes = builder.finish();

    let group = GroupView::parse(&bytes, &target, false).expect("group should parse");
    let records: Vec<_> = group
        .records()
        .collect::<Result<_, _>>()
        .expect("records should decode");

    assert_eq!(group.size(), bytes.len());
    assert_eq!(group.well_known_classes_offset(), None);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tag(), abi::HELPER_ADDRESS);
    assert_eq!(records[0].field("helper_id"), Ok(9));
    assert_eq!(
        records[0].offsets().expect("offsets").collect::<Vec<_>>(),
        vec![4]
    );
    assert!(records[1].wide_offsets());
    assert_eq!(
        records[1].offsets().expect("offsets").collect::<Vec<_>>(),
        vec![0x10, 0x2_0000]
    );
}

#[test]
fn symbol_validated_groups_carry_the_well_known_word() {
    let target = X86_64Target;
    let bytes = GroupBuilder::new(&target)
        .with_well_known_classes(0x1234)
        .finish();

    assert_eq!(bytes.len(), 16);
    let group = GroupView::parse(&bytes, &target, true).expect("group should parse");
    assert_eq!(group.well_known_classes_offset(), Some(0x1234));
    assert_eq!(group.records().count(), 0);
}

#[test]
fn big_endian_targets_write_big_endian_words() {
    let target = Ppc32Target;
    let mut builder = GroupBuilder::new(&target);
    builder
        .push(RecordSpec::new(abi::RAM_METHOD).offset(0x0102))
        .expect("record should encode");
    let bytes = builder.finish();

    let size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    assert_eq!(size as usize, bytes.len());
    let offset = &bytes[bytes.len() - 2..];
    assert_eq!(offset, &[0x01, 0x02]);
}

#[test]
fn truncated_group_is_rejected() {
    let target = X86_64Target;
    let mut builder = GroupBuilder::new(&target);
    builder
        .push(RecordSpec::new(abi::RAM_METHOD).offset(0))
        .expect("record should encode");
    let bytes = builder.finish();

    let result = GroupView::parse(&bytes[..bytes.len() - 1], &target, false);

    assert!(matches!(
        result.err(),
        Some(WireError::GroupSizeMismatch { .. })
    ));
}

#[test]
fn zero_sized_record_stops_the_walk() {
    let target = X86_64Target;
    let mut builder = GroupBuilder::new(&target);
    builder
        .push(RecordSpec::new(abi::RAM_METHOD).offset(0))
        .expect("record should encode");
    let mut bytes = builder.finish();
    bytes[8] = 0;
    bytes[9] = 0;

    let group = GroupView::parse(&bytes, &target, false).expect("group should parse");
    let records: Vec<_> = group.records().collect();

    assert_eq!(records.len(), 1);
    assert!(matches!(
        records[0],
        Err(WireError::ZeroSizeRecord { offset: 8 })
    ));
}

#[test]
fn unknown_field_names_are_rejected() {
    let result = encode_record(
        &X86_64Target,
        &RecordSpec::new(abi::HELPER_ADDRESS).field("cp_index", 1),
    );

    assert!(matches!(result, Err(WireError::UnknownField { .. })));
}

#[test]
fn reserved_tags_do_not_encode() {
    let result = encode_record(&X86_64Target, &RecordSpec::new(abi::INTERFACE_OBJECT));

    assert!(matches!(
        result,
        Err(WireError::UnknownTag { tag, .. }) if tag == abi::INTERFACE_OBJECT
    ));
}

#[test]
fn disassembly_names_every_record() {
    let target = X86_64Target;
    let mut builder = GroupBuilder::new(&target);
    builder
        .push(RecordSpec::new(abi::PIC_TRAMPOLINES).field("num_trampolines", 3))
        .expect("record should encode");
    builder
        .push(
            RecordSpec::new(abi::VALIDATE_CLASS)
                .field("inlined_site_index", u64::MAX)
                .field("cp_index", 7),
        )
        .expect("record should encode");
    let bytes = builder.finish();

    let listing = disassemble_group(&bytes, &target, false).expect("listing");

    assert!(listing.contains("PicTrampolines"), "{listing}");
    assert!(listing.contains("num_trampolines 0x3"), "{listing}");
    assert!(listing.contains("ValidateClass"), "{listing}");
    assert!(listing.contains("cp_index 0x7"), "{listing}");
}
