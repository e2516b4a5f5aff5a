mod common;

use common::*;

fn outermost_x86() -> u64 {
    outermost(&X86_64Target)
}

#[test]
fn helper_call_is_rebound_from_the_new_location() {
    let mut fx = Fixture::x86();
    fx.vm.helpers.insert(7, 0x1000);
    let group = fx.group(vec![
        RecordSpec::new(abi::HELPER_ADDRESS)
            .field("helper_id", 7)
            .eip_relative()
            .offset(0xFFC),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x1000];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    run.result.expect("helper relocation should succeed");
    assert_eq!(read_i32_le(&bytes, 0xFFC), -0x1000);
}

#[test]
fn stressed_helper_calls_go_through_the_trampoline() {
    let mut fx = Fixture::x86();
    fx.options.stress_trampolines = true;
    fx.vm.helpers.insert(7, 0x1000);
    fx.vm.helper_trampolines.insert(7, 0x1800);
    let group = fx.group(vec![
        RecordSpec::new(abi::HELPER_ADDRESS)
            .field("helper_id", 7)
            .eip_relative()
            .offset(0xFFC),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x1000];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    run.result.expect("helper relocation should succeed");
    assert_eq!(read_i32_le(&bytes, 0xFFC), -0x800);
}

#[test]
fn absolute_helper_stores_the_helper_address() {
    let mut fx = Fixture::x86();
    fx.vm.helpers.insert(3, 0x7fff_0000_1234);
    let group = fx.group(vec![
        RecordSpec::new(abi::ABSOLUTE_HELPER_ADDRESS)
            .field("helper_id", 3)
            .offset(0x8),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x20];

    let run = fx.run(&mut table, &mut bytes, 0x4000, &group);

    run.result.expect("absolute helper should succeed");
    assert_eq!(read_u64_le(&bytes, 0x8), 0x7fff_0000_1234);
}

#[test]
fn validate_class_accepts_a_matching_chain() {
    let mut fx = Fixture::x86();
    fx.vm.cp_classes.insert((BODY_CP, 3), ClassRef(0x40));
    fx.vm
        .chains
        .insert(0x500, (RomClassRef(0x400), ClassRef(0x40)));
    let group = fx.group(vec![
        RecordSpec::new(abi::VALIDATE_CLASS)
            .field("inlined_site_index", outermost_x86())
            .field("constant_pool", BODY_CP)
            .field("cp_index", 3)
            .field("class_chain_offset", 0x500),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    run.result.expect("validation should succeed");
    assert_eq!(run.counts.validations, 1);
    assert_eq!(run.counts.failed_validations, 0);
    assert_eq!(fx.stats.snapshot().class_validations, 1);
}

#[test]
fn validate_class_rejects_a_changed_class() {
    let mut fx = Fixture::x86();
    fx.vm.cp_classes.insert((BODY_CP, 3), ClassRef(0x41));
    fx.vm
        .chains
        .insert(0x500, (RomClassRef(0x400), ClassRef(0x40)));
    let group = fx.group(vec![
        RecordSpec::new(abi::VALIDATE_CLASS)
            .field("inlined_site_index", outermost_x86())
            .field("constant_pool", BODY_CP)
            .field("cp_index", 3)
            .field("class_chain_offset", 0x500),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    assert_eq!(run.result, Err(ReloFailure::ClassRelo));
    assert_eq!(ReloFailure::ClassRelo.code(), 19);
    assert_eq!(run.counts.failed_validations, 1);
    let snapshot = fx.stats.snapshot();
    assert_eq!(snapshot.failure_count(ReloFailure::ClassRelo), 1);
    assert_eq!(snapshot.kind_failure_count(abi::VALIDATE_CLASS), 1);
    assert_eq!(snapshot.class_validations_failed, 1);
}

#[test]
fn first_failure_stops_the_group() {
    let fx = Fixture::x86();
    let group = fx.group(vec![
        RecordSpec::new(abi::RAM_METHOD).offset(0),
        RecordSpec::new(abi::VALIDATE_CLASS)
            .field("inlined_site_index", outermost_x86())
            .field("constant_pool", BODY_CP)
            .field("cp_index", 3)
            .field("class_chain_offset", 0x500),
        RecordSpec::new(abi::RAM_METHOD).offset(8),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    assert_eq!(run.result, Err(ReloFailure::ClassRelo));
    assert_eq!(read_u64_le(&bytes, 0), BODY_METHOD.0);
    assert_eq!(read_u64_le(&bytes, 8), 0);
    let snapshot = fx.stats.snapshot();
    assert_eq!(snapshot.kind_failure_count(abi::RAM_METHOD), 0);
    assert_eq!(snapshot.kind_failure_count(abi::VALIDATE_CLASS), 1);
}

#[test]
fn pic_trampolines_over_capacity_are_retryable() {
    let fx = Fixture::x86();
    let group = fx.group(vec![
        RecordSpec::new(abi::PIC_TRAMPOLINES).field("num_trampolines", 17),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    assert_eq!(run.result, Err(ReloFailure::PicTrampolineRelo));
    assert_eq!(ReloFailure::PicTrampolineRelo.code(), 22);
    assert!(ReloFailure::PicTrampolineRelo.is_retryable());
    assert_eq!(fx.vm.trampolines_left.get(), 16);
}

#[test]
fn pic_trampolines_within_capacity_are_reserved() {
    let fx = Fixture::x86();
    let group = fx.group(vec![
        RecordSpec::new(abi::PIC_TRAMPOLINES).field("num_trampolines", 16),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    run.result.expect("reservation should succeed");
    assert_eq!(fx.vm.trampolines_left.get(), 0);
}

#[test]
fn ignored_records_leave_code_untouched_on_every_pass() {
    let fx = Fixture::x86();
    let group = fx.group(vec![
        RecordSpec::new(abi::HCR).field("offset", 0).offset(0x10),
        RecordSpec::new(abi::CHECK_METHOD_ENTER)
            .field("destination_address", COMPILE_CODE_START + 0x30)
            .offset(0x20),
        RecordSpec::new(abi::CHECK_METHOD_EXIT)
            .field("destination_address", COMPILE_CODE_START + 0x30)
            .offset(0x28),
    ]);
    let mut bytes = vec![0xAAu8; 0x40];

    for _ in 0..2 {
        let mut table = body_table(Vec::new());
        let run = fx.run(&mut table, &mut bytes, 0x1000, &group);
        run.result.expect("ignored records should succeed");
        assert!(run.subscriptions.is_empty());
        assert!(bytes.iter().all(|byte| *byte == 0xAA));
    }
}

#[test]
fn hooked_method_enter_opens_the_guard() {
    let mut fx = Fixture::x86();
    fx.vm.enter_hooked = true;
    let group = fx.group(vec![
        RecordSpec::new(abi::CHECK_METHOD_ENTER)
            .field("destination_address", COMPILE_CODE_START + 0x30)
            .offset(0x10),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0x90u8; 0x40];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    run.result.expect("guard patch should succeed");
    // jmp from 0x1010 to 0x1030
    assert_eq!(&bytes[0x10..0x15], &[0xE9, 0x1B, 0x00, 0x00, 0x00]);
}

#[test]
fn unknown_tags_fail_the_group() {
    let fx = Fixture::x86();
    let mut group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0)]);
    // size word, then u16 size and the type byte
    group[8 + 2] = abi::INTERFACE_OBJECT;
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    assert_eq!(run.result, Err(ReloFailure::UnknownReloType));
    assert_eq!(ReloFailure::UnknownReloType.code(), 24);
    assert_eq!(
        fx.stats
            .snapshot()
            .failure_count(ReloFailure::UnknownReloType),
        1
    );
    assert_eq!(read_u64_le(&bytes, 0), 0);
}

#[test]
fn narrow_offsets_reach_the_end_of_their_range() {
    let fx = Fixture::x86();
    let group = fx.group(vec![
        RecordSpec::new(abi::RAM_METHOD).offset(0x7FFF).offset(0xFFFF),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10008];

    let run = fx.run(&mut table, &mut bytes, 0x10_0000, &group);

    run.result.expect("relocation should succeed");
    assert_eq!(read_u64_le(&bytes, 0x7FFF), BODY_METHOD.0);
    assert_eq!(read_u64_le(&bytes, 0xFFFF), BODY_METHOD.0);
}

#[test]
fn wide_offsets_address_past_64k() {
    let fx = Fixture::x86();
    let group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0x1_0000)]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x1_0010];

    let run = fx.run(&mut table, &mut bytes, 0x10_0000, &group);

    run.result.expect("relocation should succeed");
    assert_eq!(read_u64_le(&bytes, 0x1_0000), BODY_METHOD.0);
}

#[test]
fn locations_outside_the_body_are_patch_faults() {
    let fx = Fixture::x86();
    let group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0x20)]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 0x10];

    let run = fx.run(&mut table, &mut bytes, 0x1000, &group);

    assert_eq!(run.result, Err(ReloFailure::PatchFault));
    assert_eq!(ReloFailure::PatchFault.code(), 19);
}

#[test]
fn location_past_the_end_of_memory_is_a_patch_fault() {
    let mut fx = Fixture::x86();
    fx.vm.helpers.insert(3, 0x7fff_0000_1234);
    let group = fx.group(vec![
        RecordSpec::new(abi::ABSOLUTE_HELPER_ADDRESS)
            .field("helper_id", 3)
            .offset(0x8),
    ]);
    let mut table = body_table(Vec::new());
    let mut bytes = vec![0u8; 4];

    let run = fx.run(&mut table, &mut bytes, usize::MAX - 3, &group);

    assert_eq!(run.result, Err(ReloFailure::PatchFault));
    assert_eq!(bytes, vec![0u8; 4]);
}
