mod common;

use common::*;
use relo::{CachedBody, ExceptionRange, FailedPerfAssumption, relocate_body};
#[cfg(any(unix, windows))]
use relo::{CodeRegion, relocate_into_region};

const INLINED: MethodRef = MethodRef(0x70);
const NEW_CODE_START: usize = 0x1000;

fn range(inlined_site: Option<usize>) -> ExceptionRange {
    ExceptionRange {
        start_pc: 0x10,
        end_pc: 0x20,
        handler_pc: 0x30,
        catch_type: 0,
        inlined_site,
        method: None,
    }
}

fn virtual_inline(cp_index: u64) -> RecordSpec {
    RecordSpec::new(abi::INLINED_VIRTUAL_METHOD_WITH_NOP_GUARD)
        .field("inlined_site_index", 0)
        .field("constant_pool", BODY_CP)
        .field("cp_index", cp_index)
        .field("rom_class_offset", 0x300)
        .field("destination_address", COMPILE_CODE_START + 0x20)
        .offset(0)
}

fn fixture_with_inlined_method() -> Fixture {
    let mut fx = Fixture::x86();
    fx.vm.add_method(INLINED, ClassRef(0x80), 0x300);
    fx.vm.cp_methods.insert((BODY_CP, 9), INLINED);
    fx
}

fn cached_table() -> ExceptionTable {
    let mut table = body_table(vec![InlinedCallSite::new(None, 5)]);
    table.start_pc = COMPILE_CODE_START + 0x10;
    table.end_pc = COMPILE_CODE_START + 0x40;
    table.ranges = vec![range(Some(0)), range(None)];
    table
}

#[test]
fn relocated_body_registers_its_subscriptions() {
    let fx = fixture_with_inlined_method();
    let group = fx.group(vec![
        virtual_inline(9),
        RecordSpec::new(abi::RAM_METHOD).offset(0x20),
    ]);
    let body = CachedBody {
        header: fx.header(),
        exception_table: cached_table(),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut bytes = vec![0x90u8; 0x40];
    let env = fx.env();

    let relocated = {
        let mut code = CodeBuffer::new(&mut bytes, NEW_CODE_START);
        relocate_body(&env, body, &mut code).expect("relocation should succeed")
    };

    let table = &relocated.exception_table;
    assert_eq!(table.start_pc, 0x1010);
    assert_eq!(table.end_pc, 0x1040);
    assert_eq!(table.ranges[0].method, Some(INLINED));
    assert_eq!(table.ranges[1].method, Some(BODY_METHOD));
    assert_eq!(relocated.subscriptions_registered, 1);
    assert_eq!(relocated.counts.inlined_method_relos, 1);
    assert_eq!(read_u64_le(&bytes, 0x20), BODY_METHOD.0);

    let registered = fx.dispatcher.registered();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].0, Some(BODY_METHOD));
    assert!(registered[0].1.is_guard());
    assert_eq!(fx.stats.snapshot().bodies_relocated, 1);
}

#[test]
fn failed_body_registers_nothing() {
    let fx = fixture_with_inlined_method();
    let group = fx.group(vec![
        virtual_inline(9),
        RecordSpec::new(abi::VALIDATE_CLASS)
            .field("inlined_site_index", outermost(fx.target()))
            .field("constant_pool", BODY_CP)
            .field("cp_index", 3)
            .field("class_chain_offset", 0x500),
    ]);
    let body = CachedBody {
        header: fx.header(),
        exception_table: cached_table(),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut bytes = vec![0x90u8; 0x40];
    let env = fx.env();
    let mut code = CodeBuffer::new(&mut bytes, NEW_CODE_START);

    let result = relocate_body(&env, body, &mut code);

    assert_eq!(result.err(), Some(ReloFailure::ClassRelo));
    assert!(fx.dispatcher.registered().is_empty());
    let snapshot = fx.stats.snapshot();
    assert_eq!(snapshot.bodies_failed, 1);
    assert_eq!(snapshot.bodies_relocated, 0);
}

#[test]
fn body_without_exit_hooks_is_rejected_while_exits_are_hooked() {
    let mut fx = Fixture::x86();
    fx.vm.exit_hooked = true;
    let group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0)]);
    let mut header = fx.header();
    header.flags = AotMethodHeader::NOT_CAPABLE_OF_METHOD_EXIT_TRACING;
    let body = CachedBody {
        header,
        exception_table: body_table(Vec::new()),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut bytes = vec![0u8; 8];
    let env = fx.env();
    let mut code = CodeBuffer::new(&mut bytes, NEW_CODE_START);

    let result = relocate_body(&env, body, &mut code);

    assert_eq!(result.err(), Some(ReloFailure::ValidateMethodExit));
    assert_eq!(ReloFailure::ValidateMethodExit.code(), 34);
    assert_eq!(
        fx.stats
            .snapshot()
            .failure_count(ReloFailure::ValidateMethodExit),
        1
    );
}

#[test]
fn traced_method_needs_enter_hooks() {
    let mut fx = Fixture::x86();
    fx.vm.traced.insert(BODY_METHOD);
    let group = fx.group(Vec::new());
    let mut header = fx.header();
    header.flags = AotMethodHeader::NOT_CAPABLE_OF_METHOD_ENTER_TRACING;
    let body = CachedBody {
        header,
        exception_table: body_table(Vec::new()),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut bytes = vec![0u8; 8];
    let env = fx.env();
    let mut code = CodeBuffer::new(&mut bytes, NEW_CODE_START);

    let result = relocate_body(&env, body, &mut code);

    assert_eq!(result.err(), Some(ReloFailure::ValidateMethodEnter));
}

#[test]
fn mostly_failed_inlines_trip_the_perf_assumption() {
    let fx = Fixture::x86();
    let sites: Vec<_> = (0..11).map(|bc| InlinedCallSite::new(None, bc)).collect();
    let specs = (0..11u64)
        .map(|site| {
            RecordSpec::new(abi::INLINED_VIRTUAL_METHOD)
                .field("inlined_site_index", site)
                .field("constant_pool", BODY_CP)
                .field("cp_index", 40 + site)
                .field("rom_class_offset", 0x300)
                .offset(site * 4)
        })
        .collect();
    let group = fx.group(specs);
    let body = CachedBody {
        header: fx.header(),
        exception_table: body_table(sites),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut bytes = vec![0u8; 0x40];
    let env = fx.env();
    let mut code = CodeBuffer::new(&mut bytes, NEW_CODE_START);

    let relocated = relocate_body(&env, body, &mut code).expect("failed inlines do not fail");

    assert_eq!(relocated.counts.failed_inlined_method_relos, 11);
    assert_eq!(
        fx.stats.snapshot().failed_perf_assumption,
        FailedPerfAssumption::TooManyFailedInlinedMethodRelos.code()
    );
    assert!(
        relocated
            .exception_table
            .inlined_sites
            .iter()
            .all(|site| site.disabled)
    );
}

#[test]
fn symbol_validated_body_checks_well_known_classes_first() {
    let fx = Fixture::x86();
    let group = fx.svm_group(0x77, vec![RecordSpec::new(abi::RAM_METHOD).offset(0)]);
    let body = CachedBody {
        header: fx.header(),
        exception_table: body_table(Vec::new()),
        relocations: &group,
        uses_symbol_validation: true,
    };
    let mut bytes = vec![0u8; 8];
    let env = fx.env();

    let result = {
        let mut code = CodeBuffer::new(&mut bytes, NEW_CODE_START);
        relocate_body(&env, body, &mut code)
    };

    assert_eq!(result.err(), Some(ReloFailure::SymbolValidation));
    assert_eq!(read_u64_le(&bytes, 0), 0);
}

#[test]
fn logger_captures_the_body_summary() {
    let fx = Fixture::x86();
    let group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0)]);
    let body = CachedBody {
        header: fx.header(),
        exception_table: body_table(Vec::new()),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut bytes = vec![0u8; 8];
    let env = fx.env();
    let mut code = CodeBuffer::new(&mut bytes, NEW_CODE_START);

    relocate_body(&env, body, &mut code).expect("relocation should succeed");

    let log = fx.logger.captured();
    assert!(log.contains("RamMethod"), "log was: {log}");
    assert!(log.contains("relocated body"), "log was: {log}");
}

#[cfg(any(unix, windows))]
#[test]
fn body_relocated_into_a_region_is_sealed_executable() {
    let fx = Fixture::x86();
    let group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0x20)]);
    let mut table = body_table(Vec::new());
    table.start_pc = COMPILE_CODE_START + 0x10;
    let body = CachedBody {
        header: fx.header(),
        exception_table: table,
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut region = CodeRegion::with_code(&[0x90u8; 0x40]).expect("map region");
    let env = fx.env();

    let relocated = relocate_into_region(&env, body, &mut region).expect("relocation should succeed");

    assert!(region.is_executable());
    assert_eq!(read_u64_le(region.bytes(), 0x20), BODY_METHOD.0);
    assert_eq!(
        relocated.exception_table.start_pc,
        region.address() as u64 + 0x10
    );
    assert_eq!(fx.stats.snapshot().bodies_relocated, 1);
}

#[cfg(any(unix, windows))]
#[test]
fn failed_body_leaves_its_region_writable() {
    let mut fx = Fixture::x86();
    fx.vm.exit_hooked = true;
    let group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0)]);
    let mut header = fx.header();
    header.flags = AotMethodHeader::NOT_CAPABLE_OF_METHOD_EXIT_TRACING;
    let body = CachedBody {
        header,
        exception_table: body_table(Vec::new()),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut region = CodeRegion::with_code(&[0u8; 8]).expect("map region");
    let env = fx.env();

    let result = relocate_into_region(&env, body, &mut region);

    assert_eq!(result.err(), Some(ReloFailure::ValidateMethodExit));
    assert!(!region.is_executable());
    assert_eq!(region.bytes(), &[0u8; 8]);
}

#[cfg(any(unix, windows))]
#[test]
fn sealed_region_cannot_be_relocated_again() {
    let fx = Fixture::x86();
    let group = fx.group(vec![RecordSpec::new(abi::RAM_METHOD).offset(0)]);
    let body = || CachedBody {
        header: fx.header(),
        exception_table: body_table(Vec::new()),
        relocations: &group,
        uses_symbol_validation: false,
    };
    let mut region = CodeRegion::with_code(&[0u8; 8]).expect("map region");
    let env = fx.env();
    relocate_into_region(&env, body(), &mut region).expect("first pass");

    let again = relocate_into_region(&env, body(), &mut region);

    assert_eq!(again.err(), Some(ReloFailure::PatchFault));
    assert_eq!(
        fx.stats.snapshot().failure_count(ReloFailure::PatchFault),
        1
    );
}
