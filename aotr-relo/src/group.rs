use crate::error::{ReloFailure, ReloResult};
use crate::factory::Relocation;
use crate::logging::{RECORD_LEVEL, SUMMARY_LEVEL, failure_label};
use crate::record::{Location, RecordAction, RecordBehavior};
use crate::relo_log;
use crate::runtime::RelocationRuntime;
use crate::target::CodeBuffer;
use crate::wire::{GroupView, RecordView};

/// Applies every record of a relocation group to `code`, in order, stopping at the first failure.
///
/// Locations are offsets from `code.base()`, the start of the relocated body. A failing record is
/// counted against its kind and its failure code before the failure is returned.
pub fn apply_group(
    rt: &mut RelocationRuntime<'_>,
    group_bytes: &[u8],
    code: &mut CodeBuffer<'_>,
) -> ReloResult<()> {
    let target = rt.target();
    let stats = rt.stats();
    let group = match GroupView::parse(group_bytes, target, rt.uses_symbol_validation()) {
        Ok(group) => group,
        Err(err) => {
            relo_log!(rt.logger(), SUMMARY_LEVEL, "bad relocation group: {err}");
            stats.record_failure(ReloFailure::UnknownReloType);
            return Err(ReloFailure::UnknownReloType);
        }
    };

    if let Some(offset) = group.well_known_classes_offset() {
        validate_well_known_classes(rt, offset).inspect_err(|failure| {
            stats.record_failure(*failure);
        })?;
    }

    for record in group.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                relo_log!(rt.logger(), SUMMARY_LEVEL, "bad relocation record: {err}");
                stats.record_failure(ReloFailure::UnknownReloType);
                return Err(ReloFailure::UnknownReloType);
            }
        };
        if let Err(failure) = apply_record(rt, &record, code) {
            relo_log!(
                rt.logger(),
                SUMMARY_LEVEL,
                "{} failed at group offset {:#x}: {}",
                record.name(),
                record.offset_in_group(),
                failure_label(failure)
            );
            stats.record_kind_failure(record.tag());
            stats.record_failure(failure);
            return Err(failure);
        }
    }
    Ok(())
}

fn validate_well_known_classes(rt: &mut RelocationRuntime<'_>, offset: u64) -> ReloResult<()> {
    let fe = rt.fe();
    let cache = rt.shared_cache();
    let valid = rt
        .svm
        .as_mut()
        .is_some_and(|svm| svm.validate_well_known_classes(fe, cache, offset));
    if valid {
        Ok(())
    } else {
        relo_log!(
            rt.logger(),
            SUMMARY_LEVEL,
            "well-known classes at {offset:#x} failed validation"
        );
        Err(ReloFailure::SymbolValidation)
    }
}

/// Runs action, prepare and apply for one record.
pub fn apply_record(
    rt: &mut RelocationRuntime<'_>,
    record: &RecordView<'_>,
    code: &mut CodeBuffer<'_>,
) -> ReloResult<()> {
    let mut relocation = Relocation::for_record(record)?;

    let logger = rt.logger();
    if logger.enabled(RECORD_LEVEL) {
        let mut text = String::new();
        record.describe(&mut text);
        logger.lock_log().write(RECORD_LEVEL, &text);
    }

    match relocation.action(rt, record) {
        RecordAction::Apply => {}
        RecordAction::Ignore => return Ok(()),
        RecordAction::Fail(failure) => return Err(failure),
    }
    relocation.prepare(rt, record)?;
    for location in locations(rt, record, code.base())? {
        relocation.apply(rt, record, code, location)?;
    }
    Ok(())
}

/// Absolute patch locations of a record. Ordered pair kinds consume two offsets per location and
/// skip the target's instruction prefix on each half. A location past the end of the address
/// space is a patch fault.
pub fn locations(
    rt: &RelocationRuntime<'_>,
    record: &RecordView<'_>,
    origin: usize,
) -> ReloResult<Vec<Location>> {
    let target = rt.target();
    let at = |offset: usize, skip: usize| {
        origin
            .checked_add(offset)
            .and_then(|address| address.checked_add(skip))
            .ok_or(ReloFailure::PatchFault)
    };
    let offsets: Vec<usize> = record.offsets()?.map(|offset| offset as usize).collect();
    if !target.is_ordered_pair_relocation(record.tag()) {
        return offsets
            .into_iter()
            .map(|offset| at(offset, 0).map(Location::Single))
            .collect();
    }
    if offsets.len() % 2 != 0 {
        return Err(ReloFailure::UnknownReloType);
    }
    let prefix = target.ordered_pair_prefix();
    offsets
        .chunks_exact(2)
        .map(|pair| {
            Ok(Location::Pair {
                high: at(pair[0], prefix)?,
                low: at(pair[1], prefix)?,
            })
        })
        .collect()
}
