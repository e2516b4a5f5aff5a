use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::relo_log;
use crate::runtime::{InlinedSiteMethod, RelocationRuntime};
use crate::target::{CodeBuffer, RelocationTarget};
use crate::wire::RecordView;

pub mod address;
pub mod class;
pub mod counter;
pub mod guard;
pub mod inlined;
pub mod pointer;
pub mod reservation;
pub mod symbol;

/// Outcome of the action phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordAction {
    Apply,
    /// Nothing to do for this record; its locations stay untouched.
    Ignore,
    /// The whole body is unusable.
    Fail(ReloFailure),
}

/// One patch location, absolute within the code buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Single(usize),
    /// A pointer split across two instruction immediates.
    Pair { high: usize, low: usize },
}

impl Location {
    /// Address subscriptions and logs refer to; the high half for pairs.
    pub fn address(self) -> usize {
        match self {
            Location::Single(address) => address,
            Location::Pair { high, .. } => high,
        }
    }

    pub fn load_address(
        self,
        target: &dyn RelocationTarget,
        code: &CodeBuffer<'_>,
    ) -> ReloResult<u64> {
        let value = match self {
            Location::Single(at) => target.load_address(code, at)?,
            Location::Pair { high, low } => target.load_address_pair(code, high, low)?,
        };
        Ok(value)
    }

    pub fn store_address(
        self,
        target: &dyn RelocationTarget,
        code: &mut CodeBuffer<'_>,
        value: u64,
        relo_flags: u8,
    ) -> ReloResult<()> {
        match self {
            Location::Single(at) => target.store_address(code, value, at)?,
            Location::Pair { high, low } => {
                target.store_address_pair(code, value, high, low, relo_flags)?
            }
        }
        Ok(())
    }

    /// Multi-instruction materialization for single sites, split store for pairs.
    pub fn store_address_sequence(
        self,
        target: &dyn RelocationTarget,
        code: &mut CodeBuffer<'_>,
        value: u64,
        relo_flags: u8,
    ) -> ReloResult<()> {
        match self {
            Location::Single(at) => target.store_address_sequence(code, value, at, relo_flags)?,
            Location::Pair { high, low } => {
                target.store_address_pair(code, value, high, low, relo_flags)?
            }
        }
        Ok(())
    }

    pub(crate) fn single(self) -> ReloResult<usize> {
        match self {
            Location::Single(at) => Ok(at),
            Location::Pair { .. } => Err(ReloFailure::UnknownReloType),
        }
    }
}

/// The three-phase protocol every relocation kind implements.
///
/// `action` decides whether the record runs at all, `prepare` resolves what the record needs and
/// runs once per record even when it has no locations, `apply` patches one location.
pub trait RecordBehavior {
    fn action(&self, _rt: &RelocationRuntime<'_>, _record: &RecordView<'_>) -> RecordAction {
        RecordAction::Apply
    }

    fn prepare(
        &mut self,
        _rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
    ) -> ReloResult<()> {
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()>;
}

pub(crate) const SITE_INDEX: &str = "inlined_site_index";
pub(crate) const CONSTANT_POOL: &str = "constant_pool";
pub(crate) const CP_INDEX: &str = "cp_index";

pub(crate) fn site_index(record: &RecordView<'_>) -> ReloResult<u64> {
    Ok(record.field(SITE_INDEX)?)
}

/// Action shared by records that resolve through an inlined call site.
pub(crate) fn site_action(rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
    let index = match site_index(record) {
        Ok(index) => index,
        Err(failure) => return RecordAction::Fail(failure),
    };
    match rt.inlined_site_method(index) {
        InlinedSiteMethod::Resolved(_) => RecordAction::Apply,
        InlinedSiteMethod::Unloaded => {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tsite {index:#x} unloaded, skipping");
            RecordAction::Ignore
        }
        InlinedSiteMethod::CallerFailed => {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tsite {index:#x} caller failed");
            RecordAction::Fail(ReloFailure::ClassRelo)
        }
    }
}

/// Action for records that validate an inlined site itself. The site's own method is what the
/// record decides, so only its caller has to have survived relocation.
pub(crate) fn caller_site_action(rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
    let index = match site_index(record) {
        Ok(index) => index,
        Err(failure) => return RecordAction::Fail(failure),
    };
    match rt.inlined_site_caller_method(index) {
        InlinedSiteMethod::Resolved(_) => RecordAction::Apply,
        InlinedSiteMethod::Unloaded => {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tcaller of site {index:#x} unloaded, skipping");
            RecordAction::Ignore
        }
        InlinedSiteMethod::CallerFailed => {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tcaller of site {index:#x} failed");
            RecordAction::Fail(ReloFailure::ClassRelo)
        }
    }
}

/// Constant pool of the site's method; the record's own pool becomes the old base.
pub(crate) fn new_constant_pool(rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<u64> {
    let index = site_index(record)?;
    Ok(rt.current_constant_pool(index))
}

/// `old - old_base + new_base`, wrapping like pointer arithmetic.
pub fn rebase(old: u64, old_base: u64, new_base: u64) -> u64 {
    old.wrapping_sub(old_base).wrapping_add(new_base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Ppc32Target, X86_64Target};

    #[test]
    fn rebase_moves_value_with_its_base() {
        assert_eq!(rebase(0x1010, 0x1000, 0x8000), 0x8010);
        assert_eq!(rebase(0x1000, 0x1000, 0), 0);
        assert_eq!(rebase(0x10, 0x20, 0x30), 0x20);
    }

    #[test]
    fn pair_locations_only_store_on_pair_targets() {
        let mut bytes = [0u8; 16];
        let mut code = CodeBuffer::new(&mut bytes, 0x100);
        let pair = Location::Pair {
            high: 0x102,
            low: 0x10a,
        };
        assert_eq!(
            pair.store_address(&X86_64Target, &mut code, 1, 0),
            Err(ReloFailure::PatchFault)
        );
        pair.store_address(&Ppc32Target, &mut code, 0xdead_beef, 0)
            .expect("ppc32 stores pairs");
        assert_eq!(
            pair.load_address(&Ppc32Target, &code).expect("load"),
            0xdead_beef
        );
        assert_eq!(pair.address(), 0x102);
        assert_eq!(pair.single(), Err(ReloFailure::UnknownReloType));
    }
}
