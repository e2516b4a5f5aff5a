//! Class address records and the class validations that guard inlined field and allocation code.

use crate::assumptions::{PatchSite, SubscriptionKind};
use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::relo_log;
use crate::runtime::{ClassRef, RelocationRuntime};
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::{CP_INDEX, Location, RecordAction, RecordBehavior, new_constant_pool, site_action};

const CLASS_CHAIN: &str = "class_chain_offset";
const LOADER_CHAIN: &str = "loader_chain_offset";

/// Live address of a class referenced from the constant pool.
#[derive(Debug, Default)]
pub struct ClassObject {
    class: Option<ClassRef>,
}

impl RecordBehavior for ClassObject {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let cp = new_constant_pool(rt, record)?;
        let cp_index = record.field(CP_INDEX)?;
        if cp == 0 {
            rt.stats().runtime_class_address_unresolved_cp();
            return Err(ReloFailure::ClassRelo);
        }
        let Some(class) = rt.fe().resolve_class_ref(cp, cp_index) else {
            rt.stats().runtime_class_address_unresolved_class();
            return Err(ReloFailure::ClassRelo);
        };
        relo_log!(rt.logger(), DETAIL_LEVEL, "\tclass {:#x}", class.0);
        self.class = Some(class);
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let class = self.class.ok_or(ReloFailure::ClassRelo)?;
        let target = rt.target();
        if rt.fe().want_to_patch_class_pointer(class, location.address()) {
            rt.subscribe(
                SubscriptionKind::ClassRedefinitionPic {
                    value: class.0,
                    unresolved: false,
                },
                PatchSite::Code {
                    address: location.address(),
                    size: target.pointer_size(),
                },
            );
        }
        location.store_address_sequence(target, code, class.0, record.relo_flags())
    }
}

/// How a [`ValidateClass`] record finds the class it checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassSource {
    /// Class reference in the constant pool.
    ClassRef,
    /// Declaring class of the instance field at the constant pool index.
    InstanceField,
}

/// Proves a constant pool class still matches its cached class chain.
#[derive(Debug)]
pub struct ValidateClass {
    source: ClassSource,
}

impl ValidateClass {
    pub fn new(source: ClassSource) -> Self {
        Self { source }
    }

    fn failure(&self) -> ReloFailure {
        match self.source {
            ClassSource::ClassRef => ReloFailure::ClassRelo,
            ClassSource::InstanceField => ReloFailure::ValidateField,
        }
    }
}

impl RecordBehavior for ValidateClass {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let cp = new_constant_pool(rt, record)?;
        let cp_index = record.field(CP_INDEX)?;
        let chain = record.field(CLASS_CHAIN)?;
        rt.counts.validations += 1;

        let fe = rt.fe();
        let class = match self.source {
            ClassSource::ClassRef => fe.resolve_class_ref(cp, cp_index),
            ClassSource::InstanceField => fe.class_from_cp(cp, cp_index, false),
        };
        let verified =
            class.is_some_and(|class| rt.shared_cache().class_matches_cached_version(class, chain));
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\tvalidate class {:?} chain {chain:#x}: {verified}",
            class
        );
        if verified {
            rt.stats().class_validation(true);
            return Ok(());
        }
        rt.counts.failed_validations += 1;
        rt.stats().class_validation(false);
        Err(self.failure())
    }

    fn apply(
        &mut self,
        _rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        _code: &mut CodeBuffer<'_>,
        _location: Location,
    ) -> ReloResult<()> {
        Ok(())
    }
}

/// Proves the class declaring a static field is still the cached ROM class.
#[derive(Debug, Default)]
pub struct ValidateStaticField;

impl RecordBehavior for ValidateStaticField {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let cp = new_constant_pool(rt, record)?;
        let cp_index = record.field(CP_INDEX)?;
        let rom_class_offset = record.field("rom_class_offset")?;
        rt.counts.validations += 1;

        let fe = rt.fe();
        let cached = rt.shared_cache().rom_class_from_offset(rom_class_offset);
        let verified = match fe.class_from_cp(cp, cp_index, true) {
            Some(class) => cached.is_some() && cached == Some(fe.rom_class_of(class)),
            None => false,
        };
        if verified {
            rt.stats().class_validation(true);
            return Ok(());
        }
        relo_log!(rt.logger(), DETAIL_LEVEL, "\tstatic field class changed");
        rt.counts.failed_validations += 1;
        rt.stats().class_validation(false);
        Err(ReloFailure::ValidateField)
    }

    fn apply(
        &mut self,
        _rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        _code: &mut CodeBuffer<'_>,
        _location: Location,
    ) -> ReloResult<()> {
        Ok(())
    }
}

/// Resolves a class by loader chain and class chain, with no constant pool involved.
pub(crate) fn class_from_chains(
    rt: &RelocationRuntime<'_>,
    loader_chain: u64,
    class_chain: u64,
) -> Option<ClassRef> {
    let cache = rt.shared_cache();
    let loader = cache.loader_for_chain(loader_chain)?;
    cache.class_from_chain_and_loader(class_chain, loader)
}

/// Proves some class the compiler depended on can still be found through its loader.
#[derive(Debug, Default)]
pub struct ValidateArbitraryClass;

impl RecordBehavior for ValidateArbitraryClass {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let loader_chain = record.field(LOADER_CHAIN)?;
        let class_chain = record.field(CLASS_CHAIN)?;
        rt.counts.validations += 1;
        match class_from_chains(rt, loader_chain, class_chain) {
            Some(class) => {
                relo_log!(rt.logger(), DETAIL_LEVEL, "\tarbitrary class {:#x}", class.0);
                rt.stats().class_validation(true);
                Ok(())
            }
            None => {
                relo_log!(
                    rt.logger(),
                    DETAIL_LEVEL,
                    "\tno class for chain {class_chain:#x}"
                );
                rt.counts.failed_validations += 1;
                rt.stats().class_validation(false);
                Err(ReloFailure::ClassRelo)
            }
        }
    }

    fn apply(
        &mut self,
        _rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        _code: &mut CodeBuffer<'_>,
        _location: Location,
    ) -> ReloResult<()> {
        Ok(())
    }
}

/// Which allocation fast path an [`AllocationVerify`] record protects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationKind {
    /// Inline `new` of a class instance of a known size.
    Object,
    /// Inline allocation of a reference array of the class.
    RefArray,
}

/// Keeps an inline allocation only if the class can still be allocated that way; otherwise the
/// guard is patched to branch to the helper call.
#[derive(Debug)]
pub struct AllocationVerify {
    kind: AllocationKind,
    branch_offset: u64,
    verified: bool,
}

impl AllocationVerify {
    pub fn new(kind: AllocationKind) -> Self {
        Self {
            kind,
            branch_offset: 0,
            verified: false,
        }
    }
}

impl RecordBehavior for AllocationVerify {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let cp = new_constant_pool(rt, record)?;
        let cp_index = record.field(CP_INDEX)?;
        self.branch_offset = record.field("branch_offset")?;
        let fe = rt.fe();
        let class = if cp == 0 {
            None
        } else {
            fe.resolve_class_ref(cp, cp_index)
        };
        self.verified = match (self.kind, class) {
            (AllocationKind::Object, Some(class)) => {
                let size = record.field("allocation_size")?;
                fe.can_allocate_inline(class) && fe.allocation_size(class) == size
            }
            (AllocationKind::RefArray, Some(class)) => fe.array_class_of(class).is_some(),
            (_, None) => false,
        };
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\t{:?} allocation verified: {}",
            self.kind,
            self.verified
        );
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        rt.counts.inlined_alloc_relos += 1;
        if self.verified {
            rt.stats().inlined_alloc(true);
            return Ok(());
        }
        let at = location.single()?;
        let destination = at.wrapping_add(self.branch_offset as usize);
        rt.target().patch_virtual_guard(code, at, destination)?;
        rt.counts.failed_inlined_alloc_relos += 1;
        rt.stats().inlined_alloc(false);
        Ok(())
    }
}
