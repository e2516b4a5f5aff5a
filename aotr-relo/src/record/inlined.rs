//! Inlined call sites: prove the inlined callee is still what the compiler saw, then keep or
//! patch out the guard in front of the inlined body.

use crate::assumptions::{PatchSite, SubscriptionKind};
use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::relo_log;
use crate::runtime::{ClassRef, InlinedSiteMethod, MethodLookup, MethodRef, RelocationRuntime};
use crate::stats::InlinedCallKind;
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::class::class_from_chains;
use super::{CP_INDEX, Location, RecordAction, RecordBehavior, caller_site_action, site_index};

/// Resolution entry point the inlined call used at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InlinedKind {
    Static,
    Special,
    Virtual,
    Interface,
    Abstract,
    /// Inlined under hot class redefinition; resolved like a special call.
    Redefinable,
}

impl InlinedKind {
    fn stats_kind(self) -> InlinedCallKind {
        match self {
            InlinedKind::Static => InlinedCallKind::Static,
            InlinedKind::Special | InlinedKind::Redefinable => InlinedCallKind::Special,
            InlinedKind::Virtual => InlinedCallKind::Virtual,
            InlinedKind::Interface => InlinedCallKind::Interface,
            InlinedKind::Abstract => InlinedCallKind::Abstract,
        }
    }
}

fn tracing_forbids_inlining(rt: &RelocationRuntime<'_>, method: MethodRef) -> bool {
    let fe = rt.fe();
    fe.is_method_tracing_enabled(method)
        || fe.can_method_enter_event_be_hooked()
        || fe.can_method_exit_event_be_hooked()
}

/// Records the outcome of a site validation on the exception table and in the counters.
fn settle_site(
    rt: &mut RelocationRuntime<'_>,
    index: u64,
    method: Option<MethodRef>,
    kind: InlinedCallKind,
) {
    rt.counts.inlined_method_relos += 1;
    match method {
        Some(method) => rt.set_inlined_site_method(index, method),
        None => {
            rt.counts.failed_inlined_method_relos += 1;
            rt.disable_inlined_site(index);
        }
    }
    rt.stats().inlined_validation(kind, method.is_some());
}

/// Inlined static, special, virtual, interface and abstract calls, with or without a NOP guard.
#[derive(Debug)]
pub struct InlinedMethod {
    kind: InlinedKind,
    nop_guard: bool,
    method: Option<MethodRef>,
    receiver: Option<ClassRef>,
    destination: usize,
}

impl InlinedMethod {
    pub fn new(kind: InlinedKind, nop_guard: bool) -> Self {
        Self {
            kind,
            nop_guard,
            method: None,
            receiver: None,
            destination: 0,
        }
    }

    fn resolve(
        &mut self,
        rt: &RelocationRuntime<'_>,
        index: u64,
        cp_index: u64,
        rom_class_offset: u64,
    ) -> Option<MethodRef> {
        let caller = match rt.inlined_site_caller_method(index) {
            InlinedSiteMethod::Resolved(caller) => caller,
            other => {
                relo_log!(rt.logger(), DETAIL_LEVEL, "\tcaller of site {index} is {other:?}");
                return None;
            }
        };
        if rt.options().is_inline_site_disabled(index) {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tsite {index} disabled by option");
            return None;
        }
        let fe = rt.fe();
        let cp = fe.constant_pool_of(caller);
        if cp == 0 {
            return None;
        }
        let method = match self.kind {
            InlinedKind::Static => fe.method_from_cp(MethodLookup::Static, cp, cp_index),
            InlinedKind::Special | InlinedKind::Redefinable => {
                fe.method_from_cp(MethodLookup::Special, cp, cp_index)
            }
            InlinedKind::Virtual | InlinedKind::Abstract => {
                fe.method_from_cp(MethodLookup::Virtual, cp, cp_index)
            }
            InlinedKind::Interface => {
                let resolution = fe.resolve_interface_method(cp, cp_index, caller);
                self.receiver = resolution.receiver;
                resolution.method
            }
        }?;
        if tracing_forbids_inlining(rt, method) {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tmethod tracing forbids inlining");
            return None;
        }
        let cached = rt.shared_cache().rom_class_from_offset(rom_class_offset)?;
        if fe.rom_class_of(fe.class_of_method(method)) != cached {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tinlined method class changed");
            return None;
        }
        if rt.options().disable_ch_opts {
            return None;
        }
        Some(method)
    }

    fn activate_guard(
        &self,
        rt: &mut RelocationRuntime<'_>,
        method: MethodRef,
        location: usize,
    ) {
        let size = rt.target().pointer_size();
        let destination = self.destination;
        match self.kind {
            InlinedKind::Virtual | InlinedKind::Abstract => rt.subscribe(
                SubscriptionKind::MethodOverrideGuard {
                    method,
                    destination,
                },
                PatchSite::Code {
                    address: location,
                    size,
                },
            ),
            InlinedKind::Interface => {
                let receivers = self
                    .receiver
                    .map(|receiver| rt.fe().subclasses_of(receiver))
                    .unwrap_or_default();
                for class in receivers {
                    rt.subscribe(
                        SubscriptionKind::ClassExtendGuard { class, destination },
                        PatchSite::Code {
                            address: location,
                            size,
                        },
                    );
                }
            }
            InlinedKind::Static | InlinedKind::Special | InlinedKind::Redefinable => {}
        }
        if rt.options().hcr_enabled {
            let class = rt.fe().class_of_method(method);
            rt.subscribe(
                SubscriptionKind::ClassRedefinitionGuard { class, destination },
                PatchSite::Code {
                    address: location,
                    size,
                },
            );
        }
    }
}

impl RecordBehavior for InlinedMethod {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        caller_site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let index = site_index(record)?;
        let cp_index = record.field(CP_INDEX)?;
        let rom_class_offset = record.field("rom_class_offset")?;
        if self.nop_guard {
            let destination = rt.rebase_code_address(record.field("destination_address")?);
            self.destination = usize::try_from(destination).map_err(|_| ReloFailure::PatchFault)?;
        }

        self.method = self.resolve(rt, index, cp_index, rom_class_offset);
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\t{:?} inlined site {index}: {:?}",
            self.kind,
            self.method
        );
        if let Some(method) = self.method {
            let class = rt.fe().class_of_method(method);
            if let Some(body) = rt.method() {
                if rt.fe().is_unload_assumption_required(class, body) {
                    let slot = usize::try_from(index).map_err(|_| ReloFailure::ClassRelo)?;
                    rt.subscribe(
                        SubscriptionKind::ClassUnloadPointer { class },
                        PatchSite::InlinedSiteSlot(slot),
                    );
                }
            }
        }
        settle_site(rt, index, self.method, self.kind.stats_kind());
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        if !self.nop_guard {
            return Ok(());
        }
        let at = location.address();
        match self.method {
            Some(method) => self.activate_guard(rt, method, at),
            None => rt.target().patch_virtual_guard(code, at, self.destination)?,
        }
        Ok(())
    }
}

/// Inlining decided from profiling data: the receiver class is re-found through its loader and
/// the callee is read from its vtable.
#[derive(Debug, Default)]
pub struct ProfiledInlined {
    method: Option<MethodRef>,
}

impl ProfiledInlined {
    fn resolve(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<Option<MethodRef>> {
        let loader_chain = record.field("loader_chain_offset")?;
        let class_chain = record.field("class_chain_offset")?;
        let vtable_slot = record.field("vtable_slot")?;
        let Some(class) = class_from_chains(rt, loader_chain, class_chain) else {
            return Ok(None);
        };
        if !rt.shared_cache().class_matches_cached_version(class, class_chain) {
            return Ok(None);
        }
        let method = rt
            .fe()
            .vtable_method(class, vtable_slot)
            .filter(|method| !tracing_forbids_inlining(rt, *method));
        Ok(method)
    }
}

impl RecordBehavior for ProfiledInlined {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        caller_site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let index = site_index(record)?;
        self.method = self.resolve(rt, record)?;
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\tprofiled site {index}: {:?}",
            self.method
        );
        settle_site(rt, index, self.method, InlinedCallKind::Profiled);
        Ok(())
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
