//! Records that keep runtime checks honest: method tracing guards, redefinition sites, class
//! unload sites and class emission entries.

use relo_abi::RELO_FLAG_FULL_SIZE_RUNTIME_ASSUMPTION;

use crate::assumptions::{PatchSite, SubscriptionKind};
use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::relo_log;
use crate::runtime::{MethodRef, RelocationRuntime};
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::{Location, RecordAction, RecordBehavior, site_index};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingEvent {
    Enter,
    Exit,
}

/// Guard around a method enter or exit hook call; opened only when the event is reported.
#[derive(Debug)]
pub struct MethodTracingCheck {
    event: TracingEvent,
    destination: usize,
}

impl MethodTracingCheck {
    pub fn new(event: TracingEvent) -> Self {
        Self {
            event,
            destination: 0,
        }
    }
}

impl RecordBehavior for MethodTracingCheck {
    fn action(&self, rt: &RelocationRuntime<'_>, _record: &RecordView<'_>) -> RecordAction {
        let fe = rt.fe();
        let tracing = rt
            .method()
            .is_some_and(|method| fe.is_method_tracing_enabled(method));
        let hooked = match self.event {
            TracingEvent::Enter => fe.can_method_enter_event_be_hooked(),
            TracingEvent::Exit => fe.can_method_exit_event_be_hooked(),
        };
        let report = tracing || hooked;
        relo_log!(rt.logger(), DETAIL_LEVEL, "\treport method {:?}: {report}", self.event);
        if report {
            RecordAction::Apply
        } else {
            RecordAction::Ignore
        }
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let destination = rt.rebase_code_address(record.field("destination_address")?);
        self.destination = usize::try_from(destination).map_err(|_| ReloFailure::PatchFault)?;
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\tcheck destination {:#x}",
            self.destination
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
        rt.target()
            .patch_virtual_guard(code, location.single()?, self.destination)?;
        Ok(())
    }
}

/// Sites the VM rewrites when a class is redefined; only meaningful with HCR on.
#[derive(Debug, Default)]
pub struct Hcr;

impl RecordBehavior for Hcr {
    fn action(&self, rt: &RelocationRuntime<'_>, _record: &RecordView<'_>) -> RecordAction {
        let enabled = rt.options().hcr_enabled;
        relo_log!(rt.logger(), DETAIL_LEVEL, "\thcr enabled: {enabled}");
        if enabled {
            RecordAction::Apply
        } else {
            RecordAction::Ignore
        }
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        _code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let pointer_size = rt.target().pointer_size();
        let (value, size) = if record.field("offset")? != 0 {
            (rt.method().map(|method| method.0).unwrap_or(0), pointer_size)
        } else if record.relo_flags() & RELO_FLAG_FULL_SIZE_RUNTIME_ASSUMPTION != 0 {
            (u64::MAX, pointer_size)
        } else {
            // Address materialization sequences are tracked by their first byte.
            (u64::MAX, 1)
        };
        rt.subscribe(
            SubscriptionKind::ClassRedefinitionPic {
                value,
                unresolved: true,
            },
            PatchSite::Code {
                address: location.address(),
                size,
            },
        );
        Ok(())
    }
}

/// Location invalidated whenever any class unloads.
#[derive(Debug, Default)]
pub struct ClassUnloadAssumption;

impl RecordBehavior for ClassUnloadAssumption {
    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        _code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let size = rt.target().pointer_size();
        rt.subscribe(
            SubscriptionKind::ClassUnloadAny,
            PatchSite::Code {
                address: location.address(),
                size,
            },
        );
        Ok(())
    }
}

/// Adds a class emission entry for the bytecode at the location.
#[derive(Debug, Default)]
pub struct EmitClass {
    bc_index: i32,
    method: Option<MethodRef>,
}

impl RecordBehavior for EmitClass {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        self.bc_index = record.field("bc_index")? as i64 as i32;
        self.method = rt.inlined_site_method(site_index(record)?).method();
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        _code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        rt.add_clazz_record(location.address(), self.bc_index, self.method);
        Ok(())
    }
}
