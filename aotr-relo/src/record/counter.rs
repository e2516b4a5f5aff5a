use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::options::DebugCounterPolicy;
use crate::relo_log;
use crate::runtime::{RelocationRuntime, is_outermost_site};
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::{Location, RecordBehavior, site_index};

/// Points the location at the bump-count word of a named debug counter.
#[derive(Debug, Default)]
pub struct DebugCounter {
    /// `None` when the counter is missing and the policy skips it.
    address: Option<u64>,
}

impl RecordBehavior for DebugCounter {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let index = site_index(record)?;
        let method = if is_outermost_site(index, rt.target().pointer_size()) {
            rt.method()
        } else {
            rt.inlined_site_method(index).method()
        };
        let bc_index = record.field("bc_index")?;
        let delta = record.field("delta")?;
        let fidelity = record.field("fidelity")?;
        let static_delta = record.field("static_delta")?;
        let name = rt
            .shared_cache()
            .debug_counter_name(record.field("name_offset")?);

        let counters = rt.collaborators.counters;
        self.address = match (&name, method) {
            (None, _) => None,
            // Aggregate counters are keyed by the method owning the bytecode.
            (Some(name), Some(method)) if delta != 0 => {
                counters.find_or_create_aggregate(name, method, bc_index, delta, fidelity, static_delta)
            }
            (Some(_), None) if delta != 0 => None,
            (Some(name), _) => counters.find_or_create(name, fidelity, static_delta),
        };
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\tdebug counter {:?} at {:?}",
            name,
            self.address
        );
        if self.address.is_none() && rt.options().debug_counter_policy == DebugCounterPolicy::HardAbort {
            return Err(ReloFailure::DebugCounter);
        }
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        match self.address {
            Some(address) => {
                location.store_address_sequence(rt.target(), code, address, record.relo_flags())
            }
            None => Ok(()),
        }
    }
}
