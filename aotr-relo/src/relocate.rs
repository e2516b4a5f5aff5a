use crate::error::{ReloFailure, ReloResult};
use crate::group::apply_group;
use crate::logging::{RelocationLogger, SUMMARY_LEVEL, failure_label};
use crate::native::CodeRegion;
use crate::options::RelocationOptions;
use crate::record::rebase;
use crate::relo_log;
use crate::runtime::{
    AotMethodHeader, ClassEmission, Collaborators, ExceptionTable, RelocationCounts,
    RelocationRuntime,
};
use crate::stats::AotStats;
use crate::svm::SymbolValidationManager;
use crate::target::{CodeBuffer, RelocationTarget};

/// Everything a relocation pass reads but does not own.
#[derive(Clone, Copy)]
pub struct RelocationEnv<'a> {
    pub collaborators: Collaborators<'a>,
    pub target: &'a dyn RelocationTarget,
    pub options: &'a RelocationOptions,
    pub stats: &'a AotStats,
    pub logger: &'a RelocationLogger,
}

/// One body loaded from the shared cache, before relocation.
#[derive(Debug)]
pub struct CachedBody<'b> {
    pub header: AotMethodHeader,
    pub exception_table: ExceptionTable,
    /// The relocation group, size word first.
    pub relocations: &'b [u8],
    pub uses_symbol_validation: bool,
}

/// Results of a successful pass. Subscriptions have already gone to the dispatcher.
#[derive(Debug)]
pub struct RelocatedBody {
    pub exception_table: ExceptionTable,
    pub class_emissions: Vec<ClassEmission>,
    pub counts: RelocationCounts,
    pub subscriptions_registered: usize,
}

/// Perf sanity checks that only feed statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailedPerfAssumption {
    TooManyFailedValidations,
    TooManyFailedInlinedMethodRelos,
    TooManyFailedInlinedAllocRelos,
}

impl FailedPerfAssumption {
    pub fn code(self) -> i64 {
        match self {
            FailedPerfAssumption::TooManyFailedValidations => 1,
            FailedPerfAssumption::TooManyFailedInlinedMethodRelos => 2,
            FailedPerfAssumption::TooManyFailedInlinedAllocRelos => 3,
        }
    }
}

const THRESHOLD_MIN_RELOS: u32 = 10;

fn too_many_failed(total: u32, failed: u32) -> bool {
    total > THRESHOLD_MIN_RELOS && failed > total / 2
}

/// The last assumption that tripped, in check order.
pub fn failed_perf_assumption(counts: &RelocationCounts) -> Option<FailedPerfAssumption> {
    let mut tripped = None;
    if too_many_failed(counts.validations, counts.failed_validations) {
        tripped = Some(FailedPerfAssumption::TooManyFailedValidations);
    }
    if too_many_failed(counts.inlined_method_relos, counts.failed_inlined_method_relos) {
        tripped = Some(FailedPerfAssumption::TooManyFailedInlinedMethodRelos);
    }
    if too_many_failed(counts.inlined_alloc_relos, counts.failed_inlined_alloc_relos) {
        tripped = Some(FailedPerfAssumption::TooManyFailedInlinedAllocRelos);
    }
    tripped
}

/// Rejects bodies compiled without tracing hooks while tracing is requested for the method.
fn check_tracing_capability(env: &RelocationEnv<'_>, body: &CachedBody<'_>) -> ReloResult<()> {
    let fe = env.collaborators.front_end;
    let tracing = body
        .exception_table
        .ram_method
        .is_some_and(|method| fe.is_method_tracing_enabled(method));
    if (tracing || fe.can_method_exit_event_be_hooked())
        && body
            .header
            .has_flag(AotMethodHeader::NOT_CAPABLE_OF_METHOD_EXIT_TRACING)
    {
        return Err(ReloFailure::ValidateMethodExit);
    }
    if (tracing || fe.can_method_enter_event_be_hooked())
        && body
            .header
            .has_flag(AotMethodHeader::NOT_CAPABLE_OF_METHOD_ENTER_TRACING)
    {
        return Err(ReloFailure::ValidateMethodEnter);
    }
    Ok(())
}

/// Relocates one cached body into `code`, whose base is the body's new code start.
///
/// On success the exception table is fixed up, the instruction cache flushed and the collected
/// subscriptions registered with the dispatcher. On failure nothing is registered.
pub fn relocate_body(
    env: &RelocationEnv<'_>,
    body: CachedBody<'_>,
    code: &mut CodeBuffer<'_>,
) -> ReloResult<RelocatedBody> {
    let stats = env.stats;
    let result = relocate(env, body, code);
    match &result {
        Ok(relocated) => {
            relo_log!(
                env.logger,
                SUMMARY_LEVEL,
                "relocated body at {:#x}: {} subscriptions",
                code.base(),
                relocated.subscriptions_registered
            );
            stats.body_finished(true);
        }
        Err(failure) => {
            relo_log!(
                env.logger,
                SUMMARY_LEVEL,
                "relocation of body at {:#x} failed: {}",
                code.base(),
                failure_label(*failure)
            );
            stats.body_finished(false);
        }
    }
    result
}

/// Relocates one cached body in place inside a mapped region, then seals the region read+execute.
///
/// The region's address is the new code start. A region that cannot be patched or sealed fails
/// the body with a patch fault; a failed body leaves the region writable.
pub fn relocate_into_region(
    env: &RelocationEnv<'_>,
    body: CachedBody<'_>,
    region: &mut CodeRegion,
) -> ReloResult<RelocatedBody> {
    let relocated = {
        let mut code = region.code_buffer().map_err(|err| {
            tracing::warn!("{err}");
            env.stats.record_failure(ReloFailure::PatchFault);
            ReloFailure::PatchFault
        })?;
        relocate_body(env, body, &mut code)?
    };
    region.finalize().map_err(|err| {
        tracing::warn!("{err}");
        ReloFailure::PatchFault
    })?;
    Ok(relocated)
}

fn relocate(
    env: &RelocationEnv<'_>,
    body: CachedBody<'_>,
    code: &mut CodeBuffer<'_>,
) -> ReloResult<RelocatedBody> {
    check_tracing_capability(env, &body).inspect_err(|failure| env.stats.record_failure(*failure))?;

    let CachedBody {
        header,
        mut exception_table,
        relocations,
        uses_symbol_validation,
    } = body;
    let new_code_start = code.base() as u64;
    exception_table.start_pc = rebase(
        exception_table.start_pc,
        header.compile_code_start,
        new_code_start,
    );
    exception_table.end_pc = rebase(
        exception_table.end_pc,
        header.compile_code_start,
        new_code_start,
    );

    let (outcome, counts, subscriptions, class_emissions) = {
        let mut rt = RelocationRuntime::new(
            env.collaborators,
            env.target,
            env.options,
            env.stats,
            env.logger,
            header,
            new_code_start,
            &mut exception_table,
        );
        if uses_symbol_validation {
            rt = rt.with_symbol_validation(SymbolValidationManager::new());
        }
        let outcome = apply_group(&mut rt, relocations, code);
        let counts = rt.counts();
        let subscriptions = rt.take_subscriptions();
        let class_emissions = rt.class_emissions().to_vec();
        (outcome, counts, subscriptions, class_emissions)
    };

    if env.options.threshold_checks {
        if let Some(tripped) = failed_perf_assumption(&counts) {
            relo_log!(env.logger, SUMMARY_LEVEL, "perf assumption failed: {tripped:?}");
            env.stats.set_failed_perf_assumption(tripped.code());
        }
    }
    outcome?;

    let body_method = exception_table.ram_method;
    let sites = &exception_table.inlined_sites;
    for range in exception_table.ranges.iter_mut() {
        range.method = match range.inlined_site {
            Some(index) => sites.get(index).and_then(|site| site.method_info),
            None => body_method,
        };
    }

    env.target.flush_cache(code);
    let subscriptions_registered = subscriptions.len();
    env.collaborators
        .assumptions
        .register(body_method, subscriptions);

    Ok(RelocatedBody {
        exception_table,
        class_emissions,
        counts,
        subscriptions_registered,
    })
}
