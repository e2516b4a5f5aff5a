pub mod assumptions;
pub mod error;
pub mod factory;
pub mod group;
pub mod logging;
pub mod native;
pub mod options;
pub mod record;
pub mod relocate;
pub mod runtime;
pub mod stats;
pub mod svm;
pub mod target;
pub mod wire;

pub use relo_abi as abi;

pub use assumptions::{PatchSite, RecordingDispatcher, Subscription, SubscriptionKind};
pub use error::{ReloFailure, ReloResult};
pub use factory::Relocation;
pub use group::{apply_group, apply_record, locations};
pub use logging::RelocationLogger;
pub use native::{CodeRegion, RegionError};
pub use options::{DebugCounterPolicy, OptionsError, RelocationOptions};
pub use record::{Location, RecordAction, RecordBehavior};
pub use relocate::{
    CachedBody, FailedPerfAssumption, RelocatedBody, RelocationEnv, failed_perf_assumption,
    relocate_body, relocate_into_region,
};
pub use runtime::{
    AotMethodHeader, AssumptionDispatcher, ClassEmission, ClassRef, CodeCacheFull,
    CodeCacheManager, Collaborators, DebugCounterRegistry, ExceptionRange, ExceptionTable,
    ImplementerKind, InlinedCallSite, InlinedSiteMethod, InterfaceResolution, LoaderRef,
    MethodLookup, MethodRef, RelocationCounts, RelocationRuntime, RomClassRef, SharedClassCache,
    VmFrontEnd,
};
pub use stats::{AotStats, AotStatsSnapshot, InlinedCallKind};
pub use svm::{Symbol, SymbolType, SymbolValidationManager};
pub use target::{
    Aarch64Target, ByteOrder, CodeBuffer, Ppc32Target, RelocationTarget, TargetError,
    X86_64Target, host_target, target_by_name,
};
pub use wire::{
    GroupBuilder, GroupView, RecordSpec, RecordView, WireError, disassemble_group, encode_record,
};
