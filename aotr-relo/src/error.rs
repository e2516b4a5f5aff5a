use crate::target::TargetError;
use crate::wire::WireError;

pub type ReloResult<T> = Result<T, ReloFailure>;

/// Reasons a relocation pass gives up on a cached body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReloFailure {
    ValidateField,
    StaticFieldRelo,
    ClassRelo,
    ThunkRelo,
    TrampolineRelo,
    PicTrampolineRelo,
    CacheFullRelo,
    UnknownReloType,
    ValidateMethodExit,
    ValidateMethodEnter,
    SymbolValidation,
    /// A debug counter could not be found or created.
    DebugCounter,
    /// A patch location fell outside the body or a value could not be encoded there.
    PatchFault,
}

impl ReloFailure {
    pub const ALL: [ReloFailure; 13] = [
        ReloFailure::ValidateField,
        ReloFailure::StaticFieldRelo,
        ReloFailure::ClassRelo,
        ReloFailure::ThunkRelo,
        ReloFailure::TrampolineRelo,
        ReloFailure::PicTrampolineRelo,
        ReloFailure::CacheFullRelo,
        ReloFailure::UnknownReloType,
        ReloFailure::ValidateMethodExit,
        ReloFailure::ValidateMethodEnter,
        ReloFailure::SymbolValidation,
        ReloFailure::DebugCounter,
        ReloFailure::PatchFault,
    ];

    pub fn code(self) -> i32 {
        match self {
            ReloFailure::ValidateField => 17,
            ReloFailure::StaticFieldRelo => 18,
            ReloFailure::ClassRelo | ReloFailure::PatchFault => 19,
            ReloFailure::ThunkRelo => 20,
            ReloFailure::TrampolineRelo => 21,
            ReloFailure::PicTrampolineRelo => 22,
            ReloFailure::CacheFullRelo => 23,
            ReloFailure::UnknownReloType => 24,
            ReloFailure::ValidateMethodExit => 34,
            ReloFailure::ValidateMethodEnter => 35,
            ReloFailure::SymbolValidation => 41,
            ReloFailure::DebugCounter => -1,
        }
    }

    /// Code-cache exhaustion; the load should be retried with a fresh code cache.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ReloFailure::TrampolineRelo
                | ReloFailure::PicTrampolineRelo
                | ReloFailure::CacheFullRelo
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ReloFailure::ValidateField => "aot_validate_field",
            ReloFailure::StaticFieldRelo => "aot_static_field_relo",
            ReloFailure::ClassRelo => "aot_class_relo",
            ReloFailure::ThunkRelo => "aot_thunk_relo",
            ReloFailure::TrampolineRelo => "aot_trampoline_relo",
            ReloFailure::PicTrampolineRelo => "aot_pic_trampoline_relo",
            ReloFailure::CacheFullRelo => "aot_cache_full_relo",
            ReloFailure::UnknownReloType => "aot_unknown_relo_type",
            ReloFailure::ValidateMethodExit => "aot_validate_method_exit",
            ReloFailure::ValidateMethodEnter => "aot_validate_method_enter",
            ReloFailure::SymbolValidation => "symbol_validation",
            ReloFailure::DebugCounter => "debug_counter",
            ReloFailure::PatchFault => "patch_fault",
        }
    }
}

impl std::fmt::Display for ReloFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.name(), self.code())
    }
}

impl std::error::Error for ReloFailure {}

impl From<TargetError> for ReloFailure {
    fn from(_: TargetError) -> Self {
        ReloFailure::PatchFault
    }
}

impl From<WireError> for ReloFailure {
    fn from(_: WireError) -> Self {
        ReloFailure::UnknownReloType
    }
}
