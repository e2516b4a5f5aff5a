use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use relo_abi::KIND_COUNT;

use crate::error::ReloFailure;

/// Call kinds tracked separately for inlined-method validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InlinedCallKind {
    Static,
    Special,
    Virtual,
    Interface,
    Abstract,
    Profiled,
}

impl InlinedCallKind {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        match self {
            InlinedCallKind::Static => 0,
            InlinedCallKind::Special => 1,
            InlinedCallKind::Virtual => 2,
            InlinedCallKind::Interface => 3,
            InlinedCallKind::Abstract => 4,
            InlinedCallKind::Profiled => 5,
        }
    }
}

#[derive(Default)]
struct ValidationCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Telemetry for AOT loads. Counters never influence relocation results.
pub struct AotStats {
    failures: [AtomicU64; ReloFailure::ALL.len()],
    kind_failures: [AtomicU64; KIND_COUNT],
    inlined: [ValidationCounters; InlinedCallKind::COUNT],
    inlined_method_relocated: AtomicU64,
    inlined_method_validation_failed: AtomicU64,
    inlined_alloc_relos: AtomicU64,
    inlined_alloc_failed: AtomicU64,
    class_validations: AtomicU64,
    class_validations_failed: AtomicU64,
    runtime_class_address_unresolved_cp: AtomicU64,
    runtime_class_address_unresolved_class: AtomicU64,
    bodies_relocated: AtomicU64,
    bodies_failed: AtomicU64,
    failed_perf_assumption: AtomicI64,
}

impl Default for AotStats {
    fn default() -> Self {
        Self {
            failures: std::array::from_fn(|_| AtomicU64::new(0)),
            kind_failures: std::array::from_fn(|_| AtomicU64::new(0)),
            inlined: std::array::from_fn(|_| ValidationCounters::default()),
            inlined_method_relocated: AtomicU64::new(0),
            inlined_method_validation_failed: AtomicU64::new(0),
            inlined_alloc_relos: AtomicU64::new(0),
            inlined_alloc_failed: AtomicU64::new(0),
            class_validations: AtomicU64::new(0),
            class_validations_failed: AtomicU64::new(0),
            runtime_class_address_unresolved_cp: AtomicU64::new(0),
            runtime_class_address_unresolved_class: AtomicU64::new(0),
            bodies_relocated: AtomicU64::new(0),
            bodies_failed: AtomicU64::new(0),
            failed_perf_assumption: AtomicI64::new(0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InlinedValidationSnapshot {
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AotStatsSnapshot {
    pub failures: Vec<(ReloFailure, u64)>,
    pub kind_failures: Vec<(u8, u64)>,
    pub static_methods: InlinedValidationSnapshot,
    pub special_methods: InlinedValidationSnapshot,
    pub virtual_methods: InlinedValidationSnapshot,
    pub interface_methods: InlinedValidationSnapshot,
    pub abstract_methods: InlinedValidationSnapshot,
    pub profiled_methods: InlinedValidationSnapshot,
    pub inlined_method_relocated: u64,
    pub inlined_method_validation_failed: u64,
    pub inlined_alloc_relos: u64,
    pub inlined_alloc_failed: u64,
    pub class_validations: u64,
    pub class_validations_failed: u64,
    pub runtime_class_address_unresolved_cp: u64,
    pub runtime_class_address_unresolved_class: u64,
    pub bodies_relocated: u64,
    pub bodies_failed: u64,
    pub failed_perf_assumption: i64,
}

impl AotStatsSnapshot {
    pub fn failure_count(&self, failure: ReloFailure) -> u64 {
        self.failures
            .iter()
            .find(|(kind, _)| *kind == failure)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn kind_failure_count(&self, tag: u8) -> u64 {
        self.kind_failures
            .iter()
            .find(|(kind, _)| *kind == tag)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl AotStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, failure: ReloFailure) {
        if let Some(index) = ReloFailure::ALL.iter().position(|kind| *kind == failure) {
            bump(&self.failures[index]);
        }
    }

    pub fn record_kind_failure(&self, tag: u8) {
        if let Some(counter) = self.kind_failures.get(tag as usize) {
            bump(counter);
        }
    }

    pub fn inlined_validation(&self, kind: InlinedCallKind, succeeded: bool) {
        let counters = &self.inlined[kind.index()];
        if succeeded {
            bump(&counters.succeeded);
            bump(&self.inlined_method_relocated);
        } else {
            bump(&counters.failed);
            bump(&self.inlined_method_validation_failed);
        }
    }

    pub fn inlined_alloc(&self, succeeded: bool) {
        bump(&self.inlined_alloc_relos);
        if !succeeded {
            bump(&self.inlined_alloc_failed);
        }
    }

    pub fn class_validation(&self, succeeded: bool) {
        bump(&self.class_validations);
        if !succeeded {
            bump(&self.class_validations_failed);
        }
    }

    pub fn runtime_class_address_unresolved_cp(&self) {
        bump(&self.runtime_class_address_unresolved_cp);
    }

    pub fn runtime_class_address_unresolved_class(&self) {
        bump(&self.runtime_class_address_unresolved_class);
    }

    pub fn body_finished(&self, succeeded: bool) {
        if succeeded {
            bump(&self.bodies_relocated);
        } else {
            bump(&self.bodies_failed);
        }
    }

    pub fn set_failed_perf_assumption(&self, code: i64) {
        self.failed_perf_assumption.store(code, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AotStatsSnapshot {
        let inlined = |kind: InlinedCallKind| {
            let counters = &self.inlined[kind.index()];
            InlinedValidationSnapshot {
                succeeded: load(&counters.succeeded),
                failed: load(&counters.failed),
            }
        };
        AotStatsSnapshot {
            failures: ReloFailure::ALL
                .iter()
                .zip(self.failures.iter())
                .map(|(kind, count)| (*kind, load(count)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            kind_failures: self
                .kind_failures
                .iter()
                .enumerate()
                .map(|(tag, count)| (tag as u8, load(count)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            static_methods: inlined(InlinedCallKind::Static),
            special_methods: inlined(InlinedCallKind::Special),
            virtual_methods: inlined(InlinedCallKind::Virtual),
            interface_methods: inlined(InlinedCallKind::Interface),
            abstract_methods: inlined(InlinedCallKind::Abstract),
            profiled_methods: inlined(InlinedCallKind::Profiled),
            inlined_method_relocated: load(&self.inlined_method_relocated),
            inlined_method_validation_failed: load(&self.inlined_method_validation_failed),
            inlined_alloc_relos: load(&self.inlined_alloc_relos),
            inlined_alloc_failed: load(&self.inlined_alloc_failed),
            class_validations: load(&self.class_validations),
            class_validations_failed: load(&self.class_validations_failed),
            runtime_class_address_unresolved_cp: load(&self.runtime_class_address_unresolved_cp),
            runtime_class_address_unresolved_class: load(
                &self.runtime_class_address_unresolved_class,
            ),
            bodies_relocated: load(&self.bodies_relocated),
            bodies_failed: load(&self.bodies_failed),
            failed_perf_assumption: self.failed_perf_assumption.load(Ordering::Relaxed),
        }
    }
}
