use crate::runtime::{ClassRef, MethodRef};

/// Where a subscription patches when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchSite {
    Code { address: usize, size: usize },
    /// The `method_info` slot of an inlined call site in the exception table.
    InlinedSiteSlot(usize),
}

/// Class-lifecycle event a relocated body depends on, with the patch that undoes the dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Guard at the site is turned into a jump to `destination` once `method` is overridden.
    MethodOverrideGuard {
        method: MethodRef,
        destination: usize,
    },
    /// Guard is patched when a new subclass of `class` is loaded.
    ClassExtendGuard { class: ClassRef, destination: usize },
    /// Guard is patched when `class` is redefined.
    ClassRedefinitionGuard { class: ClassRef, destination: usize },
    /// The pointer at the site is rewritten when the entity is redefined.
    ClassRedefinitionPic { value: u64, unresolved: bool },
    /// The pointer at the site is cleared when `class` unloads.
    ClassUnloadPointer { class: ClassRef },
    /// The site is invalidated when any class unloads.
    ClassUnloadAny,
    /// The JNI call at the site is re-bound if `method` is re-registered.
    JniCallSite { method: MethodRef },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub kind: SubscriptionKind,
    pub site: PatchSite,
}

impl Subscription {
    pub fn code(kind: SubscriptionKind, address: usize, size: usize) -> Self {
        Self {
            kind,
            site: PatchSite::Code { address, size },
        }
    }

    pub fn is_guard(&self) -> bool {
        matches!(
            self.kind,
            SubscriptionKind::MethodOverrideGuard { .. }
                | SubscriptionKind::ClassExtendGuard { .. }
                | SubscriptionKind::ClassRedefinitionGuard { .. }
        )
    }
}

/// Collects subscriptions in memory; useful as a dispatcher for tools and tests.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    registered: std::sync::Mutex<Vec<(Option<MethodRef>, Subscription)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered(&self) -> Vec<(Option<MethodRef>, Subscription)> {
        match self.registered.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl crate::runtime::AssumptionDispatcher for RecordingDispatcher {
    fn register(&self, body_method: Option<MethodRef>, subscriptions: Vec<Subscription>) {
        let mut guard = match self.registered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.extend(subscriptions.into_iter().map(|sub| (body_method, sub)));
    }
}
