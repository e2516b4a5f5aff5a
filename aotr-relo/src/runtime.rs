use crate::assumptions::{Subscription, SubscriptionKind};
use crate::logging::RelocationLogger;
use crate::options::RelocationOptions;
use crate::stats::AotStats;
use crate::svm::SymbolValidationManager;
use crate::target::RelocationTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassRef(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderRef(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RomClassRef(pub u64);

/// Site index the compiler writes for code that belongs to the outermost method.
pub fn is_outermost_site(index: u64, pointer_size: usize) -> bool {
    match pointer_size {
        8 => index == u64::MAX,
        _ => index == u32::MAX as u64,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlinedCallSite {
    /// `None` until relocation proves the inlined method, or after it failed to.
    pub method_info: Option<MethodRef>,
    pub caller_index: Option<usize>,
    pub bc_index: u32,
    /// Set when the site's guard was patched to the slow path; its inlined code never runs.
    pub disabled: bool,
}

impl InlinedCallSite {
    pub fn new(caller_index: Option<usize>, bc_index: u32) -> Self {
        Self {
            method_info: None,
            caller_index,
            bc_index,
            disabled: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionRange {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub catch_type: u32,
    pub inlined_site: Option<usize>,
    pub method: Option<MethodRef>,
}

/// Per-body metadata that relocation reads and rewrites.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExceptionTable {
    pub ram_method: Option<MethodRef>,
    pub constant_pool: u64,
    pub start_pc: u64,
    pub end_pc: u64,
    pub body_info: u64,
    pub inlined_sites: Vec<InlinedCallSite>,
    pub ranges: Vec<ExceptionRange>,
}

/// Compile-time facts recorded with the cached body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AotMethodHeader {
    pub compile_code_start: u64,
    pub compile_data_start: u64,
    pub code_size: u64,
    pub flags: u32,
}

impl AotMethodHeader {
    pub const NOT_CAPABLE_OF_METHOD_ENTER_TRACING: u32 = 0x0000_0001;
    pub const NOT_CAPABLE_OF_METHOD_EXIT_TRACING: u32 = 0x0000_0002;

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// What an inlined call site currently resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InlinedSiteMethod {
    Resolved(MethodRef),
    /// The site (or the method owning it) did not survive relocation.
    CallerFailed,
    /// The inlined code is unreachable: its class was unloaded or its guard was patched out.
    Unloaded,
}

impl InlinedSiteMethod {
    pub fn method(self) -> Option<MethodRef> {
        match self {
            InlinedSiteMethod::Resolved(method) => Some(method),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodLookup {
    Static,
    Special,
    Virtual,
    Interface,
    ImproperInterface,
}

/// Which class-hierarchy query proves a devirtualized call target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImplementerKind {
    Virtual { use_resolved_interface_method: bool },
    Interface,
    Abstract,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterfaceResolution {
    pub receiver: Option<ClassRef>,
    pub method: Option<MethodRef>,
}

/// Class and method resolution against the live VM.
///
/// Every lookup is expected to take VM access internally and release it before returning.
pub trait VmFrontEnd {
    fn constant_pool_of(&self, method: MethodRef) -> u64;
    fn class_of_method(&self, method: MethodRef) -> ClassRef;

    fn constant_pool_of_class(&self, _class: ClassRef) -> u64 {
        0
    }

    fn rom_class_of(&self, class: ClassRef) -> RomClassRef;

    fn is_method_unloaded(&self, _method: MethodRef) -> bool {
        false
    }

    fn method_from_cp(&self, lookup: MethodLookup, cp: u64, cp_index: u64) -> Option<MethodRef>;

    fn resolve_interface_method(
        &self,
        cp: u64,
        cp_index: u64,
        caller: MethodRef,
    ) -> InterfaceResolution;

    fn resolve_class_ref(&self, cp: u64, cp_index: u64) -> Option<ClassRef>;

    /// Declaring class of the field at `cp_index`.
    fn class_from_cp(&self, cp: u64, cp_index: u64, is_static: bool) -> Option<ClassRef>;

    fn class_of_static_from_cp(&self, cp: u64, cp_index: u64) -> Option<ClassRef> {
        self.class_from_cp(cp, cp_index, true)
    }

    fn declaring_class_from_field_or_static(&self, cp: u64, cp_index: i32) -> Option<ClassRef> {
        let cp_index = u64::try_from(cp_index).ok()?;
        self.class_from_cp(cp, cp_index, false)
            .or_else(|| self.class_from_cp(cp, cp_index, true))
    }

    fn static_field_address(&self, cp: u64, cp_index: u64) -> Option<u64>;

    fn helper_address(&self, helper_id: u32) -> u64;

    fn global_value(&self, _index: u64) -> u64 {
        0
    }

    fn array_copy_helper(&self) -> u64 {
        0
    }

    fn array_copy_toc(&self) -> u64 {
        0
    }

    fn jni_target_address(&self, method: MethodRef) -> Option<u64>;

    fn thunk_signature(&self, _cp: u64, _cp_index: u64) -> Option<String> {
        None
    }

    fn lookup_thunk(&self, _signature: &str) -> Option<u64> {
        None
    }

    fn thunk_helper(&self, _signature: &str) -> u64 {
        0
    }

    fn register_thunk(&self, _signature: &str, _address: u64) {}

    fn is_method_tracing_enabled(&self, _method: MethodRef) -> bool {
        false
    }

    fn can_method_enter_event_be_hooked(&self) -> bool {
        false
    }

    fn can_method_exit_event_be_hooked(&self) -> bool {
        false
    }

    fn want_to_patch_class_pointer(&self, _class: ClassRef, _location: usize) -> bool {
        false
    }

    fn is_unload_assumption_required(&self, _class: ClassRef, _body_method: MethodRef) -> bool {
        false
    }

    fn same_class_loaders(&self, _first: ClassRef, _second: ClassRef) -> bool {
        true
    }

    fn can_allocate_inline(&self, _class: ClassRef) -> bool {
        false
    }

    fn allocation_size(&self, _class: ClassRef) -> u64 {
        0
    }

    fn array_class_of(&self, _component: ClassRef) -> Option<ClassRef> {
        None
    }

    fn vtable_method(&self, _class: ClassRef, _vtable_slot: u64) -> Option<MethodRef> {
        None
    }

    fn subclasses_of(&self, _class: ClassRef) -> Vec<ClassRef> {
        Vec::new()
    }

    // Symbol validation queries.

    fn class_by_name(&self, _beholder: ClassRef, _rom_class: RomClassRef) -> Option<ClassRef> {
        None
    }

    fn system_class_by_name(&self, _rom_class: RomClassRef) -> Option<ClassRef> {
        None
    }

    fn component_class_of(&self, _array: ClassRef) -> Option<ClassRef> {
        None
    }

    fn super_class_of(&self, _class: ClassRef) -> Option<ClassRef> {
        None
    }

    fn is_instance_of(
        &self,
        _object: ClassRef,
        _cast: ClassRef,
        _object_type_is_fixed: bool,
        _cast_type_is_fixed: bool,
    ) -> bool {
        false
    }

    fn class_class_of(&self, _class: ClassRef) -> Option<ClassRef> {
        None
    }

    fn single_concrete_subclass(&self, _class: ClassRef) -> Option<ClassRef> {
        None
    }

    fn primitive_class(&self, _primitive_type: u8) -> Option<ClassRef> {
        None
    }

    fn class_from_itable_index_cp(&self, _cp: u64, _cp_index: u64) -> Option<ClassRef> {
        None
    }

    fn interface_method_from_cp(
        &self,
        _cp: u64,
        _cp_index: u64,
        _lookup: ClassRef,
    ) -> Option<MethodRef> {
        None
    }

    fn method_by_name(
        &self,
        _beholder: ClassRef,
        _rom_class: RomClassRef,
        _rom_method_offset: u64,
    ) -> Option<MethodRef> {
        None
    }

    fn method_from_class(&self, _class: ClassRef, _index: u32) -> Option<MethodRef> {
        None
    }

    fn virtual_method_from_offset(
        &self,
        _class: ClassRef,
        _offset: i32,
        _ignore_rt_resolve: bool,
    ) -> Option<MethodRef> {
        None
    }

    fn method_from_class_and_signature(
        &self,
        _class: ClassRef,
        _beholder: ClassRef,
        _rom_method_offset: u64,
    ) -> Option<MethodRef> {
        None
    }

    fn stack_walker_may_skip_frames(&self, _method: MethodRef, _class: ClassRef) -> bool {
        false
    }

    fn array_class_from_java_vm(&self, _index: i32) -> Option<ClassRef> {
        None
    }

    fn is_class_initialized(&self, _class: ClassRef) -> bool {
        false
    }

    fn single_implementer(
        &self,
        _class: ClassRef,
        _cp_index_or_slot: i32,
        _caller: MethodRef,
        _kind: ImplementerKind,
    ) -> Option<MethodRef> {
        None
    }
}

/// Lookups into the memory-mapped shared class cache.
pub trait SharedClassCache {
    fn rom_class_from_offset(&self, offset: u64) -> Option<RomClassRef>;

    /// First ROM class of the chain stored at `offset`.
    fn rom_class_of_chain(&self, offset: u64) -> Option<RomClassRef>;

    fn loader_for_chain(&self, loader_chain_offset: u64) -> Option<LoaderRef>;

    fn class_from_chain_and_loader(
        &self,
        class_chain_offset: u64,
        loader: LoaderRef,
    ) -> Option<ClassRef>;

    fn class_matches_cached_version(&self, class: ClassRef, class_chain_offset: u64) -> bool;

    fn is_bootstrap_loader(&self, _loader: LoaderRef) -> bool {
        false
    }

    /// Persisted J2I thunk, header included.
    fn find_thunk(&self, _signature: &str) -> Option<Vec<u8>> {
        None
    }

    fn debug_counter_name(&self, _name_offset: u64) -> Option<String> {
        None
    }

    /// Class chain offsets of the well-known classes table.
    fn well_known_classes(&self, _offset: u64) -> Option<Vec<u64>> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeCacheFull;

impl std::fmt::Display for CodeCacheFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code cache is full")
    }
}

impl std::error::Error for CodeCacheFull {}

/// Process-wide code cache. Reservations are atomic reserve-or-fail.
pub trait CodeCacheManager {
    fn reserve_trampolines(&self, count: u32) -> Result<(), CodeCacheFull>;
    fn reserve_unresolved_trampoline(&self, cp: u64, cp_index: u64) -> Result<(), CodeCacheFull>;
    fn find_helper_trampoline(&self, helper_id: u32, base_location: usize) -> u64;
    fn allocate_code_memory(&self, size: usize) -> Option<u64>;
    fn install(&self, address: u64, code: &[u8]);
    fn unreserve(&self) {}
}

/// Named debug counters; returns the live bump-count address.
pub trait DebugCounterRegistry {
    fn find_or_create(&self, name: &str, fidelity: u64, static_delta: u64) -> Option<u64>;

    fn find_or_create_aggregate(
        &self,
        name: &str,
        method: MethodRef,
        bc_index: u64,
        delta: u64,
        fidelity: u64,
        static_delta: u64,
    ) -> Option<u64>;
}

/// Receives the invalidation subscriptions of a successfully relocated body.
pub trait AssumptionDispatcher {
    fn register(&self, body_method: Option<MethodRef>, subscriptions: Vec<Subscription>);
}

#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub front_end: &'a dyn VmFrontEnd,
    pub shared_cache: &'a dyn SharedClassCache,
    pub code_cache: &'a dyn CodeCacheManager,
    pub counters: &'a dyn DebugCounterRegistry,
    pub assumptions: &'a dyn AssumptionDispatcher,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassEmission {
    pub location: usize,
    pub bc_index: i32,
    pub method: Option<MethodRef>,
}

/// Counts the perf-threshold check looks at once the group is done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelocationCounts {
    pub validations: u32,
    pub failed_validations: u32,
    pub inlined_method_relos: u32,
    pub failed_inlined_method_relos: u32,
    pub inlined_alloc_relos: u32,
    pub failed_inlined_alloc_relos: u32,
}

/// State shared by every record of one relocation pass.
pub struct RelocationRuntime<'a> {
    pub(crate) collaborators: Collaborators<'a>,
    pub(crate) target: &'a dyn RelocationTarget,
    pub(crate) options: &'a RelocationOptions,
    pub(crate) stats: &'a AotStats,
    pub(crate) logger: &'a RelocationLogger,
    pub(crate) header: AotMethodHeader,
    pub(crate) new_code_start: u64,
    pub(crate) exception_table: &'a mut ExceptionTable,
    pub(crate) svm: Option<SymbolValidationManager>,
    pub(crate) subscriptions: Vec<Subscription>,
    pub(crate) class_emissions: Vec<ClassEmission>,
    pub(crate) counts: RelocationCounts,
}

impl<'a> RelocationRuntime<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collaborators: Collaborators<'a>,
        target: &'a dyn RelocationTarget,
        options: &'a RelocationOptions,
        stats: &'a AotStats,
        logger: &'a RelocationLogger,
        header: AotMethodHeader,
        new_code_start: u64,
        exception_table: &'a mut ExceptionTable,
    ) -> Self {
        Self {
            collaborators,
            target,
            options,
            stats,
            logger,
            header,
            new_code_start,
            exception_table,
            svm: None,
            subscriptions: Vec::new(),
            class_emissions: Vec::new(),
            counts: RelocationCounts::default(),
        }
    }

    pub fn with_symbol_validation(mut self, svm: SymbolValidationManager) -> Self {
        self.svm = Some(svm);
        self
    }

    pub fn fe(&self) -> &'a dyn VmFrontEnd {
        self.collaborators.front_end
    }

    pub fn shared_cache(&self) -> &'a dyn SharedClassCache {
        self.collaborators.shared_cache
    }

    pub fn code_cache(&self) -> &'a dyn CodeCacheManager {
        self.collaborators.code_cache
    }

    pub fn target(&self) -> &'a dyn RelocationTarget {
        self.target
    }

    pub fn options(&self) -> &'a RelocationOptions {
        self.options
    }

    pub fn stats(&self) -> &'a AotStats {
        self.stats
    }

    pub fn logger(&self) -> &'a RelocationLogger {
        self.logger
    }

    pub fn header(&self) -> AotMethodHeader {
        self.header
    }

    pub fn new_code_start(&self) -> u64 {
        self.new_code_start
    }

    pub fn exception_table(&self) -> &ExceptionTable {
        self.exception_table
    }

    pub fn counts(&self) -> RelocationCounts {
        self.counts
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn class_emissions(&self) -> &[ClassEmission] {
        &self.class_emissions
    }

    pub fn uses_symbol_validation(&self) -> bool {
        self.svm.is_some()
    }

    pub fn method(&self) -> Option<MethodRef> {
        self.exception_table.ram_method
    }

    /// Moves a compile-time code address into the freshly copied body.
    pub fn rebase_code_address(&self, address: u64) -> u64 {
        address
            .wrapping_sub(self.header.compile_code_start)
            .wrapping_add(self.new_code_start)
    }

    fn outermost_method(&self) -> InlinedSiteMethod {
        match self.method() {
            Some(method) => InlinedSiteMethod::Resolved(method),
            None => InlinedSiteMethod::CallerFailed,
        }
    }

    /// An unresolved site nested under an unloaded or disabled one is unreachable and reads as
    /// unloaded too; any other unresolved site means its caller failed relocation.
    pub fn inlined_site_method(&self, index: u64) -> InlinedSiteMethod {
        self.site_method_within(index, self.exception_table.inlined_sites.len())
    }

    fn site_method_within(&self, index: u64, depth: usize) -> InlinedSiteMethod {
        if is_outermost_site(index, self.target.pointer_size()) {
            return self.outermost_method();
        }
        let Some(site) = usize::try_from(index)
            .ok()
            .and_then(|index| self.exception_table.inlined_sites.get(index))
        else {
            return InlinedSiteMethod::CallerFailed;
        };
        if site.disabled {
            return InlinedSiteMethod::Unloaded;
        }
        match site.method_info {
            None => match site.caller_index {
                Some(caller)
                    if depth > 0
                        && self.site_method_within(caller as u64, depth - 1)
                            == InlinedSiteMethod::Unloaded =>
                {
                    InlinedSiteMethod::Unloaded
                }
                _ => InlinedSiteMethod::CallerFailed,
            },
            Some(method) if self.fe().is_method_unloaded(method) => InlinedSiteMethod::Unloaded,
            Some(method) => InlinedSiteMethod::Resolved(method),
        }
    }

    /// Method of the site that inlined `index`.
    pub fn inlined_site_caller_method(&self, index: u64) -> InlinedSiteMethod {
        if is_outermost_site(index, self.target.pointer_size()) {
            return self.inlined_site_method(index);
        }
        let site = usize::try_from(index)
            .ok()
            .and_then(|index| self.exception_table.inlined_sites.get(index));
        match site {
            None => InlinedSiteMethod::CallerFailed,
            Some(site) => match site.caller_index {
                None => self.outermost_method(),
                Some(caller) => self.inlined_site_method(caller as u64),
            },
        }
    }

    pub(crate) fn set_inlined_site_method(&mut self, index: u64, method: MethodRef) {
        if let Some(site) = self.inlined_site_mut(index) {
            site.method_info = Some(method);
            site.disabled = false;
        }
    }

    pub(crate) fn disable_inlined_site(&mut self, index: u64) {
        if let Some(site) = self.inlined_site_mut(index) {
            site.method_info = None;
            site.disabled = true;
        }
    }

    fn inlined_site_mut(&mut self, index: u64) -> Option<&mut InlinedCallSite> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.exception_table.inlined_sites.get_mut(index))
    }

    /// Constant pool of the method owning site `index`; zero when it is not available.
    pub fn current_constant_pool(&self, index: u64) -> u64 {
        if is_outermost_site(index, self.target.pointer_size()) {
            return self.exception_table.constant_pool;
        }
        match self.inlined_site_method(index) {
            InlinedSiteMethod::Resolved(method) => self.fe().constant_pool_of(method),
            _ => 0,
        }
    }

    pub(crate) fn subscribe(&mut self, kind: SubscriptionKind, site: crate::assumptions::PatchSite) {
        self.subscriptions.push(Subscription { kind, site });
    }

    pub(crate) fn add_clazz_record(
        &mut self,
        location: usize,
        bc_index: i32,
        method: Option<MethodRef>,
    ) {
        self.class_emissions.push(ClassEmission {
            location,
            bc_index,
            method,
        });
    }

    pub(crate) fn take_subscriptions(&mut self) -> Vec<Subscription> {
        std::mem::take(&mut self.subscriptions)
    }
}
