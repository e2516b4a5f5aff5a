#![allow(dead_code, unused_imports)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

pub use relo::abi;
pub use relo::{
    AotMethodHeader, AotStats, ClassRef, CodeBuffer, CodeCacheFull, CodeCacheManager,
    Collaborators, DebugCounterPolicy, DebugCounterRegistry, ExceptionTable, GroupBuilder,
    InlinedCallSite, InterfaceResolution, LoaderRef, MethodLookup, MethodRef, Ppc32Target,
    RecordSpec, RecordingDispatcher, ReloFailure, ReloResult, RelocationCounts, RelocationEnv,
    RelocationLogger, RelocationOptions, RelocationRuntime, RelocationTarget, RomClassRef,
    SharedClassCache, Subscription, SubscriptionKind, SymbolValidationManager, VmFrontEnd,
    X86_64Target, apply_group,
};

pub const BODY_METHOD: MethodRef = MethodRef(0x10);
pub const BODY_CLASS: ClassRef = ClassRef(0x20);
pub const BODY_CP: u64 = 0xC000;
pub const COMPILE_CODE_START: u64 = 0x9000;

/// Site index of the outermost method for a target.
pub fn outermost(target: &dyn RelocationTarget) -> u64 {
    match target.pointer_size() {
        8 => u64::MAX,
        _ => u32::MAX as u64,
    }
}

/// In-memory VM, shared class cache, code cache and counter registry.
#[derive(Default)]
pub struct FakeVm {
    // front end
    pub method_cp: HashMap<MethodRef, u64>,
    pub method_class: HashMap<MethodRef, ClassRef>,
    pub class_rom: HashMap<ClassRef, RomClassRef>,
    pub class_cp: HashMap<ClassRef, u64>,
    pub cp_methods: HashMap<(u64, u64), MethodRef>,
    pub cp_classes: HashMap<(u64, u64), ClassRef>,
    pub field_classes: HashMap<(u64, u64, bool), ClassRef>,
    pub statics: HashMap<(u64, u64), u64>,
    pub interfaces: HashMap<(u64, u64), InterfaceResolution>,
    pub helpers: HashMap<u32, u64>,
    pub jni: HashMap<MethodRef, u64>,
    pub unloaded: HashSet<MethodRef>,
    pub traced: HashSet<MethodRef>,
    pub enter_hooked: bool,
    pub exit_hooked: bool,
    pub patch_class_pointers: bool,
    pub foreign_loader_classes: HashSet<ClassRef>,
    pub vtables: HashMap<(ClassRef, u64), MethodRef>,
    pub subclasses: HashMap<ClassRef, Vec<ClassRef>>,
    pub inline_allocatable: HashMap<ClassRef, u64>,
    pub array_classes: HashMap<ClassRef, ClassRef>,
    pub system_classes: HashMap<RomClassRef, ClassRef>,
    pub thunk_signatures: HashMap<(u64, u64), String>,
    pub live_thunks: RefCell<HashMap<String, u64>>,
    /// Classes a beholder's loader finds by ROM class name.
    pub class_names: HashMap<(ClassRef, RomClassRef), ClassRef>,
    pub super_classes: HashMap<ClassRef, ClassRef>,
    pub class_methods: HashMap<(ClassRef, u32), MethodRef>,
    pub named_methods: HashMap<(ClassRef, RomClassRef, u64), MethodRef>,

    // shared class cache
    pub rom_classes: HashMap<u64, RomClassRef>,
    /// Chain offset to its first ROM class and the live class it matches.
    pub chains: HashMap<u64, (RomClassRef, ClassRef)>,
    pub loaders: HashMap<u64, LoaderRef>,
    pub bootstrap_loaders: HashSet<LoaderRef>,
    pub loaded: HashMap<(u64, LoaderRef), ClassRef>,
    pub cached_thunks: HashMap<String, Vec<u8>>,
    pub counter_names: HashMap<u64, String>,
    pub well_known: HashMap<u64, Vec<u64>>,

    // code cache
    pub trampolines_left: Cell<u32>,
    pub unresolved_trampolines_left: Cell<u32>,
    pub reserved_unresolved: RefCell<Vec<(u64, u64)>>,
    pub helper_trampolines: HashMap<u32, u64>,
    pub code_memory_left: Cell<usize>,
    pub next_code_address: Cell<u64>,
    pub installed: RefCell<Vec<(u64, Vec<u8>)>>,
    pub unreserve_calls: Cell<u32>,

    // counters
    pub counters: HashMap<String, u64>,
    pub aggregate_counters: HashMap<(String, MethodRef, u64), u64>,
}

impl FakeVm {
    /// A VM that knows the body method, its class and its constant pool.
    pub fn new() -> Self {
        let mut vm = Self::default();
        vm.method_cp.insert(BODY_METHOD, BODY_CP);
        vm.method_class.insert(BODY_METHOD, BODY_CLASS);
        vm.class_rom.insert(BODY_CLASS, RomClassRef(0x200));
        vm.trampolines_left.set(16);
        vm.unresolved_trampolines_left.set(16);
        vm.code_memory_left.set(0x1000);
        vm.next_code_address.set(0x50_0000);
        vm
    }

    /// Registers `method` of `class` with a ROM class the shared cache knows at `rom_offset`.
    pub fn add_method(&mut self, method: MethodRef, class: ClassRef, rom_offset: u64) {
        let rom = RomClassRef(class.0 << 4);
        self.method_class.insert(method, class);
        self.class_rom.insert(class, rom);
        self.rom_classes.insert(rom_offset, rom);
    }

    /// Makes `class` reachable through a loader chain and class chain.
    pub fn add_chained_class(&mut self, class: ClassRef, loader_chain: u64, class_chain: u64) {
        let loader = LoaderRef(loader_chain << 1);
        self.loaders.insert(loader_chain, loader);
        self.loaded.insert((class_chain, loader), class);
        self.chains
            .insert(class_chain, (RomClassRef(class.0 << 4), class));
    }
}

impl VmFrontEnd for FakeVm {
    fn constant_pool_of(&self, method: MethodRef) -> u64 {
        self.method_cp.get(&method).copied().unwrap_or(0)
    }

    fn class_of_method(&self, method: MethodRef) -> ClassRef {
        self.method_class
            .get(&method)
            .copied()
            .unwrap_or(ClassRef(0))
    }

    fn constant_pool_of_class(&self, class: ClassRef) -> u64 {
        self.class_cp.get(&class).copied().unwrap_or(0)
    }

    fn rom_class_of(&self, class: ClassRef) -> RomClassRef {
        self.class_rom
            .get(&class)
            .copied()
            .unwrap_or(RomClassRef(0))
    }

    fn is_method_unloaded(&self, method: MethodRef) -> bool {
        self.unloaded.contains(&method)
    }

    fn method_from_cp(&self, _lookup: MethodLookup, cp: u64, cp_index: u64) -> Option<MethodRef> {
        self.cp_methods.get(&(cp, cp_index)).copied()
    }

    fn resolve_interface_method(
        &self,
        cp: u64,
        cp_index: u64,
        _caller: MethodRef,
    ) -> InterfaceResolution {
        self.interfaces
            .get(&(cp, cp_index))
            .copied()
            .unwrap_or_default()
    }

    fn resolve_class_ref(&self, cp: u64, cp_index: u64) -> Option<ClassRef> {
        self.cp_classes.get(&(cp, cp_index)).copied()
    }

    fn class_from_cp(&self, cp: u64, cp_index: u64, is_static: bool) -> Option<ClassRef> {
        self.field_classes.get(&(cp, cp_index, is_static)).copied()
    }

    fn static_field_address(&self, cp: u64, cp_index: u64) -> Option<u64> {
        self.statics.get(&(cp, cp_index)).copied()
    }

    fn helper_address(&self, helper_id: u32) -> u64 {
        self.helpers.get(&helper_id).copied().unwrap_or(0)
    }

    fn jni_target_address(&self, method: MethodRef) -> Option<u64> {
        self.jni.get(&method).copied()
    }

    fn thunk_signature(&self, cp: u64, cp_index: u64) -> Option<String> {
        self.thunk_signatures.get(&(cp, cp_index)).cloned()
    }

    fn lookup_thunk(&self, signature: &str) -> Option<u64> {
        self.live_thunks.borrow().get(signature).copied()
    }

    fn thunk_helper(&self, _signature: &str) -> u64 {
        0xABCD_0000
    }

    fn register_thunk(&self, signature: &str, address: u64) {
        self.live_thunks
            .borrow_mut()
            .insert(signature.to_string(), address);
    }

    fn is_method_tracing_enabled(&self, method: MethodRef) -> bool {
        self.traced.contains(&method)
    }

    fn can_method_enter_event_be_hooked(&self) -> bool {
        self.enter_hooked
    }

    fn can_method_exit_event_be_hooked(&self) -> bool {
        self.exit_hooked
    }

    fn want_to_patch_class_pointer(&self, _class: ClassRef, _location: usize) -> bool {
        self.patch_class_pointers
    }

    fn same_class_loaders(&self, first: ClassRef, second: ClassRef) -> bool {
        !self.foreign_loader_classes.contains(&first) && !self.foreign_loader_classes.contains(&second)
    }

    fn can_allocate_inline(&self, class: ClassRef) -> bool {
        self.inline_allocatable.contains_key(&class)
    }

    fn allocation_size(&self, class: ClassRef) -> u64 {
        self.inline_allocatable.get(&class).copied().unwrap_or(0)
    }

    fn array_class_of(&self, component: ClassRef) -> Option<ClassRef> {
        self.array_classes.get(&component).copied()
    }

    fn vtable_method(&self, class: ClassRef, vtable_slot: u64) -> Option<MethodRef> {
        self.vtables.get(&(class, vtable_slot)).copied()
    }

    fn subclasses_of(&self, class: ClassRef) -> Vec<ClassRef> {
        self.subclasses.get(&class).cloned().unwrap_or_default()
    }

    fn system_class_by_name(&self, rom_class: RomClassRef) -> Option<ClassRef> {
        self.system_classes.get(&rom_class).copied()
    }

    fn class_by_name(&self, beholder: ClassRef, rom_class: RomClassRef) -> Option<ClassRef> {
        self.class_names.get(&(beholder, rom_class)).copied()
    }

    fn super_class_of(&self, class: ClassRef) -> Option<ClassRef> {
        self.super_classes.get(&class).copied()
    }

    fn method_from_class(&self, class: ClassRef, index: u32) -> Option<MethodRef> {
        self.class_methods.get(&(class, index)).copied()
    }

    fn method_by_name(
        &self,
        beholder: ClassRef,
        rom_class: RomClassRef,
        rom_method_offset: u64,
    ) -> Option<MethodRef> {
        self.named_methods
            .get(&(beholder, rom_class, rom_method_offset))
            .copied()
    }
}

impl SharedClassCache for FakeVm {
    fn rom_class_from_offset(&self, offset: u64) -> Option<RomClassRef> {
        self.rom_classes.get(&offset).copied()
    }

    fn rom_class_of_chain(&self, offset: u64) -> Option<RomClassRef> {
        self.chains.get(&offset).map(|(rom, _)| *rom)
    }

    fn loader_for_chain(&self, loader_chain_offset: u64) -> Option<LoaderRef> {
        self.loaders.get(&loader_chain_offset).copied()
    }

    fn class_from_chain_and_loader(
        &self,
        class_chain_offset: u64,
        loader: LoaderRef,
    ) -> Option<ClassRef> {
        self.loaded.get(&(class_chain_offset, loader)).copied()
    }

    fn class_matches_cached_version(&self, class: ClassRef, class_chain_offset: u64) -> bool {
        self.chains
            .get(&class_chain_offset)
            .is_some_and(|(_, cached)| *cached == class)
    }

    fn is_bootstrap_loader(&self, loader: LoaderRef) -> bool {
        self.bootstrap_loaders.contains(&loader)
    }

    fn find_thunk(&self, signature: &str) -> Option<Vec<u8>> {
        self.cached_thunks.get(signature).cloned()
    }

    fn debug_counter_name(&self, name_offset: u64) -> Option<String> {
        self.counter_names.get(&name_offset).cloned()
    }

    fn well_known_classes(&self, offset: u64) -> Option<Vec<u64>> {
        self.well_known.get(&offset).cloned()
    }
}

impl CodeCacheManager for FakeVm {
    fn reserve_trampolines(&self, count: u32) -> Result<(), CodeCacheFull> {
        let left = self.trampolines_left.get();
        if count > left {
            return Err(CodeCacheFull);
        }
        self.trampolines_left.set(left - count);
        Ok(())
    }

    fn reserve_unresolved_trampoline(&self, cp: u64, cp_index: u64) -> Result<(), CodeCacheFull> {
        let left = self.unresolved_trampolines_left.get();
        if left == 0 {
            return Err(CodeCacheFull);
        }
        self.unresolved_trampolines_left.set(left - 1);
        self.reserved_unresolved.borrow_mut().push((cp, cp_index));
        Ok(())
    }

    fn find_helper_trampoline(&self, helper_id: u32, _base_location: usize) -> u64 {
        self.helper_trampolines.get(&helper_id).copied().unwrap_or(0)
    }

    fn allocate_code_memory(&self, size: usize) -> Option<u64> {
        let left = self.code_memory_left.get();
        if size > left {
            return None;
        }
        self.code_memory_left.set(left - size);
        let address = self.next_code_address.get();
        self.next_code_address.set(address + size as u64);
        Some(address)
    }

    fn install(&self, address: u64, code: &[u8]) {
        self.installed.borrow_mut().push((address, code.to_vec()));
    }

    fn unreserve(&self) {
        self.unreserve_calls.set(self.unreserve_calls.get() + 1);
    }
}

impl DebugCounterRegistry for FakeVm {
    fn find_or_create(&self, name: &str, _fidelity: u64, _static_delta: u64) -> Option<u64> {
        self.counters.get(name).copied()
    }

    fn find_or_create_aggregate(
        &self,
        name: &str,
        method: MethodRef,
        bc_index: u64,
        _delta: u64,
        _fidelity: u64,
        _static_delta: u64,
    ) -> Option<u64> {
        self.aggregate_counters
            .get(&(name.to_string(), method, bc_index))
            .copied()
    }
}

/// Everything one relocation pass borrows, owned in one place.
pub struct Fixture {
    pub vm: FakeVm,
    pub dispatcher: RecordingDispatcher,
    pub options: RelocationOptions,
    pub stats: AotStats,
    pub logger: RelocationLogger,
    pub target: Box<dyn RelocationTarget>,
}

impl Fixture {
    pub fn new(target: Box<dyn RelocationTarget>) -> Self {
        Self {
            vm: FakeVm::new(),
            dispatcher: RecordingDispatcher::new(),
            options: RelocationOptions::default(),
            stats: AotStats::new(),
            logger: RelocationLogger::capturing(7),
            target,
        }
    }

    pub fn x86() -> Self {
        Self::new(Box::new(X86_64Target))
    }

    pub fn ppc32() -> Self {
        Self::new(Box::new(Ppc32Target))
    }

    pub fn target(&self) -> &dyn RelocationTarget {
        self.target.as_ref()
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            front_end: &self.vm,
            shared_cache: &self.vm,
            code_cache: &self.vm,
            counters: &self.vm,
            assumptions: &self.dispatcher,
        }
    }

    pub fn env(&self) -> RelocationEnv<'_> {
        RelocationEnv {
            collaborators: self.collaborators(),
            target: self.target(),
            options: &self.options,
            stats: &self.stats,
            logger: &self.logger,
        }
    }

    pub fn header(&self) -> AotMethodHeader {
        AotMethodHeader {
            compile_code_start: COMPILE_CODE_START,
            ..AotMethodHeader::default()
        }
    }

    /// Runtime for a body copied to `new_code_start`.
    pub fn runtime<'a>(
        &'a self,
        table: &'a mut ExceptionTable,
        new_code_start: u64,
    ) -> RelocationRuntime<'a> {
        RelocationRuntime::new(
            self.collaborators(),
            self.target(),
            &self.options,
            &self.stats,
            &self.logger,
            self.header(),
            new_code_start,
            table,
        )
    }

    pub fn group(&self, specs: Vec<RecordSpec>) -> Vec<u8> {
        build_group(GroupBuilder::new(self.target()), specs)
    }

    /// Group carrying a well-known classes word, as laid out for symbol validation.
    pub fn svm_group(&self, well_known_offset: u64, specs: Vec<RecordSpec>) -> Vec<u8> {
        build_group(
            GroupBuilder::new(self.target()).with_well_known_classes(well_known_offset),
            specs,
        )
    }

    /// Applies `group` to `bytes`, loaded at `base`, with the body copied to `base`.
    pub fn run(
        &self,
        table: &mut ExceptionTable,
        bytes: &mut [u8],
        base: usize,
        group: &[u8],
    ) -> GroupRun {
        let mut rt = self.runtime(table, base as u64);
        let mut code = CodeBuffer::new(bytes, base);
        let result = apply_group(&mut rt, group, &mut code);
        GroupRun::collect(result, &rt)
    }

    /// As [`Fixture::run`], with a fresh symbol validation manager.
    pub fn run_svm(
        &self,
        table: &mut ExceptionTable,
        bytes: &mut [u8],
        base: usize,
        group: &[u8],
    ) -> GroupRun {
        let mut rt = self
            .runtime(table, base as u64)
            .with_symbol_validation(SymbolValidationManager::new());
        let mut code = CodeBuffer::new(bytes, base);
        let result = apply_group(&mut rt, group, &mut code);
        GroupRun::collect(result, &rt)
    }
}

fn build_group(mut builder: GroupBuilder<'_>, specs: Vec<RecordSpec>) -> Vec<u8> {
    for spec in specs {
        builder.push(spec).expect("record should encode");
    }
    builder.finish()
}

/// What a single `apply_group` call left behind.
pub struct GroupRun {
    pub result: ReloResult<()>,
    pub counts: RelocationCounts,
    pub subscriptions: Vec<Subscription>,
}

impl GroupRun {
    fn collect(result: ReloResult<()>, rt: &RelocationRuntime<'_>) -> Self {
        Self {
            result,
            counts: rt.counts(),
            subscriptions: rt.subscriptions().to_vec(),
        }
    }
}

/// Exception table of a resolved body with `sites` inlined call sites.
pub fn body_table(sites: Vec<InlinedCallSite>) -> ExceptionTable {
    ExceptionTable {
        ram_method: Some(BODY_METHOD),
        constant_pool: BODY_CP,
        inlined_sites: sites,
        ..ExceptionTable::default()
    }
}

pub fn read_u64_le(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

pub fn read_i32_le(bytes: &[u8], at: usize) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    i32::from_le_bytes(word)
}
