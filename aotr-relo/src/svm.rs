use std::collections::{HashMap, HashSet};

use crate::runtime::{
    ClassRef, ImplementerKind, MethodLookup, MethodRef, SharedClassCache, VmFrontEnd,
};

pub const NO_ID: u16 = 0;
pub const FIRST_ID: u16 = 1;

const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    Class(ClassRef),
    Method(MethodRef),
}

impl Symbol {
    pub fn value(self) -> u64 {
        match self {
            Symbol::Class(class) => class.0,
            Symbol::Method(method) => method.0,
        }
    }
}

/// Symbol type tags carried by `SymbolFromManager` records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolType {
    Opaque,
    Class,
    Method,
}

impl SymbolType {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(SymbolType::Opaque),
            1 => Some(SymbolType::Class),
            2 => Some(SymbolType::Method),
            _ => None,
        }
    }

    pub fn matches(self, symbol: Symbol) -> bool {
        match (self, symbol) {
            (SymbolType::Opaque, _) => true,
            (SymbolType::Class, Symbol::Class(_)) => true,
            (SymbolType::Method, Symbol::Method(_)) => true,
            _ => false,
        }
    }
}

/// Session table binding the compiler's numeric symbol ids to live classes and methods.
///
/// An id is bound the first time a validation produces a symbol for it; later validations of
/// the same id must produce the identical symbol. A symbol can be bound to one id only.
#[derive(Debug, Default)]
pub struct SymbolValidationManager {
    symbols: HashMap<u16, Symbol>,
    seen: HashSet<Symbol>,
    well_known_classes: Vec<ClassRef>,
}

fn base_component_class(fe: &dyn VmFrontEnd, class: ClassRef) -> ClassRef {
    let mut current = class;
    for _ in 0..MAX_ARRAY_DIMENSIONS {
        match fe.component_class_of(current) {
            Some(component) => current = component,
            None => break,
        }
    }
    current
}

impl SymbolValidationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol_from_id(&self, id: u16) -> Option<Symbol> {
        self.symbols.get(&id).copied()
    }

    pub fn class_from_id(&self, id: u16) -> Option<ClassRef> {
        match self.symbol_from_id(id)? {
            Symbol::Class(class) => Some(class),
            Symbol::Method(_) => None,
        }
    }

    pub fn method_from_id(&self, id: u16) -> Option<MethodRef> {
        match self.symbol_from_id(id)? {
            Symbol::Method(method) => Some(method),
            Symbol::Class(_) => None,
        }
    }

    pub fn is_defined(&self, id: u16) -> bool {
        self.symbols.contains_key(&id)
    }

    pub fn well_known_classes(&self) -> &[ClassRef] {
        &self.well_known_classes
    }

    pub fn validate_symbol(&mut self, id: u16, symbol: Symbol) -> bool {
        if id == NO_ID {
            return false;
        }
        match self.symbols.get(&id) {
            Some(bound) => *bound == symbol,
            None => {
                if !self.seen.insert(symbol) {
                    return false;
                }
                self.symbols.insert(id, symbol);
                true
            }
        }
    }

    fn validate_class(&mut self, id: u16, class: Option<ClassRef>) -> bool {
        class.is_some_and(|class| self.validate_symbol(id, Symbol::Class(class)))
    }

    fn validate_base_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        id: u16,
        class: Option<ClassRef>,
    ) -> bool {
        let class = class.map(|class| base_component_class(fe, class));
        self.validate_class(id, class)
    }

    fn validate_method(&mut self, id: u16, method: Option<MethodRef>) -> bool {
        method.is_some_and(|method| self.validate_symbol(id, Symbol::Method(method)))
    }

    fn beholder_cp(&self, fe: &dyn VmFrontEnd, beholder_id: u16) -> Option<u64> {
        self.class_from_id(beholder_id)
            .map(|beholder| fe.constant_pool_of_class(beholder))
    }

    /// Checks every class of the well-known classes table before any record runs.
    pub fn validate_well_known_classes(
        &mut self,
        fe: &dyn VmFrontEnd,
        cache: &dyn SharedClassCache,
        table_offset: u64,
    ) -> bool {
        let Some(chains) = cache.well_known_classes(table_offset) else {
            return false;
        };
        let mut classes = Vec::with_capacity(chains.len());
        for chain in chains {
            let class = cache
                .rom_class_of_chain(chain)
                .and_then(|rom_class| fe.system_class_by_name(rom_class));
            match class {
                Some(class) if cache.class_matches_cached_version(class, chain) => {
                    classes.push(class)
                }
                _ => return false,
            }
        }
        for class in &classes {
            self.seen.insert(Symbol::Class(*class));
        }
        self.well_known_classes = classes;
        true
    }

    pub fn validate_root_class(&mut self, fe: &dyn VmFrontEnd, class_id: u16, root: ClassRef) -> bool {
        self.validate_base_class(fe, class_id, Some(root))
    }

    pub fn validate_class_by_name(
        &mut self,
        fe: &dyn VmFrontEnd,
        cache: &dyn SharedClassCache,
        class_id: u16,
        beholder_id: u16,
        class_chain_offset: u64,
    ) -> bool {
        let Some(beholder) = self.class_from_id(beholder_id) else {
            return false;
        };
        let class = cache
            .rom_class_of_chain(class_chain_offset)
            .and_then(|rom_class| fe.class_by_name(beholder, rom_class))
            .filter(|class| cache.class_matches_cached_version(*class, class_chain_offset));
        self.validate_base_class(fe, class_id, class)
    }

    pub fn validate_profiled_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        cache: &dyn SharedClassCache,
        class_id: u16,
        primitive_type: u8,
        loader_chain_offset: u64,
        class_chain_offset: u64,
    ) -> bool {
        if primitive_type != 0 {
            return self.is_defined(class_id);
        }
        let class = cache
            .loader_for_chain(loader_chain_offset)
            .and_then(|loader| cache.class_from_chain_and_loader(class_chain_offset, loader));
        self.validate_base_class(fe, class_id, class)
    }

    pub fn validate_class_from_cp(
        &mut self,
        fe: &dyn VmFrontEnd,
        class_id: u16,
        beholder_id: u16,
        cp_index: u32,
    ) -> bool {
        let class = self
            .beholder_cp(fe, beholder_id)
            .and_then(|cp| fe.resolve_class_ref(cp, cp_index as u64));
        self.validate_base_class(fe, class_id, class)
    }

    pub fn validate_defining_class_from_cp(
        &mut self,
        fe: &dyn VmFrontEnd,
        class_id: u16,
        beholder_id: u16,
        cp_index: u32,
        is_static: bool,
    ) -> bool {
        let class = self
            .beholder_cp(fe, beholder_id)
            .and_then(|cp| fe.class_from_cp(cp, cp_index as u64, is_static));
        self.validate_base_class(fe, class_id, class)
    }

    pub fn validate_static_class_from_cp(
        &mut self,
        fe: &dyn VmFrontEnd,
        class_id: u16,
        beholder_id: u16,
        cp_index: u32,
    ) -> bool {
        let class = self
            .beholder_cp(fe, beholder_id)
            .and_then(|cp| fe.class_of_static_from_cp(cp, cp_index as u64));
        self.validate_base_class(fe, class_id, class)
    }

    pub fn validate_class_from_method(
        &mut self,
        fe: &dyn VmFrontEnd,
        class_id: u16,
        method_id: u16,
    ) -> bool {
        let class = self
            .method_from_id(method_id)
            .map(|method| fe.class_of_method(method));
        self.validate_base_class(fe, class_id, class)
    }

    pub fn validate_component_class_from_array_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        component_class_id: u16,
        array_class_id: u16,
    ) -> bool {
        let component = self
            .class_from_id(array_class_id)
            .and_then(|array| fe.component_class_of(array));
        self.validate_class(component_class_id, component)
    }

    pub fn validate_array_class_from_component_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        array_class_id: u16,
        component_class_id: u16,
    ) -> bool {
        let array = self
            .class_from_id(component_class_id)
            .and_then(|component| fe.array_class_of(component));
        self.validate_class(array_class_id, array)
    }

    pub fn validate_super_class_from_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        super_class_id: u16,
        child_class_id: u16,
    ) -> bool {
        let super_class = self
            .class_from_id(child_class_id)
            .and_then(|child| fe.super_class_of(child));
        self.validate_base_class(fe, super_class_id, super_class)
    }

    pub fn validate_class_instance_of_class(
        &self,
        fe: &dyn VmFrontEnd,
        class_one_id: u16,
        class_two_id: u16,
        object_type_is_fixed: bool,
        cast_type_is_fixed: bool,
        was_instance_of: bool,
    ) -> bool {
        match (
            self.class_from_id(class_one_id),
            self.class_from_id(class_two_id),
        ) {
            (Some(one), Some(two)) => {
                fe.is_instance_of(one, two, object_type_is_fixed, cast_type_is_fixed)
                    == was_instance_of
            }
            _ => false,
        }
    }

    pub fn validate_system_class_by_name(
        &mut self,
        fe: &dyn VmFrontEnd,
        cache: &dyn SharedClassCache,
        system_class_id: u16,
        class_chain_offset: u64,
    ) -> bool {
        let class = cache
            .rom_class_of_chain(class_chain_offset)
            .and_then(|rom_class| fe.system_class_by_name(rom_class))
            .filter(|class| cache.class_matches_cached_version(*class, class_chain_offset));
        self.validate_base_class(fe, system_class_id, class)
    }

    pub fn validate_class_from_itable_index_cp(
        &mut self,
        fe: &dyn VmFrontEnd,
        class_id: u16,
        beholder_id: u16,
        cp_index: u32,
    ) -> bool {
        let class = self
            .beholder_cp(fe, beholder_id)
            .and_then(|cp| fe.class_from_itable_index_cp(cp, cp_index as u64));
        self.validate_base_class(fe, class_id, class)
    }

    pub fn validate_declaring_class_from_field_or_static(
        &mut self,
        fe: &dyn VmFrontEnd,
        defining_class_id: u16,
        beholder_id: u16,
        cp_index: i32,
    ) -> bool {
        let class = self
            .beholder_cp(fe, beholder_id)
            .and_then(|cp| fe.declaring_class_from_field_or_static(cp, cp_index));
        self.validate_base_class(fe, defining_class_id, class)
    }

    pub fn validate_class_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        class_class_id: u16,
        object_class_id: u16,
    ) -> bool {
        let class_class = self
            .class_from_id(object_class_id)
            .and_then(|object| fe.class_class_of(object));
        self.validate_class(class_class_id, class_class)
    }

    pub fn validate_concrete_sub_class_from_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        child_class_id: u16,
        super_class_id: u16,
    ) -> bool {
        let child = self
            .class_from_id(super_class_id)
            .and_then(|super_class| fe.single_concrete_subclass(super_class));
        self.validate_base_class(fe, child_class_id, child)
    }

    pub fn validate_class_chain(
        &self,
        cache: &dyn SharedClassCache,
        class_id: u16,
        class_chain_offset: u64,
    ) -> bool {
        self.class_from_id(class_id)
            .is_some_and(|class| cache.class_matches_cached_version(class, class_chain_offset))
    }

    pub fn validate_rom_class(
        &self,
        fe: &dyn VmFrontEnd,
        cache: &dyn SharedClassCache,
        class_id: u16,
        rom_class_offset: u64,
    ) -> bool {
        match (
            self.class_from_id(class_id),
            cache.rom_class_from_offset(rom_class_offset),
        ) {
            (Some(class), Some(rom_class)) => fe.rom_class_of(class) == rom_class,
            _ => false,
        }
    }

    pub fn validate_primitive_class(
        &self,
        fe: &dyn VmFrontEnd,
        class_id: u16,
        primitive_type: u8,
    ) -> bool {
        match self.class_from_id(class_id) {
            Some(class) => fe.primitive_class(primitive_type) == Some(class),
            None => false,
        }
    }

    pub fn validate_method_from_inlined_site(
        &mut self,
        method_id: u16,
        method: Option<MethodRef>,
    ) -> bool {
        self.validate_method(method_id, method)
    }

    pub fn validate_method_by_name(
        &mut self,
        fe: &dyn VmFrontEnd,
        cache: &dyn SharedClassCache,
        method_id: u16,
        beholder_id: u16,
        rom_class_offset: u64,
        rom_method_offset: u64,
    ) -> bool {
        let method = match (
            self.class_from_id(beholder_id),
            cache.rom_class_from_offset(rom_class_offset),
        ) {
            (Some(beholder), Some(rom_class)) => {
                fe.method_by_name(beholder, rom_class, rom_method_offset)
            }
            _ => None,
        };
        self.validate_method(method_id, method)
    }

    pub fn validate_method_from_class(
        &mut self,
        fe: &dyn VmFrontEnd,
        method_id: u16,
        beholder_id: u16,
        index: u32,
    ) -> bool {
        let method = self
            .class_from_id(beholder_id)
            .and_then(|beholder| fe.method_from_class(beholder, index));
        self.validate_method(method_id, method)
    }

    /// Static, special, virtual and improper-interface method lookups through the beholder's pool.
    pub fn validate_method_from_cp(
        &mut self,
        fe: &dyn VmFrontEnd,
        lookup: MethodLookup,
        method_id: u16,
        beholder_id: u16,
        cp_index: u32,
    ) -> bool {
        let method = self
            .beholder_cp(fe, beholder_id)
            .and_then(|cp| fe.method_from_cp(lookup, cp, cp_index as u64));
        self.validate_method(method_id, method)
    }

    pub fn validate_virtual_method_from_offset(
        &mut self,
        fe: &dyn VmFrontEnd,
        method_id: u16,
        beholder_id: u16,
        virtual_call_offset: i32,
        ignore_rt_resolve: bool,
    ) -> bool {
        let method = self.class_from_id(beholder_id).and_then(|beholder| {
            fe.virtual_method_from_offset(beholder, virtual_call_offset, ignore_rt_resolve)
        });
        self.validate_method(method_id, method)
    }

    pub fn validate_interface_method_from_cp(
        &mut self,
        fe: &dyn VmFrontEnd,
        method_id: u16,
        beholder_id: u16,
        lookup_id: u16,
        cp_index: u32,
    ) -> bool {
        let method = match (
            self.beholder_cp(fe, beholder_id),
            self.class_from_id(lookup_id),
        ) {
            (Some(cp), Some(lookup)) => fe.interface_method_from_cp(cp, cp_index as u64, lookup),
            _ => None,
        };
        self.validate_method(method_id, method)
    }

    pub fn validate_method_from_class_and_signature(
        &mut self,
        fe: &dyn VmFrontEnd,
        method_id: u16,
        method_class_id: u16,
        beholder_id: u16,
        rom_method_offset: u64,
    ) -> bool {
        let method = match (
            self.class_from_id(method_class_id),
            self.class_from_id(beholder_id),
        ) {
            (Some(class), Some(beholder)) => {
                fe.method_from_class_and_signature(class, beholder, rom_method_offset)
            }
            _ => None,
        };
        self.validate_method(method_id, method)
    }

    pub fn validate_stack_walker_may_skip_frames(
        &self,
        fe: &dyn VmFrontEnd,
        method_id: u16,
        method_class_id: u16,
        could_skip_frames: bool,
    ) -> bool {
        match (
            self.method_from_id(method_id),
            self.class_from_id(method_class_id),
        ) {
            (Some(method), Some(class)) => {
                fe.stack_walker_may_skip_frames(method, class) == could_skip_frames
            }
            _ => false,
        }
    }

    pub fn validate_array_class_from_java_vm(
        &mut self,
        fe: &dyn VmFrontEnd,
        array_class_id: u16,
        array_class_index: i32,
    ) -> bool {
        let class = fe.array_class_from_java_vm(array_class_index);
        self.validate_base_class(fe, array_class_id, class)
    }

    pub fn validate_class_info_is_initialized(
        &self,
        fe: &dyn VmFrontEnd,
        class_id: u16,
        was_initialized: bool,
    ) -> bool {
        match self.class_from_id(class_id) {
            Some(class) => !was_initialized || fe.is_class_initialized(class),
            None => false,
        }
    }

    pub fn validate_method_from_single_implementer(
        &mut self,
        fe: &dyn VmFrontEnd,
        method_id: u16,
        this_class_id: u16,
        cp_index_or_slot: i32,
        caller_method_id: u16,
        kind: ImplementerKind,
    ) -> bool {
        let method = match (
            self.class_from_id(this_class_id),
            self.method_from_id(caller_method_id),
        ) {
            (Some(class), Some(caller)) => {
                fe.single_implementer(class, cp_index_or_slot, caller, kind)
            }
            _ => None,
        };
        self.validate_method(method_id, method)
    }
}
