use std::collections::HashMap;
use std::sync::OnceLock;

/// Width of one payload field in a binary relocation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldWidth {
    U8,
    U16,
    U32,
    I32,
    /// Pointer-sized unsigned value (`UDATA`).
    Word,
}

impl FieldWidth {
    pub const fn size(self, pointer_size: usize) -> usize {
        match self {
            FieldWidth::U8 => 1,
            FieldWidth::U16 => 2,
            FieldWidth::U32 | FieldWidth::I32 => 4,
            FieldWidth::Word => pointer_size,
        }
    }

    const fn align(self, pointer_size: usize) -> usize {
        self.size(pointer_size)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub width: FieldWidth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordLayout {
    /// `size`, `type`, `flags`, then a 4-byte pad on 64-bit targets before the payload.
    Standard,
    /// Payload starts directly after the 4-byte common header on every target.
    Compact,
    /// Tag is reserved by the compiler but has no runtime record.
    Unsupported,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocationKind {
    pub tag: u8,
    pub name: &'static str,
    pub layout: RecordLayout,
    pub fields: &'static [Field],
}

pub const ABI_VERSION: u16 = 1;

pub const FLAG_WIDE_OFFSETS: u8 = 0x80;
pub const FLAG_EIP_RELATIVE: u8 = 0x40;
pub const FLAG_MASK: u8 = FLAG_WIDE_OFFSETS | FLAG_EIP_RELATIVE;
/// Relocation-specific flag set by the compiler on HCR records that need a full pointer patch.
pub const RELO_FLAG_FULL_SIZE_RUNTIME_ASSUMPTION: u8 = 0x01;

pub const COMMON_HEADER_SIZE: usize = 4;
pub const OFFSET_SIZE: usize = 2;
pub const FIELD_SIZE: usize = 0;
pub const OFFSET_TYPE: usize = 2;
pub const OFFSET_FLAGS: usize = 3;

pub const CONSTANT_POOL: u8 = 0;
pub const HELPER_ADDRESS: u8 = 1;
pub const RELATIVE_METHOD_ADDRESS: u8 = 2;
pub const ABSOLUTE_METHOD_ADDRESS: u8 = 3;
pub const DATA_ADDRESS: u8 = 4;
pub const CLASS_OBJECT: u8 = 5;
pub const METHOD_OBJECT: u8 = 6;
pub const INTERFACE_OBJECT: u8 = 7;
pub const ABSOLUTE_HELPER_ADDRESS: u8 = 8;
pub const FIXED_SEQUENCE_ADDRESS: u8 = 9;
pub const FIXED_SEQUENCE_ADDRESS2: u8 = 10;
pub const JNI_VIRTUAL_TARGET_ADDRESS: u8 = 11;
pub const JNI_STATIC_TARGET_ADDRESS: u8 = 12;
pub const ARRAY_COPY_HELPER: u8 = 13;
pub const ARRAY_COPY_TOC: u8 = 14;
pub const BODY_INFO_ADDRESS: u8 = 15;
pub const THUNKS: u8 = 16;
pub const STATIC_RAM_METHOD_CONST: u8 = 17;
pub const TRAMPOLINES: u8 = 18;
pub const PIC_TRAMPOLINES: u8 = 19;
pub const CHECK_METHOD_ENTER: u8 = 20;
pub const RAM_METHOD: u8 = 21;
pub const RAM_METHOD_SEQUENCE: u8 = 22;
pub const RAM_METHOD_SEQUENCE_REG: u8 = 23;
pub const VERIFY_CLASS_OBJECT_FOR_ALLOC: u8 = 24;
pub const CONSTANT_POOL_ORDERED_PAIR: u8 = 25;
pub const ABSOLUTE_METHOD_ADDRESS_ORDERED_PAIR: u8 = 26;
pub const VERIFY_REF_ARRAY_FOR_ALLOC: u8 = 27;
pub const J2I_THUNKS: u8 = 28;
pub const GLOBAL_VALUE: u8 = 29;
pub const BODY_INFO_ADDRESS_LOAD: u8 = 30;
pub const VALIDATE_INSTANCE_FIELD: u8 = 31;
pub const INLINED_STATIC_METHOD_WITH_NOP_GUARD: u8 = 32;
pub const INLINED_SPECIAL_METHOD_WITH_NOP_GUARD: u8 = 33;
pub const INLINED_VIRTUAL_METHOD_WITH_NOP_GUARD: u8 = 34;
pub const INLINED_INTERFACE_METHOD_WITH_NOP_GUARD: u8 = 35;
pub const SPECIAL_RAM_METHOD_CONST: u8 = 36;
pub const INLINED_HCR_METHOD: u8 = 37;
pub const VALIDATE_STATIC_FIELD: u8 = 38;
pub const VALIDATE_CLASS: u8 = 39;
pub const CLASS_ADDRESS: u8 = 40;
pub const HCR: u8 = 41;
pub const PROFILED_METHOD_GUARD: u8 = 42;
pub const PROFILED_CLASS_GUARD: u8 = 43;
pub const HIERARCHY_GUARD: u8 = 44;
pub const ABSTRACT_GUARD: u8 = 45;
pub const PROFILED_INLINED_METHOD: u8 = 46;
pub const METHOD_POINTER: u8 = 47;
pub const CLASS_POINTER: u8 = 48;
pub const CHECK_METHOD_EXIT: u8 = 49;
pub const VALIDATE_ARBITRARY_CLASS: u8 = 50;
pub const EMIT_CLASS: u8 = 51;
pub const JNI_SPECIAL_TARGET_ADDRESS: u8 = 52;
pub const VIRTUAL_RAM_METHOD_CONST: u8 = 53;
pub const INLINED_INTERFACE_METHOD: u8 = 54;
pub const INLINED_VIRTUAL_METHOD: u8 = 55;
pub const NATIVE_METHOD_ABSOLUTE: u8 = 56;
pub const NATIVE_METHOD_RELATIVE: u8 = 57;
pub const ARBITRARY_CLASS_ADDRESS: u8 = 58;
pub const DEBUG_COUNTER: u8 = 59;
pub const CLASS_UNLOAD_ASSUMPTION: u8 = 60;
pub const J2I_VIRTUAL_THUNK_POINTER: u8 = 61;
pub const INLINED_ABSTRACT_METHOD_WITH_NOP_GUARD: u8 = 62;
pub const VALIDATE_ROOT_CLASS: u8 = 63;
pub const VALIDATE_CLASS_BY_NAME: u8 = 64;
pub const VALIDATE_PROFILED_CLASS: u8 = 65;
pub const VALIDATE_CLASS_FROM_CP: u8 = 66;
pub const VALIDATE_DEFINING_CLASS_FROM_CP: u8 = 67;
pub const VALIDATE_STATIC_CLASS_FROM_CP: u8 = 68;
pub const VALIDATE_CLASS_FROM_METHOD: u8 = 69;
pub const VALIDATE_COMPONENT_CLASS_FROM_ARRAY_CLASS: u8 = 70;
pub const VALIDATE_ARRAY_CLASS_FROM_COMPONENT_CLASS: u8 = 71;
pub const VALIDATE_SUPER_CLASS_FROM_CLASS: u8 = 72;
pub const VALIDATE_CLASS_INSTANCE_OF_CLASS: u8 = 73;
pub const VALIDATE_SYSTEM_CLASS_BY_NAME: u8 = 74;
pub const VALIDATE_CLASS_FROM_ITABLE_INDEX_CP: u8 = 75;
pub const VALIDATE_DECLARING_CLASS_FROM_FIELD_OR_STATIC: u8 = 76;
pub const VALIDATE_CLASS_CLASS: u8 = 77;
pub const VALIDATE_CONCRETE_SUB_CLASS_FROM_CLASS: u8 = 78;
pub const VALIDATE_CLASS_CHAIN: u8 = 79;
pub const VALIDATE_ROM_CLASS: u8 = 80;
pub const VALIDATE_PRIMITIVE_CLASS: u8 = 81;
pub const VALIDATE_METHOD_FROM_INLINED_SITE: u8 = 82;
pub const VALIDATE_METHOD_BY_NAME: u8 = 83;
pub const VALIDATE_METHOD_FROM_CLASS: u8 = 84;
pub const VALIDATE_STATIC_METHOD_FROM_CP: u8 = 85;
pub const VALIDATE_SPECIAL_METHOD_FROM_CP: u8 = 86;
pub const VALIDATE_VIRTUAL_METHOD_FROM_CP: u8 = 87;
pub const VALIDATE_VIRTUAL_METHOD_FROM_OFFSET: u8 = 88;
pub const VALIDATE_INTERFACE_METHOD_FROM_CP: u8 = 89;
pub const VALIDATE_METHOD_FROM_CLASS_AND_SIG: u8 = 90;
pub const VALIDATE_STACK_WALKER_MAY_SKIP_FRAMES: u8 = 91;
pub const VALIDATE_ARRAY_CLASS_FROM_JAVA_VM: u8 = 92;
pub const VALIDATE_CLASS_INFO_IS_INITIALIZED: u8 = 93;
pub const VALIDATE_METHOD_FROM_SINGLE_IMPLEMENTER: u8 = 94;
pub const VALIDATE_METHOD_FROM_SINGLE_INTERFACE_IMPLEMENTER: u8 = 95;
pub const VALIDATE_METHOD_FROM_SINGLE_ABSTRACT_IMPLEMENTER: u8 = 96;
pub const VALIDATE_IMPROPER_INTERFACE_METHOD_FROM_CP: u8 = 97;
pub const SYMBOL_FROM_MANAGER: u8 = 98;

pub const KIND_COUNT: usize = 99;

const fn word(name: &'static str) -> Field {
    Field {
        name,
        width: FieldWidth::Word,
    }
}

const fn u8_field(name: &'static str) -> Field {
    Field {
        name,
        width: FieldWidth::U8,
    }
}

const fn u16_field(name: &'static str) -> Field {
    Field {
        name,
        width: FieldWidth::U16,
    }
}

const fn u32_field(name: &'static str) -> Field {
    Field {
        name,
        width: FieldWidth::U32,
    }
}

const fn i32_field(name: &'static str) -> Field {
    Field {
        name,
        width: FieldWidth::I32,
    }
}

const SITE: Field = word("inlined_site_index");
const CP: Field = word("constant_pool");
const CP_INDEX: Field = word("cp_index");
const LOADER_CHAIN: Field = word("loader_chain_offset");
const CLASS_CHAIN: Field = word("class_chain_offset");

const NO_FIELDS: &[Field] = &[];
const HELPER_FIELDS: &[Field] = &[u32_field("helper_id")];
const PIC_TRAMPOLINE_FIELDS: &[Field] = &[u32_field("num_trampolines")];
const OFFSET_FIELDS: &[Field] = &[word("offset")];
const DESTINATION_FIELDS: &[Field] = &[word("destination_address")];
const CONSTANT_POOL_FIELDS: &[Field] = &[SITE, CP];
const CP_WITH_INDEX_FIELDS: &[Field] = &[SITE, CP, CP_INDEX];
const DATA_ADDRESS_FIELDS: &[Field] = &[SITE, CP, CP_INDEX, word("offset")];
const REF_ARRAY_ALLOC_FIELDS: &[Field] = &[SITE, CP, CP_INDEX, word("branch_offset")];
const CLASS_OBJECT_ALLOC_FIELDS: &[Field] = &[
    SITE,
    CP,
    CP_INDEX,
    word("branch_offset"),
    word("allocation_size"),
];
const INLINED_METHOD_FIELDS: &[Field] = &[SITE, CP, CP_INDEX, word("rom_class_offset")];
const NOP_GUARD_FIELDS: &[Field] = &[
    SITE,
    CP,
    CP_INDEX,
    word("rom_class_offset"),
    word("destination_address"),
];
const PROFILED_FIELDS: &[Field] = &[
    SITE,
    CP,
    CP_INDEX,
    word("rom_class_offset"),
    LOADER_CHAIN,
    CLASS_CHAIN,
    word("vtable_slot"),
];
const VALIDATE_CLASS_FIELDS: &[Field] = &[SITE, CP, CP_INDEX, CLASS_CHAIN];
const VALIDATE_STATIC_FIELD_FIELDS: &[Field] = &[SITE, CP, CP_INDEX, word("rom_class_offset")];
const ARBITRARY_CLASS_FIELDS: &[Field] = &[LOADER_CHAIN, CLASS_CHAIN];
const POINTER_FIELDS: &[Field] = &[SITE, LOADER_CHAIN, CLASS_CHAIN];
const METHOD_POINTER_FIELDS: &[Field] = &[SITE, LOADER_CHAIN, CLASS_CHAIN, word("vtable_slot")];
const EMIT_CLASS_FIELDS: &[Field] = &[SITE, i32_field("bc_index")];
const DEBUG_COUNTER_FIELDS: &[Field] = &[
    SITE,
    word("bc_index"),
    word("name_offset"),
    word("delta"),
    word("fidelity"),
    word("static_delta"),
];
const J2I_VIRTUAL_THUNK_FIELDS: &[Field] = &[SITE, CP, word("offset_to_thunk_pointer")];

const ROOT_CLASS_FIELDS: &[Field] = &[u16_field("class_id")];
const CLASS_BY_NAME_FIELDS: &[Field] = &[
    u16_field("class_id"),
    u16_field("beholder_id"),
    CLASS_CHAIN,
];
const PROFILED_CLASS_FIELDS: &[Field] = &[
    u16_field("class_id"),
    u8_field("primitive_type"),
    LOADER_CHAIN,
    CLASS_CHAIN,
];
const CLASS_FROM_CP_FIELDS: &[Field] = &[
    u16_field("class_id"),
    u16_field("beholder_id"),
    u32_field("cp_index"),
];
const DEFINING_CLASS_FROM_CP_FIELDS: &[Field] = &[
    u8_field("is_static"),
    u16_field("class_id"),
    u16_field("beholder_id"),
    u32_field("cp_index"),
];
const CLASS_FROM_METHOD_FIELDS: &[Field] = &[u16_field("class_id"), u16_field("method_id")];
const COMPONENT_FROM_ARRAY_FIELDS: &[Field] = &[
    u16_field("component_class_id"),
    u16_field("array_class_id"),
];
const ARRAY_FROM_COMPONENT_FIELDS: &[Field] = &[
    u16_field("array_class_id"),
    u16_field("component_class_id"),
];
const SUPER_CLASS_FIELDS: &[Field] = &[u16_field("super_class_id"), u16_field("child_class_id")];
const INSTANCE_OF_FIELDS: &[Field] = &[
    u8_field("object_type_is_fixed"),
    u8_field("cast_type_is_fixed"),
    u8_field("is_instance_of"),
    u16_field("class_one_id"),
    u16_field("class_two_id"),
];
const SYSTEM_CLASS_FIELDS: &[Field] = &[u16_field("system_class_id"), CLASS_CHAIN];
const CLASS_CLASS_FIELDS: &[Field] = &[
    u16_field("class_class_id"),
    u16_field("object_class_id"),
];
const CONCRETE_SUB_CLASS_FIELDS: &[Field] = &[
    u16_field("child_class_id"),
    u16_field("super_class_id"),
];
const CLASS_CHAIN_FIELDS: &[Field] = &[u16_field("class_id"), CLASS_CHAIN];
const ROM_CLASS_FIELDS: &[Field] = &[u16_field("class_id"), word("rom_class_offset")];
const PRIMITIVE_CLASS_FIELDS: &[Field] = &[u16_field("class_id"), u8_field("primitive_type")];
const METHOD_FROM_SITE_FIELDS: &[Field] = &[
    u16_field("method_id"),
    i32_field("inlined_site_index"),
];
const METHOD_BY_NAME_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("beholder_id"),
    word("rom_class_offset"),
    word("rom_method_offset"),
];
const METHOD_FROM_CLASS_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("beholder_id"),
    u32_field("index"),
];
const METHOD_FROM_CP_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("beholder_id"),
    u32_field("cp_index"),
];
const METHOD_FROM_OFFSET_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("beholder_id"),
    i32_field("virtual_call_offset"),
    u8_field("ignore_rt_resolve"),
];
const INTERFACE_METHOD_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("beholder_id"),
    u16_field("lookup_id"),
    u32_field("cp_index"),
];
const METHOD_FROM_CLASS_AND_SIG_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("method_class_id"),
    u16_field("beholder_id"),
    word("rom_method_offset"),
];
const STACK_WALKER_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("method_class_id"),
    u8_field("skip_frames"),
];
const ARRAY_FROM_VM_FIELDS: &[Field] = &[
    u16_field("array_class_id"),
    i32_field("array_class_index"),
];
const CLASS_INITIALIZED_FIELDS: &[Field] = &[u16_field("class_id"), u8_field("is_initialized")];
const SINGLE_IMPLEMENTER_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("this_class_id"),
    i32_field("cp_index_or_vft_slot"),
    u16_field("caller_method_id"),
    u16_field("use_resolved_interface_method"),
];
const SINGLE_INTERFACE_IMPLEMENTER_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("this_class_id"),
    i32_field("cp_index"),
    u16_field("caller_method_id"),
];
const SINGLE_ABSTRACT_IMPLEMENTER_FIELDS: &[Field] = &[
    u16_field("method_id"),
    u16_field("this_class_id"),
    i32_field("vft_slot"),
    u16_field("caller_method_id"),
];
const SYMBOL_FROM_MANAGER_FIELDS: &[Field] = &[u16_field("symbol_id"), u16_field("symbol_type")];

const fn kind(tag: u8, name: &'static str, fields: &'static [Field]) -> RelocationKind {
    RelocationKind {
        tag,
        name,
        layout: RecordLayout::Standard,
        fields,
    }
}

const fn compact(tag: u8, name: &'static str, fields: &'static [Field]) -> RelocationKind {
    RelocationKind {
        tag,
        name,
        layout: RecordLayout::Compact,
        fields,
    }
}

const fn reserved(tag: u8, name: &'static str) -> RelocationKind {
    RelocationKind {
        tag,
        name,
        layout: RecordLayout::Unsupported,
        fields: NO_FIELDS,
    }
}

pub const KINDS: [RelocationKind; KIND_COUNT] = [
    kind(CONSTANT_POOL, "ConstantPool", CONSTANT_POOL_FIELDS),
    compact(HELPER_ADDRESS, "HelperAddress", HELPER_FIELDS),
    kind(RELATIVE_METHOD_ADDRESS, "RelativeMethodAddress", NO_FIELDS),
    kind(ABSOLUTE_METHOD_ADDRESS, "AbsoluteMethodAddress", NO_FIELDS),
    kind(DATA_ADDRESS, "DataAddress", DATA_ADDRESS_FIELDS),
    kind(CLASS_OBJECT, "ClassObject", CP_WITH_INDEX_FIELDS),
    kind(METHOD_OBJECT, "MethodObject", CONSTANT_POOL_FIELDS),
    reserved(INTERFACE_OBJECT, "InterfaceObject"),
    compact(ABSOLUTE_HELPER_ADDRESS, "AbsoluteHelperAddress", HELPER_FIELDS),
    kind(FIXED_SEQUENCE_ADDRESS, "FixedSequenceAddress", OFFSET_FIELDS),
    kind(FIXED_SEQUENCE_ADDRESS2, "FixedSequenceAddress2", OFFSET_FIELDS),
    kind(
        JNI_VIRTUAL_TARGET_ADDRESS,
        "JNIVirtualTargetAddress",
        CP_WITH_INDEX_FIELDS,
    ),
    kind(
        JNI_STATIC_TARGET_ADDRESS,
        "JNIStaticTargetAddress",
        CP_WITH_INDEX_FIELDS,
    ),
    kind(ARRAY_COPY_HELPER, "ArrayCopyHelper", NO_FIELDS),
    kind(ARRAY_COPY_TOC, "ArrayCopyToc", NO_FIELDS),
    kind(BODY_INFO_ADDRESS, "BodyInfoAddress", NO_FIELDS),
    kind(THUNKS, "Thunks", CONSTANT_POOL_FIELDS),
    kind(
        STATIC_RAM_METHOD_CONST,
        "StaticRamMethodConst",
        CP_WITH_INDEX_FIELDS,
    ),
    kind(TRAMPOLINES, "Trampolines", CONSTANT_POOL_FIELDS),
    compact(PIC_TRAMPOLINES, "PicTrampolines", PIC_TRAMPOLINE_FIELDS),
    kind(CHECK_METHOD_ENTER, "CheckMethodEnter", DESTINATION_FIELDS),
    kind(RAM_METHOD, "RamMethod", NO_FIELDS),
    kind(RAM_METHOD_SEQUENCE, "RamMethodSequence", OFFSET_FIELDS),
    kind(RAM_METHOD_SEQUENCE_REG, "RamMethodSequenceReg", OFFSET_FIELDS),
    kind(
        VERIFY_CLASS_OBJECT_FOR_ALLOC,
        "VerifyClassObjectForAlloc",
        CLASS_OBJECT_ALLOC_FIELDS,
    ),
    kind(
        CONSTANT_POOL_ORDERED_PAIR,
        "ConstantPoolOrderedPair",
        CONSTANT_POOL_FIELDS,
    ),
    kind(
        ABSOLUTE_METHOD_ADDRESS_ORDERED_PAIR,
        "AbsoluteMethodAddressOrderedPair",
        NO_FIELDS,
    ),
    kind(
        VERIFY_REF_ARRAY_FOR_ALLOC,
        "VerifyRefArrayForAlloc",
        REF_ARRAY_ALLOC_FIELDS,
    ),
    kind(J2I_THUNKS, "J2IThunks", CONSTANT_POOL_FIELDS),
    kind(GLOBAL_VALUE, "GlobalValue", OFFSET_FIELDS),
    kind(BODY_INFO_ADDRESS_LOAD, "BodyInfoAddressLoad", OFFSET_FIELDS),
    kind(
        VALIDATE_INSTANCE_FIELD,
        "ValidateInstanceField",
        VALIDATE_CLASS_FIELDS,
    ),
    kind(
        INLINED_STATIC_METHOD_WITH_NOP_GUARD,
        "InlinedStaticMethodWithNopGuard",
        NOP_GUARD_FIELDS,
    ),
    kind(
        INLINED_SPECIAL_METHOD_WITH_NOP_GUARD,
        "InlinedSpecialMethodWithNopGuard",
        NOP_GUARD_FIELDS,
    ),
    kind(
        INLINED_VIRTUAL_METHOD_WITH_NOP_GUARD,
        "InlinedVirtualMethodWithNopGuard",
        NOP_GUARD_FIELDS,
    ),
    kind(
        INLINED_INTERFACE_METHOD_WITH_NOP_GUARD,
        "InlinedInterfaceMethodWithNopGuard",
        NOP_GUARD_FIELDS,
    ),
    kind(
        SPECIAL_RAM_METHOD_CONST,
        "SpecialRamMethodConst",
        CP_WITH_INDEX_FIELDS,
    ),
    kind(INLINED_HCR_METHOD, "InlinedHCRMethod", NOP_GUARD_FIELDS),
    kind(
        VALIDATE_STATIC_FIELD,
        "ValidateStaticField",
        VALIDATE_STATIC_FIELD_FIELDS,
    ),
    kind(VALIDATE_CLASS, "ValidateClass", VALIDATE_CLASS_FIELDS),
    kind(CLASS_ADDRESS, "ClassAddress", CP_WITH_INDEX_FIELDS),
    kind(HCR, "HCR", OFFSET_FIELDS),
    kind(PROFILED_METHOD_GUARD, "ProfiledMethodGuard", PROFILED_FIELDS),
    kind(PROFILED_CLASS_GUARD, "ProfiledClassGuard", PROFILED_FIELDS),
    reserved(HIERARCHY_GUARD, "HierarchyGuard"),
    reserved(ABSTRACT_GUARD, "AbstractGuard"),
    kind(PROFILED_INLINED_METHOD, "ProfiledInlinedMethod", PROFILED_FIELDS),
    kind(METHOD_POINTER, "MethodPointer", METHOD_POINTER_FIELDS),
    kind(CLASS_POINTER, "ClassPointer", POINTER_FIELDS),
    kind(CHECK_METHOD_EXIT, "CheckMethodExit", DESTINATION_FIELDS),
    kind(
        VALIDATE_ARBITRARY_CLASS,
        "ValidateArbitraryClass",
        ARBITRARY_CLASS_FIELDS,
    ),
    kind(EMIT_CLASS, "EmitClass", EMIT_CLASS_FIELDS),
    kind(
        JNI_SPECIAL_TARGET_ADDRESS,
        "JNISpecialTargetAddress",
        CP_WITH_INDEX_FIELDS,
    ),
    kind(
        VIRTUAL_RAM_METHOD_CONST,
        "VirtualRamMethodConst",
        CP_WITH_INDEX_FIELDS,
    ),
    kind(
        INLINED_INTERFACE_METHOD,
        "InlinedInterfaceMethod",
        INLINED_METHOD_FIELDS,
    ),
    kind(
        INLINED_VIRTUAL_METHOD,
        "InlinedVirtualMethod",
        INLINED_METHOD_FIELDS,
    ),
    reserved(NATIVE_METHOD_ABSOLUTE, "NativeMethodAbsolute"),
    reserved(NATIVE_METHOD_RELATIVE, "NativeMethodRelative"),
    kind(ARBITRARY_CLASS_ADDRESS, "ArbitraryClassAddress", POINTER_FIELDS),
    kind(DEBUG_COUNTER, "DebugCounter", DEBUG_COUNTER_FIELDS),
    kind(CLASS_UNLOAD_ASSUMPTION, "ClassUnloadAssumption", NO_FIELDS),
    kind(
        J2I_VIRTUAL_THUNK_POINTER,
        "J2IVirtualThunkPointer",
        J2I_VIRTUAL_THUNK_FIELDS,
    ),
    kind(
        INLINED_ABSTRACT_METHOD_WITH_NOP_GUARD,
        "InlinedAbstractMethodWithNopGuard",
        NOP_GUARD_FIELDS,
    ),
    kind(VALIDATE_ROOT_CLASS, "ValidateRootClass", ROOT_CLASS_FIELDS),
    kind(
        VALIDATE_CLASS_BY_NAME,
        "ValidateClassByName",
        CLASS_BY_NAME_FIELDS,
    ),
    kind(
        VALIDATE_PROFILED_CLASS,
        "ValidateProfiledClass",
        PROFILED_CLASS_FIELDS,
    ),
    kind(
        VALIDATE_CLASS_FROM_CP,
        "ValidateClassFromCP",
        CLASS_FROM_CP_FIELDS,
    ),
    kind(
        VALIDATE_DEFINING_CLASS_FROM_CP,
        "ValidateDefiningClassFromCP",
        DEFINING_CLASS_FROM_CP_FIELDS,
    ),
    kind(
        VALIDATE_STATIC_CLASS_FROM_CP,
        "ValidateStaticClassFromCP",
        CLASS_FROM_CP_FIELDS,
    ),
    kind(
        VALIDATE_CLASS_FROM_METHOD,
        "ValidateClassFromMethod",
        CLASS_FROM_METHOD_FIELDS,
    ),
    kind(
        VALIDATE_COMPONENT_CLASS_FROM_ARRAY_CLASS,
        "ValidateComponentClassFromArrayClass",
        COMPONENT_FROM_ARRAY_FIELDS,
    ),
    kind(
        VALIDATE_ARRAY_CLASS_FROM_COMPONENT_CLASS,
        "ValidateArrayClassFromComponentClass",
        ARRAY_FROM_COMPONENT_FIELDS,
    ),
    kind(
        VALIDATE_SUPER_CLASS_FROM_CLASS,
        "ValidateSuperClassFromClass",
        SUPER_CLASS_FIELDS,
    ),
    kind(
        VALIDATE_CLASS_INSTANCE_OF_CLASS,
        "ValidateClassInstanceOfClass",
        INSTANCE_OF_FIELDS,
    ),
    kind(
        VALIDATE_SYSTEM_CLASS_BY_NAME,
        "ValidateSystemClassByName",
        SYSTEM_CLASS_FIELDS,
    ),
    kind(
        VALIDATE_CLASS_FROM_ITABLE_INDEX_CP,
        "ValidateClassFromITableIndexCP",
        CLASS_FROM_CP_FIELDS,
    ),
    kind(
        VALIDATE_DECLARING_CLASS_FROM_FIELD_OR_STATIC,
        "ValidateDeclaringClassFromFieldOrStatic",
        CLASS_FROM_CP_FIELDS,
    ),
    kind(VALIDATE_CLASS_CLASS, "ValidateClassClass", CLASS_CLASS_FIELDS),
    kind(
        VALIDATE_CONCRETE_SUB_CLASS_FROM_CLASS,
        "ValidateConcreteSubClassFromClass",
        CONCRETE_SUB_CLASS_FIELDS,
    ),
    kind(VALIDATE_CLASS_CHAIN, "ValidateClassChain", CLASS_CHAIN_FIELDS),
    kind(VALIDATE_ROM_CLASS, "ValidateRomClass", ROM_CLASS_FIELDS),
    kind(
        VALIDATE_PRIMITIVE_CLASS,
        "ValidatePrimitiveClass",
        PRIMITIVE_CLASS_FIELDS,
    ),
    kind(
        VALIDATE_METHOD_FROM_INLINED_SITE,
        "ValidateMethodFromInlinedSite",
        METHOD_FROM_SITE_FIELDS,
    ),
    kind(
        VALIDATE_METHOD_BY_NAME,
        "ValidateMethodByName",
        METHOD_BY_NAME_FIELDS,
    ),
    kind(
        VALIDATE_METHOD_FROM_CLASS,
        "ValidateMethodFromClass",
        METHOD_FROM_CLASS_FIELDS,
    ),
    kind(
        VALIDATE_STATIC_METHOD_FROM_CP,
        "ValidateStaticMethodFromCP",
        METHOD_FROM_CP_FIELDS,
    ),
    kind(
        VALIDATE_SPECIAL_METHOD_FROM_CP,
        "ValidateSpecialMethodFromCP",
        METHOD_FROM_CP_FIELDS,
    ),
    kind(
        VALIDATE_VIRTUAL_METHOD_FROM_CP,
        "ValidateVirtualMethodFromCP",
        METHOD_FROM_CP_FIELDS,
    ),
    kind(
        VALIDATE_VIRTUAL_METHOD_FROM_OFFSET,
        "ValidateVirtualMethodFromOffset",
        METHOD_FROM_OFFSET_FIELDS,
    ),
    kind(
        VALIDATE_INTERFACE_METHOD_FROM_CP,
        "ValidateInterfaceMethodFromCP",
        INTERFACE_METHOD_FIELDS,
    ),
    kind(
        VALIDATE_METHOD_FROM_CLASS_AND_SIG,
        "ValidateMethodFromClassAndSig",
        METHOD_FROM_CLASS_AND_SIG_FIELDS,
    ),
    kind(
        VALIDATE_STACK_WALKER_MAY_SKIP_FRAMES,
        "ValidateStackWalkerMaySkipFrames",
        STACK_WALKER_FIELDS,
    ),
    kind(
        VALIDATE_ARRAY_CLASS_FROM_JAVA_VM,
        "ValidateArrayClassFromJavaVM",
        ARRAY_FROM_VM_FIELDS,
    ),
    kind(
        VALIDATE_CLASS_INFO_IS_INITIALIZED,
        "ValidateClassInfoIsInitialized",
        CLASS_INITIALIZED_FIELDS,
    ),
    kind(
        VALIDATE_METHOD_FROM_SINGLE_IMPLEMENTER,
        "ValidateMethodFromSingleImplementer",
        SINGLE_IMPLEMENTER_FIELDS,
    ),
    kind(
        VALIDATE_METHOD_FROM_SINGLE_INTERFACE_IMPLEMENTER,
        "ValidateMethodFromSingleInterfaceImplementer",
        SINGLE_INTERFACE_IMPLEMENTER_FIELDS,
    ),
    kind(
        VALIDATE_METHOD_FROM_SINGLE_ABSTRACT_IMPLEMENTER,
        "ValidateMethodFromSingleAbstractImplementer",
        SINGLE_ABSTRACT_IMPLEMENTER_FIELDS,
    ),
    kind(
        VALIDATE_IMPROPER_INTERFACE_METHOD_FROM_CP,
        "ValidateImproperInterfaceMethodFromCP",
        METHOD_FROM_CP_FIELDS,
    ),
    kind(
        SYMBOL_FROM_MANAGER,
        "SymbolFromManager",
        SYMBOL_FROM_MANAGER_FIELDS,
    ),
];

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

impl RelocationKind {
    pub fn is_supported(&self) -> bool {
        self.layout != RecordLayout::Unsupported
    }

    /// Bytes before the first payload field.
    pub fn header_size(&self, pointer_size: usize) -> Option<usize> {
        match self.layout {
            RecordLayout::Standard if pointer_size == 8 => Some(COMMON_HEADER_SIZE + 4),
            RecordLayout::Standard | RecordLayout::Compact => Some(COMMON_HEADER_SIZE),
            RecordLayout::Unsupported => None,
        }
    }

    pub fn field_offset(&self, index: usize, pointer_size: usize) -> Option<usize> {
        let mut cursor = self.header_size(pointer_size)?;
        for (position, field) in self.fields.iter().enumerate() {
            cursor = align_up(cursor, field.width.align(pointer_size));
            if position == index {
                return Some(cursor);
            }
            cursor += field.width.size(pointer_size);
        }
        None
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Size of header plus payload; the trailing offset list starts here.
    pub fn size_in_bytes(&self, pointer_size: usize) -> Option<usize> {
        let header = self.header_size(pointer_size)?;
        let mut align = match self.layout {
            RecordLayout::Standard if pointer_size == 8 => 4,
            _ => 2,
        };
        let mut cursor = header;
        for field in self.fields {
            let field_align = field.width.align(pointer_size);
            align = align.max(field_align);
            cursor = align_up(cursor, field_align) + field.width.size(pointer_size);
        }
        Some(align_up(cursor, align))
    }
}

fn kinds_by_name() -> &'static HashMap<&'static str, &'static RelocationKind> {
    static MAP: OnceLock<HashMap<&'static str, &'static RelocationKind>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut map = HashMap::with_capacity(KINDS.len());
        for kind in KINDS.iter() {
            map.insert(kind.name, kind);
        }
        map
    })
}

pub fn kind_by_tag(tag: u8) -> Option<&'static RelocationKind> {
    KINDS.get(tag as usize)
}

pub fn kind_by_name(name: &str) -> Option<&'static RelocationKind> {
    kinds_by_name().get(name).copied()
}

/// `bytesInHeaderAndPayload` for a tag, `None` for unknown or reserved tags.
pub fn header_size_for_tag(tag: u8, pointer_size: usize) -> Option<usize> {
    kind_by_tag(tag).and_then(|kind| kind.size_in_bytes(pointer_size))
}

pub fn is_ordered_pair_kind(tag: u8) -> bool {
    tag == CONSTANT_POOL_ORDERED_PAIR || tag == ABSOLUTE_METHOD_ADDRESS_ORDERED_PAIR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_dense_and_ordered() {
        for (position, kind) in KINDS.iter().enumerate() {
            assert_eq!(kind.tag as usize, position);
        }
        assert_eq!(SYMBOL_FROM_MANAGER as usize + 1, KINDS.len());
    }

    #[test]
    fn names_are_unique() {
        assert_eq!(kinds_by_name().len(), KINDS.len());
        assert_eq!(
            kind_by_name("ValidateClassByName").map(|kind| kind.tag),
            Some(VALIDATE_CLASS_BY_NAME)
        );
    }

    #[test]
    fn sizes_match_sixty_four_bit_templates() {
        let expected = [
            (CONSTANT_POOL, 24),
            (HELPER_ADDRESS, 8),
            (RAM_METHOD, 8),
            (DATA_ADDRESS, 40),
            (CLASS_ADDRESS, 32),
            (PIC_TRAMPOLINES, 8),
            (CHECK_METHOD_ENTER, 16),
            (VERIFY_CLASS_OBJECT_FOR_ALLOC, 48),
            (VERIFY_REF_ARRAY_FOR_ALLOC, 40),
            (INLINED_STATIC_METHOD_WITH_NOP_GUARD, 48),
            (INLINED_VIRTUAL_METHOD, 40),
            (VALIDATE_CLASS, 40),
            (HCR, 16),
            (PROFILED_CLASS_GUARD, 64),
            (METHOD_POINTER, 40),
            (CLASS_POINTER, 32),
            (VALIDATE_ARBITRARY_CLASS, 24),
            (EMIT_CLASS, 24),
            (DEBUG_COUNTER, 56),
            (CLASS_UNLOAD_ASSUMPTION, 8),
            (J2I_VIRTUAL_THUNK_POINTER, 32),
            (VALIDATE_CLASS_BY_NAME, 24),
        ];
        for (tag, size) in expected {
            assert_eq!(header_size_for_tag(tag, 8), Some(size), "tag {tag}");
        }
    }

    #[test]
    fn sizes_match_thirty_two_bit_templates() {
        assert_eq!(header_size_for_tag(CONSTANT_POOL, 4), Some(12));
        assert_eq!(header_size_for_tag(HELPER_ADDRESS, 4), Some(8));
        assert_eq!(header_size_for_tag(DATA_ADDRESS, 4), Some(20));
        assert_eq!(header_size_for_tag(EMIT_CLASS, 4), Some(12));
        assert_eq!(header_size_for_tag(RAM_METHOD, 4), Some(4));
    }

    #[test]
    fn payload_follows_padded_header() {
        let cp = kind_by_tag(CONSTANT_POOL).expect("constant pool kind");
        assert_eq!(cp.field_offset(0, 8), Some(8));
        assert_eq!(cp.field_offset(1, 8), Some(16));
        assert_eq!(cp.field_offset(1, 4), Some(8));

        let helper = kind_by_tag(HELPER_ADDRESS).expect("helper kind");
        assert_eq!(helper.field_offset(0, 8), Some(4));

        let by_name = kind_by_tag(VALIDATE_CLASS_BY_NAME).expect("class by name kind");
        assert_eq!(by_name.field_offset(1, 8), Some(10));
        assert_eq!(by_name.field_offset(2, 8), Some(16));
    }

    #[test]
    fn reserved_tags_have_no_size() {
        for tag in [
            INTERFACE_OBJECT,
            HIERARCHY_GUARD,
            ABSTRACT_GUARD,
            NATIVE_METHOD_ABSOLUTE,
            NATIVE_METHOD_RELATIVE,
        ] {
            assert_eq!(header_size_for_tag(tag, 8), None);
        }
        assert_eq!(header_size_for_tag(99, 8), None);
    }
}
