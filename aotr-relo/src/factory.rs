use relo_abi as abi;

use crate::error::{ReloFailure, ReloResult};
use crate::record::address::{
    ConstantPool, DataAddress, DirectJni, FixedAddress, FixedValue, HelperAddress, MethodAddress,
    MethodObject, RamMethodConst,
};
use crate::record::class::{
    AllocationKind, AllocationVerify, ClassObject, ClassSource, ValidateArbitraryClass,
    ValidateClass, ValidateStaticField,
};
use crate::record::counter::DebugCounter;
use crate::record::guard::{ClassUnloadAssumption, EmitClass, Hcr, MethodTracingCheck, TracingEvent};
use crate::record::inlined::{InlinedKind, InlinedMethod, ProfiledInlined};
use crate::record::pointer::{ClassPointer, PointerKind};
use crate::record::reservation::{PicTrampolines, ThunkKind, Thunks, Trampolines};
use crate::record::symbol::{SymbolFromManager, SymbolValidation};
use crate::record::{Location, RecordAction, RecordBehavior};
use crate::runtime::{MethodLookup, RelocationRuntime};
use crate::target::CodeBuffer;
use crate::wire::RecordView;

/// Typed behavior for one record, chosen from its wire tag.
#[derive(Debug)]
pub enum Relocation {
    ConstantPool(ConstantPool),
    MethodObject(MethodObject),
    HelperAddress(HelperAddress),
    MethodAddress(MethodAddress),
    DataAddress(DataAddress),
    DirectJni(DirectJni),
    RamMethodConst(RamMethodConst),
    FixedAddress(FixedAddress),
    ClassObject(ClassObject),
    ValidateClass(ValidateClass),
    ValidateStaticField(ValidateStaticField),
    ValidateArbitraryClass(ValidateArbitraryClass),
    AllocationVerify(AllocationVerify),
    InlinedMethod(InlinedMethod),
    ProfiledInlined(ProfiledInlined),
    ClassPointer(ClassPointer),
    Thunks(Thunks),
    Trampolines(Trampolines),
    PicTrampolines(PicTrampolines),
    MethodTracingCheck(MethodTracingCheck),
    Hcr(Hcr),
    ClassUnloadAssumption(ClassUnloadAssumption),
    EmitClass(EmitClass),
    DebugCounter(DebugCounter),
    SymbolValidation(SymbolValidation),
    SymbolFromManager(SymbolFromManager),
}

impl Relocation {
    /// Picks the behavior for a wire tag. Reserved and unknown tags mean the cached body was
    /// produced by an incompatible compiler.
    pub fn for_tag(tag: u8) -> ReloResult<Self> {
        let relocation = match tag {
            abi::CONSTANT_POOL | abi::CONSTANT_POOL_ORDERED_PAIR => {
                Relocation::ConstantPool(ConstantPool::default())
            }
            abi::HELPER_ADDRESS => Relocation::HelperAddress(HelperAddress::relative()),
            abi::ABSOLUTE_HELPER_ADDRESS => Relocation::HelperAddress(HelperAddress::absolute()),
            abi::RELATIVE_METHOD_ADDRESS
            | abi::ABSOLUTE_METHOD_ADDRESS
            | abi::ABSOLUTE_METHOD_ADDRESS_ORDERED_PAIR => {
                Relocation::MethodAddress(MethodAddress)
            }
            abi::DATA_ADDRESS => Relocation::DataAddress(DataAddress::default()),
            abi::CLASS_OBJECT | abi::CLASS_ADDRESS => Relocation::ClassObject(ClassObject::default()),
            abi::METHOD_OBJECT => Relocation::MethodObject(MethodObject::default()),
            abi::FIXED_SEQUENCE_ADDRESS | abi::FIXED_SEQUENCE_ADDRESS2 => {
                Relocation::FixedAddress(FixedAddress::sequence(FixedValue::CodeOffset))
            }
            abi::JNI_VIRTUAL_TARGET_ADDRESS => {
                Relocation::DirectJni(DirectJni::new(MethodLookup::Virtual))
            }
            abi::JNI_STATIC_TARGET_ADDRESS => {
                Relocation::DirectJni(DirectJni::new(MethodLookup::Static))
            }
            abi::JNI_SPECIAL_TARGET_ADDRESS => {
                Relocation::DirectJni(DirectJni::new(MethodLookup::Special))
            }
            abi::ARRAY_COPY_HELPER => {
                Relocation::FixedAddress(FixedAddress::sequence(FixedValue::ArrayCopyHelper))
            }
            abi::ARRAY_COPY_TOC => {
                Relocation::FixedAddress(FixedAddress::sequence(FixedValue::ArrayCopyToc))
            }
            abi::BODY_INFO_ADDRESS => {
                Relocation::FixedAddress(FixedAddress::pointer(FixedValue::BodyInfo))
            }
            abi::BODY_INFO_ADDRESS_LOAD => {
                Relocation::FixedAddress(FixedAddress::sequence(FixedValue::BodyInfo))
            }
            abi::GLOBAL_VALUE => {
                Relocation::FixedAddress(FixedAddress::sequence(FixedValue::GlobalValue))
            }
            abi::RAM_METHOD => Relocation::FixedAddress(FixedAddress::pointer(FixedValue::RamMethod)),
            abi::RAM_METHOD_SEQUENCE | abi::RAM_METHOD_SEQUENCE_REG => {
                Relocation::FixedAddress(FixedAddress::sequence(FixedValue::RamMethod))
            }
            abi::THUNKS | abi::J2I_THUNKS => Relocation::Thunks(Thunks::new(ThunkKind::Call)),
            abi::J2I_VIRTUAL_THUNK_POINTER => {
                Relocation::Thunks(Thunks::new(ThunkKind::VirtualPointer))
            }
            abi::STATIC_RAM_METHOD_CONST => {
                Relocation::RamMethodConst(RamMethodConst::new(MethodLookup::Static))
            }
            abi::SPECIAL_RAM_METHOD_CONST => {
                Relocation::RamMethodConst(RamMethodConst::new(MethodLookup::Special))
            }
            abi::VIRTUAL_RAM_METHOD_CONST => {
                Relocation::RamMethodConst(RamMethodConst::new(MethodLookup::Virtual))
            }
            abi::TRAMPOLINES => Relocation::Trampolines(Trampolines::default()),
            abi::PIC_TRAMPOLINES => Relocation::PicTrampolines(PicTrampolines),
            abi::CHECK_METHOD_ENTER => {
                Relocation::MethodTracingCheck(MethodTracingCheck::new(TracingEvent::Enter))
            }
            abi::CHECK_METHOD_EXIT => {
                Relocation::MethodTracingCheck(MethodTracingCheck::new(TracingEvent::Exit))
            }
            abi::VERIFY_CLASS_OBJECT_FOR_ALLOC => {
                Relocation::AllocationVerify(AllocationVerify::new(AllocationKind::Object))
            }
            abi::VERIFY_REF_ARRAY_FOR_ALLOC => {
                Relocation::AllocationVerify(AllocationVerify::new(AllocationKind::RefArray))
            }
            abi::VALIDATE_CLASS => {
                Relocation::ValidateClass(ValidateClass::new(ClassSource::ClassRef))
            }
            abi::VALIDATE_INSTANCE_FIELD => {
                Relocation::ValidateClass(ValidateClass::new(ClassSource::InstanceField))
            }
            abi::VALIDATE_STATIC_FIELD => Relocation::ValidateStaticField(ValidateStaticField),
            abi::VALIDATE_ARBITRARY_CLASS => {
                Relocation::ValidateArbitraryClass(ValidateArbitraryClass)
            }
            abi::INLINED_STATIC_METHOD_WITH_NOP_GUARD => inlined(InlinedKind::Static, true),
            abi::INLINED_SPECIAL_METHOD_WITH_NOP_GUARD => inlined(InlinedKind::Special, true),
            abi::INLINED_VIRTUAL_METHOD_WITH_NOP_GUARD => inlined(InlinedKind::Virtual, true),
            abi::INLINED_INTERFACE_METHOD_WITH_NOP_GUARD => inlined(InlinedKind::Interface, true),
            abi::INLINED_ABSTRACT_METHOD_WITH_NOP_GUARD => inlined(InlinedKind::Abstract, true),
            abi::INLINED_HCR_METHOD => inlined(InlinedKind::Redefinable, true),
            abi::INLINED_VIRTUAL_METHOD => inlined(InlinedKind::Virtual, false),
            abi::INLINED_INTERFACE_METHOD => inlined(InlinedKind::Interface, false),
            abi::PROFILED_METHOD_GUARD | abi::PROFILED_CLASS_GUARD | abi::PROFILED_INLINED_METHOD => {
                Relocation::ProfiledInlined(ProfiledInlined::default())
            }
            abi::METHOD_POINTER => Relocation::ClassPointer(ClassPointer::new(PointerKind::Method)),
            abi::CLASS_POINTER => Relocation::ClassPointer(ClassPointer::new(PointerKind::Class)),
            abi::ARBITRARY_CLASS_ADDRESS => {
                Relocation::ClassPointer(ClassPointer::new(PointerKind::ArbitraryClass))
            }
            abi::HCR => Relocation::Hcr(Hcr),
            abi::EMIT_CLASS => Relocation::EmitClass(EmitClass::default()),
            abi::DEBUG_COUNTER => Relocation::DebugCounter(DebugCounter::default()),
            abi::CLASS_UNLOAD_ASSUMPTION => Relocation::ClassUnloadAssumption(ClassUnloadAssumption),
            abi::VALIDATE_ROOT_CLASS..=abi::VALIDATE_IMPROPER_INTERFACE_METHOD_FROM_CP => {
                Relocation::SymbolValidation(SymbolValidation)
            }
            abi::SYMBOL_FROM_MANAGER => Relocation::SymbolFromManager(SymbolFromManager::default()),
            _ => return Err(ReloFailure::UnknownReloType),
        };
        Ok(relocation)
    }

    pub fn for_record(record: &RecordView<'_>) -> ReloResult<Self> {
        Self::for_tag(record.tag())
    }
}

fn inlined(kind: InlinedKind, nop_guard: bool) -> Relocation {
    Relocation::InlinedMethod(InlinedMethod::new(kind, nop_guard))
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Relocation::ConstantPool($inner) => $body,
            Relocation::MethodObject($inner) => $body,
            Relocation::HelperAddress($inner) => $body,
            Relocation::MethodAddress($inner) => $body,
            Relocation::DataAddress($inner) => $body,
            Relocation::DirectJni($inner) => $body,
            Relocation::RamMethodConst($inner) => $body,
            Relocation::FixedAddress($inner) => $body,
            Relocation::ClassObject($inner) => $body,
            Relocation::ValidateClass($inner) => $body,
            Relocation::ValidateStaticField($inner) => $body,
            Relocation::ValidateArbitraryClass($inner) => $body,
            Relocation::AllocationVerify($inner) => $body,
            Relocation::InlinedMethod($inner) => $body,
            Relocation::ProfiledInlined($inner) => $body,
            Relocation::ClassPointer($inner) => $body,
            Relocation::Thunks($inner) => $body,
            Relocation::Trampolines($inner) => $body,
            Relocation::PicTrampolines($inner) => $body,
            Relocation::MethodTracingCheck($inner) => $body,
            Relocation::Hcr($inner) => $body,
            Relocation::ClassUnloadAssumption($inner) => $body,
            Relocation::EmitClass($inner) => $body,
            Relocation::DebugCounter($inner) => $body,
            Relocation::SymbolValidation($inner) => $body,
            Relocation::SymbolFromManager($inner) => $body,
        }
    };
}

impl RecordBehavior for Relocation {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        dispatch!(self, inner => inner.action(rt, record))
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        dispatch!(self, inner => inner.prepare(rt, record))
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        dispatch!(self, inner => inner.apply(rt, record, code, location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relo_abi::{KINDS, RecordLayout};

    #[test]
    fn every_supported_kind_has_a_behavior() {
        for kind in KINDS.iter() {
            let built = Relocation::for_tag(kind.tag);
            match kind.layout {
                RecordLayout::Unsupported => {
                    assert_eq!(built.err(), Some(ReloFailure::UnknownReloType), "{}", kind.name)
                }
                _ => assert!(built.is_ok(), "{} has no behavior", kind.name),
            }
        }
    }

    #[test]
    fn tags_past_the_table_are_unknown() {
        assert!(matches!(
            Relocation::for_tag(abi::KIND_COUNT as u8),
            Err(ReloFailure::UnknownReloType)
        ));
        assert!(matches!(
            Relocation::for_tag(u8::MAX),
            Err(ReloFailure::UnknownReloType)
        ));
    }

    #[test]
    fn both_class_address_tags_share_a_behavior() {
        assert!(matches!(
            Relocation::for_tag(abi::CLASS_OBJECT),
            Ok(Relocation::ClassObject(_))
        ));
        assert!(matches!(
            Relocation::for_tag(abi::CLASS_ADDRESS),
            Ok(Relocation::ClassObject(_))
        ));
    }
}
