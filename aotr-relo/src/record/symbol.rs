//! Symbol validation records. Each one re-derives a class or method the way the compiler did
//! and checks it against the symbol id the compiler assigned.

use relo_abi as abi;

use crate::error::{ReloFailure, ReloResult};
use crate::logging::{DETAIL_LEVEL, category_validation};
use crate::relo_log;
use crate::runtime::{ImplementerKind, MethodLookup, RelocationRuntime, is_outermost_site};
use crate::svm::{Symbol, SymbolType};
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::{Location, RecordBehavior};

fn id(record: &RecordView<'_>, name: &str) -> ReloResult<u16> {
    Ok(record.field(name)? as u16)
}

fn flag(record: &RecordView<'_>, name: &str) -> ReloResult<bool> {
    Ok(record.field(name)? != 0)
}

fn signed(record: &RecordView<'_>, name: &str) -> ReloResult<i32> {
    Ok(record.field(name)? as i64 as i32)
}

fn method_lookup(tag: u8) -> Option<MethodLookup> {
    match tag {
        abi::VALIDATE_STATIC_METHOD_FROM_CP => Some(MethodLookup::Static),
        abi::VALIDATE_SPECIAL_METHOD_FROM_CP => Some(MethodLookup::Special),
        abi::VALIDATE_VIRTUAL_METHOD_FROM_CP => Some(MethodLookup::Virtual),
        abi::VALIDATE_IMPROPER_INTERFACE_METHOD_FROM_CP => Some(MethodLookup::ImproperInterface),
        _ => None,
    }
}

/// Every validate-* kind between the root class check and the improper interface lookup.
#[derive(Debug, Default)]
pub struct SymbolValidation;

impl SymbolValidation {
    fn validate(rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<bool> {
        let fe = rt.fe();
        let cache = rt.shared_cache();
        let root = rt.method().map(|method| fe.class_of_method(method));
        let inlined_site_method = if record.tag() == abi::VALIDATE_METHOD_FROM_INLINED_SITE {
            let index = signed(record, "inlined_site_index")?;
            let method = if index < 0 || is_outermost_site(index as u64, rt.target().pointer_size())
            {
                rt.method()
            } else {
                rt.inlined_site_method(index as u64).method()
            };
            Some(method)
        } else {
            None
        };
        let Some(svm) = rt.svm.as_mut() else {
            relo_log!(rt.logger(), DETAIL_LEVEL, "\tno symbol validation manager");
            return Ok(false);
        };

        let verified = match record.tag() {
            abi::VALIDATE_ROOT_CLASS => match root {
                Some(root) => svm.validate_root_class(fe, id(record, "class_id")?, root),
                None => false,
            },
            abi::VALIDATE_CLASS_BY_NAME => svm.validate_class_by_name(
                fe,
                cache,
                id(record, "class_id")?,
                id(record, "beholder_id")?,
                record.field("class_chain_offset")?,
            ),
            abi::VALIDATE_PROFILED_CLASS => svm.validate_profiled_class(
                fe,
                cache,
                id(record, "class_id")?,
                record.field("primitive_type")? as u8,
                record.field("loader_chain_offset")?,
                record.field("class_chain_offset")?,
            ),
            abi::VALIDATE_CLASS_FROM_CP => svm.validate_class_from_cp(
                fe,
                id(record, "class_id")?,
                id(record, "beholder_id")?,
                record.field("cp_index")? as u32,
            ),
            abi::VALIDATE_DEFINING_CLASS_FROM_CP => svm.validate_defining_class_from_cp(
                fe,
                id(record, "class_id")?,
                id(record, "beholder_id")?,
                record.field("cp_index")? as u32,
                flag(record, "is_static")?,
            ),
            abi::VALIDATE_STATIC_CLASS_FROM_CP => svm.validate_static_class_from_cp(
                fe,
                id(record, "class_id")?,
                id(record, "beholder_id")?,
                record.field("cp_index")? as u32,
            ),
            abi::VALIDATE_CLASS_FROM_METHOD => svm.validate_class_from_method(
                fe,
                id(record, "class_id")?,
                id(record, "method_id")?,
            ),
            abi::VALIDATE_COMPONENT_CLASS_FROM_ARRAY_CLASS => svm
                .validate_component_class_from_array_class(
                    fe,
                    id(record, "component_class_id")?,
                    id(record, "array_class_id")?,
                ),
            abi::VALIDATE_ARRAY_CLASS_FROM_COMPONENT_CLASS => svm
                .validate_array_class_from_component_class(
                    fe,
                    id(record, "array_class_id")?,
                    id(record, "component_class_id")?,
                ),
            abi::VALIDATE_SUPER_CLASS_FROM_CLASS => svm.validate_super_class_from_class(
                fe,
                id(record, "super_class_id")?,
                id(record, "child_class_id")?,
            ),
            abi::VALIDATE_CLASS_INSTANCE_OF_CLASS => svm.validate_class_instance_of_class(
                fe,
                id(record, "class_one_id")?,
                id(record, "class_two_id")?,
                flag(record, "object_type_is_fixed")?,
                flag(record, "cast_type_is_fixed")?,
                flag(record, "is_instance_of")?,
            ),
            abi::VALIDATE_SYSTEM_CLASS_BY_NAME => svm.validate_system_class_by_name(
                fe,
                cache,
                id(record, "system_class_id")?,
                record.field("class_chain_offset")?,
            ),
            abi::VALIDATE_CLASS_FROM_ITABLE_INDEX_CP => svm.validate_class_from_itable_index_cp(
                fe,
                id(record, "class_id")?,
                id(record, "beholder_id")?,
                record.field("cp_index")? as u32,
            ),
            abi::VALIDATE_DECLARING_CLASS_FROM_FIELD_OR_STATIC => svm
                .validate_declaring_class_from_field_or_static(
                    fe,
                    id(record, "class_id")?,
                    id(record, "beholder_id")?,
                    record.field("cp_index")? as u32 as i32,
                ),
            abi::VALIDATE_CLASS_CLASS => svm.validate_class_class(
                fe,
                id(record, "class_class_id")?,
                id(record, "object_class_id")?,
            ),
            abi::VALIDATE_CONCRETE_SUB_CLASS_FROM_CLASS => svm
                .validate_concrete_sub_class_from_class(
                    fe,
                    id(record, "child_class_id")?,
                    id(record, "super_class_id")?,
                ),
            abi::VALIDATE_CLASS_CHAIN => svm.validate_class_chain(
                cache,
                id(record, "class_id")?,
                record.field("class_chain_offset")?,
            ),
            abi::VALIDATE_ROM_CLASS => svm.validate_rom_class(
                fe,
                cache,
                id(record, "class_id")?,
                record.field("rom_class_offset")?,
            ),
            abi::VALIDATE_PRIMITIVE_CLASS => svm.validate_primitive_class(
                fe,
                id(record, "class_id")?,
                record.field("primitive_type")? as u8,
            ),
            abi::VALIDATE_METHOD_FROM_INLINED_SITE => svm.validate_method_from_inlined_site(
                id(record, "method_id")?,
                inlined_site_method.flatten(),
            ),
            abi::VALIDATE_METHOD_BY_NAME => svm.validate_method_by_name(
                fe,
                cache,
                id(record, "method_id")?,
                id(record, "beholder_id")?,
                record.field("rom_class_offset")?,
                record.field("rom_method_offset")?,
            ),
            abi::VALIDATE_METHOD_FROM_CLASS => svm.validate_method_from_class(
                fe,
                id(record, "method_id")?,
                id(record, "beholder_id")?,
                record.field("index")? as u32,
            ),
            tag @ (abi::VALIDATE_STATIC_METHOD_FROM_CP
            | abi::VALIDATE_SPECIAL_METHOD_FROM_CP
            | abi::VALIDATE_VIRTUAL_METHOD_FROM_CP
            | abi::VALIDATE_IMPROPER_INTERFACE_METHOD_FROM_CP) => {
                let lookup = method_lookup(tag).ok_or(ReloFailure::UnknownReloType)?;
                svm.validate_method_from_cp(
                    fe,
                    lookup,
                    id(record, "method_id")?,
                    id(record, "beholder_id")?,
                    record.field("cp_index")? as u32,
                )
            }
            abi::VALIDATE_VIRTUAL_METHOD_FROM_OFFSET => svm.validate_virtual_method_from_offset(
                fe,
                id(record, "method_id")?,
                id(record, "beholder_id")?,
                signed(record, "virtual_call_offset")?,
                flag(record, "ignore_rt_resolve")?,
            ),
            abi::VALIDATE_INTERFACE_METHOD_FROM_CP => svm.validate_interface_method_from_cp(
                fe,
                id(record, "method_id")?,
                id(record, "beholder_id")?,
                id(record, "lookup_id")?,
                record.field("cp_index")? as u32,
            ),
            abi::VALIDATE_METHOD_FROM_CLASS_AND_SIG => svm
                .validate_method_from_class_and_signature(
                    fe,
                    id(record, "method_id")?,
                    id(record, "method_class_id")?,
                    id(record, "beholder_id")?,
                    record.field("rom_method_offset")?,
                ),
            abi::VALIDATE_STACK_WALKER_MAY_SKIP_FRAMES => svm
                .validate_stack_walker_may_skip_frames(
                    fe,
                    id(record, "method_id")?,
                    id(record, "method_class_id")?,
                    flag(record, "skip_frames")?,
                ),
            abi::VALIDATE_ARRAY_CLASS_FROM_JAVA_VM => svm.validate_array_class_from_java_vm(
                fe,
                id(record, "array_class_id")?,
                signed(record, "array_class_index")?,
            ),
            abi::VALIDATE_CLASS_INFO_IS_INITIALIZED => svm.validate_class_info_is_initialized(
                fe,
                id(record, "class_id")?,
                flag(record, "is_initialized")?,
            ),
            abi::VALIDATE_METHOD_FROM_SINGLE_IMPLEMENTER => svm
                .validate_method_from_single_implementer(
                    fe,
                    id(record, "method_id")?,
                    id(record, "this_class_id")?,
                    signed(record, "cp_index_or_vft_slot")?,
                    id(record, "caller_method_id")?,
                    ImplementerKind::Virtual {
                        use_resolved_interface_method: flag(
                            record,
                            "use_resolved_interface_method",
                        )?,
                    },
                ),
            abi::VALIDATE_METHOD_FROM_SINGLE_INTERFACE_IMPLEMENTER => svm
                .validate_method_from_single_implementer(
                    fe,
                    id(record, "method_id")?,
                    id(record, "this_class_id")?,
                    signed(record, "cp_index")?,
                    id(record, "caller_method_id")?,
                    ImplementerKind::Interface,
                ),
            abi::VALIDATE_METHOD_FROM_SINGLE_ABSTRACT_IMPLEMENTER => svm
                .validate_method_from_single_implementer(
                    fe,
                    id(record, "method_id")?,
                    id(record, "this_class_id")?,
                    signed(record, "vft_slot")?,
                    id(record, "caller_method_id")?,
                    ImplementerKind::Abstract,
                ),
            _ => return Err(ReloFailure::UnknownReloType),
        };
        Ok(verified)
    }
}

impl RecordBehavior for SymbolValidation {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let verified = Self::validate(rt, record)?;
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\t[{}] {}: {verified}",
            category_validation(),
            record.name()
        );
        if verified {
            Ok(())
        } else {
            Err(ReloFailure::ClassRelo)
        }
    }

    fn apply(
        &mut self,
        _rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        _code: &mut CodeBuffer<'_>,
        _location: Location,
    ) -> ReloResult<()> {
        Ok(())
    }
}

/// Patches the location with the live value of an already validated symbol.
#[derive(Debug, Default)]
pub struct SymbolFromManager {
    value: u64,
}

impl RecordBehavior for SymbolFromManager {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let symbol_id = id(record, "symbol_id")?;
        let symbol_type =
            SymbolType::from_raw(record.field("symbol_type")?).ok_or(ReloFailure::ClassRelo)?;
        let symbol: Option<Symbol> = rt
            .svm
            .as_ref()
            .and_then(|svm| svm.symbol_from_id(symbol_id))
            .filter(|symbol| symbol_type.matches(*symbol));
        let Some(symbol) = symbol else {
            relo_log!(
                rt.logger(),
                DETAIL_LEVEL,
                "\tsymbol {symbol_id} is not a bound {symbol_type:?}"
            );
            return Err(ReloFailure::ClassRelo);
        };
        self.value = symbol.value();
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\tsymbol {symbol_id} = {:#x}",
            self.value
        );
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        location.store_address_sequence(rt.target(), code, self.value, record.relo_flags())
    }
}
