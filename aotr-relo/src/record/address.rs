//! Records that rebase or materialize an address: constant pools, helpers, method bodies,
//! statics, JNI targets and the fixed per-body values.

use crate::assumptions::{PatchSite, SubscriptionKind};
use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::relo_log;
use crate::runtime::{MethodLookup, MethodRef, RelocationRuntime};
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::{
    CONSTANT_POOL, CP_INDEX, Location, RecordAction, RecordBehavior, new_constant_pool, rebase,
    site_action,
};

/// Constant pool pointers (plain and ordered pair).
#[derive(Debug, Default)]
pub struct ConstantPool {
    old_cp: u64,
    new_cp: u64,
}

impl RecordBehavior for ConstantPool {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        self.old_cp = record.field(CONSTANT_POOL)?;
        self.new_cp = new_constant_pool(rt, record)?;
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\tconstant pool {:#x} -> {:#x}",
            self.old_cp,
            self.new_cp
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
        if record.eip_relative() {
            return Ok(());
        }
        let target = rt.target();
        let old = location.load_address(target, code)?;
        let value = rebase(old, self.old_cp, self.new_cp);
        location.store_address(target, code, value, record.relo_flags())
    }
}

/// Pointers into the body's own constant pool area.
#[derive(Debug, Default)]
pub struct MethodObject {
    old_cp: u64,
}

impl RecordBehavior for MethodObject {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, _rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        self.old_cp = record.field(CONSTANT_POOL)?;
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let target = rt.target();
        let old = location.load_address(target, code)?;
        let value = rebase(old, self.old_cp, rt.exception_table().constant_pool);
        location.store_address(target, code, value, record.relo_flags())
    }
}

/// Runtime helper calls. The relative form goes through a trampoline when the helper is out of
/// branch range.
#[derive(Debug)]
pub struct HelperAddress {
    absolute: bool,
    helper_id: u32,
    helper: u64,
}

impl HelperAddress {
    pub fn relative() -> Self {
        Self {
            absolute: false,
            helper_id: 0,
            helper: 0,
        }
    }

    pub fn absolute() -> Self {
        Self {
            absolute: true,
            helper_id: 0,
            helper: 0,
        }
    }
}

impl RecordBehavior for HelperAddress {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        self.helper_id = record.field("helper_id")? as u32;
        self.helper = rt.fe().helper_address(self.helper_id);
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\thelper {} at {:#x}",
            self.helper_id,
            self.helper
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
        let target = rt.target();
        if self.absolute || !record.eip_relative() {
            return location.store_address(target, code, self.helper, record.relo_flags());
        }
        let at = location.single()?;
        let base = target.eip_base_for_call_offset(at)?;
        let destination = if rt.options().stress_trampolines || target.use_trampoline(self.helper, base)
        {
            rt.code_cache().find_helper_trampoline(self.helper_id, base)
        } else {
            self.helper
        };
        let displacement = (destination as i64).wrapping_sub(base as i64);
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\tcall at {at:#x} -> {destination:#x} (displacement {displacement:#x})"
        );
        target.store_relative_target(code, displacement, at)?;
        Ok(())
    }
}

/// Addresses inside the body itself, moved by the code delta.
#[derive(Debug, Default)]
pub struct MethodAddress;

impl RecordBehavior for MethodAddress {
    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let target = rt.target();
        if record.eip_relative() {
            let at = location.single()?;
            let old = target.load_call_target(code, at)?;
            target.store_call_target(code, rt.rebase_code_address(old), at)?;
            return Ok(());
        }
        let old = location.load_address(target, code)?;
        location.store_address(target, code, rt.rebase_code_address(old), record.relo_flags())
    }
}

/// Address of a static field slot.
#[derive(Debug, Default)]
pub struct DataAddress {
    address: u64,
}

impl RecordBehavior for DataAddress {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let cp = new_constant_pool(rt, record)?;
        let cp_index = record.field(CP_INDEX)?;
        let offset = record.field("offset")?;
        if cp == 0 {
            rt.stats().runtime_class_address_unresolved_cp();
            return Err(ReloFailure::StaticFieldRelo);
        }
        let base = rt
            .fe()
            .static_field_address(cp, cp_index)
            .ok_or(ReloFailure::StaticFieldRelo)?;
        self.address = base.wrapping_add(offset);
        relo_log!(rt.logger(), DETAIL_LEVEL, "\tstatic at {:#x}", self.address);
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        location.store_address_sequence(rt.target(), code, self.address, record.relo_flags())
    }
}

/// Direct calls into a JNI native.
#[derive(Debug)]
pub struct DirectJni {
    lookup: MethodLookup,
    method: Option<MethodRef>,
    address: u64,
}

impl DirectJni {
    pub fn new(lookup: MethodLookup) -> Self {
        Self {
            lookup,
            method: None,
            address: 0,
        }
    }
}

impl RecordBehavior for DirectJni {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let cp = new_constant_pool(rt, record)?;
        let cp_index = record.field(CP_INDEX)?;
        let method = rt
            .fe()
            .method_from_cp(self.lookup, cp, cp_index)
            .ok_or(ReloFailure::ClassRelo)?;
        self.address = rt
            .fe()
            .jni_target_address(method)
            .ok_or(ReloFailure::ClassRelo)?;
        self.method = Some(method);
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let target = rt.target();
        let at = location.single()?;
        if let Some(method) = self.method {
            rt.subscribe(
                SubscriptionKind::JniCallSite { method },
                PatchSite::Code {
                    address: at,
                    size: target.pointer_size(),
                },
            );
        }
        target.store_relative_address_sequence(code, self.address, at, record.relo_flags())?;
        Ok(())
    }
}

/// Resolved method pointer for a static, special or virtual call.
#[derive(Debug)]
pub struct RamMethodConst {
    lookup: MethodLookup,
    method: u64,
}

impl RamMethodConst {
    pub fn new(lookup: MethodLookup) -> Self {
        Self { lookup, method: 0 }
    }
}

impl RecordBehavior for RamMethodConst {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let cp = new_constant_pool(rt, record)?;
        let cp_index = record.field(CP_INDEX)?;
        let method = rt
            .fe()
            .method_from_cp(self.lookup, cp, cp_index)
            .ok_or(ReloFailure::ClassRelo)?;
        self.method = method.0;
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let target = rt.target();
        match location {
            Location::Single(at) => target.store_address_ram(code, self.method, at)?,
            pair => pair.store_address(target, code, self.method, record.relo_flags())?,
        }
        Ok(())
    }
}

/// Where a [`FixedAddress`] record takes its value from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixedValue {
    ArrayCopyHelper,
    ArrayCopyToc,
    BodyInfo,
    GlobalValue,
    /// `offset` into the new body, or null when the offset is zero.
    CodeOffset,
    RamMethod,
}

/// A value known before any location is visited, stored as a pointer or an address sequence.
#[derive(Debug)]
pub struct FixedAddress {
    source: FixedValue,
    sequence: bool,
    value: u64,
}

impl FixedAddress {
    pub fn pointer(source: FixedValue) -> Self {
        Self {
            source,
            sequence: false,
            value: 0,
        }
    }

    pub fn sequence(source: FixedValue) -> Self {
        Self {
            source,
            sequence: true,
            value: 0,
        }
    }
}

impl RecordBehavior for FixedAddress {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        self.value = match self.source {
            FixedValue::ArrayCopyHelper => rt.fe().array_copy_helper(),
            FixedValue::ArrayCopyToc => rt.fe().array_copy_toc(),
            FixedValue::BodyInfo => rt.exception_table().body_info,
            FixedValue::GlobalValue => rt.fe().global_value(record.field("offset")?),
            FixedValue::CodeOffset => match record.field("offset")? {
                0 => 0,
                offset => rt.new_code_start().wrapping_add(offset),
            },
            FixedValue::RamMethod => rt.method().map(|method| method.0).unwrap_or(0),
        };
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\t{:?} value {:#x}",
            self.source,
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
        let target = rt.target();
        if self.sequence {
            location.store_address_sequence(target, code, self.value, record.relo_flags())
        } else {
            location.store_address(target, code, self.value, record.relo_flags())
        }
    }
}
