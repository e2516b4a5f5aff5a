//! Records that claim code cache space: J2I thunks and trampolines.

use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::relo_log;
use crate::runtime::RelocationRuntime;
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::{Location, RecordAction, RecordBehavior, new_constant_pool, site_action};

/// Persisted thunks start with a header word pair ahead of the code.
const THUNK_HEADER_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThunkKind {
    /// Thunk for an interpreted call, looked up by the call site's signature.
    Call,
    /// As `Call`, and the thunk address is also stored next to the call site.
    VirtualPointer,
}

/// Makes sure the J2I thunk for the call site's signature exists, relocating the cached copy
/// into the code cache if the VM has none yet.
#[derive(Debug)]
pub struct Thunks {
    kind: ThunkKind,
    new_cp: u64,
}

impl Thunks {
    pub fn new(kind: ThunkKind) -> Self {
        Self { kind, new_cp: 0 }
    }

    fn relocate_thunk(rt: &RelocationRuntime<'_>, signature: &str) -> ReloResult<u64> {
        let fe = rt.fe();
        if let Some(thunk) = fe.lookup_thunk(signature) {
            return Ok(thunk);
        }
        let mut blob = rt
            .shared_cache()
            .find_thunk(signature)
            .ok_or(ReloFailure::ThunkRelo)?;
        if blob.len() <= THUNK_HEADER_SIZE {
            return Err(ReloFailure::ThunkRelo);
        }
        let code_cache = rt.code_cache();
        let Some(start) = code_cache.allocate_code_memory(blob.len()) else {
            code_cache.unreserve();
            return Err(ReloFailure::CacheFullRelo);
        };
        rt.target()
            .perform_thunk_relocation(&mut blob[THUNK_HEADER_SIZE..], fe.thunk_helper(signature))?;
        code_cache.install(start, &blob);
        let thunk = start + THUNK_HEADER_SIZE as u64;
        fe.register_thunk(signature, thunk);
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\trelocated thunk {signature} to {thunk:#x}"
        );
        Ok(thunk)
    }
}

impl RecordBehavior for Thunks {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        self.new_cp = new_constant_pool(rt, record)?;
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
        target.store_address(code, self.new_cp, at)?;
        let cp_index = target.load_thunk_cp_index(code, at)?;
        let signature = rt
            .fe()
            .thunk_signature(self.new_cp, cp_index)
            .ok_or(ReloFailure::ThunkRelo)?;
        let thunk = Self::relocate_thunk(rt, &signature)?;
        if self.kind == ThunkKind::VirtualPointer {
            let offset = record.field("offset_to_thunk_pointer")? as usize;
            target.store_address(code, thunk, at.wrapping_add(offset))?;
        }
        Ok(())
    }
}

/// Reserves an unresolved-call trampoline for the constant pool entry at the call site.
#[derive(Debug, Default)]
pub struct Trampolines {
    new_cp: u64,
}

impl RecordBehavior for Trampolines {
    fn action(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> RecordAction {
        site_action(rt, record)
    }

    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        self.new_cp = new_constant_pool(rt, record)?;
        Ok(())
    }

    fn apply(
        &mut self,
        rt: &mut RelocationRuntime<'_>,
        _record: &RecordView<'_>,
        code: &mut CodeBuffer<'_>,
        location: Location,
    ) -> ReloResult<()> {
        let target = rt.target();
        let at = location.single()?;
        target.store_address(code, self.new_cp, at)?;
        let cp_index = target.load_cp_index(code, at)?;
        rt.code_cache()
            .reserve_unresolved_trampoline(self.new_cp, cp_index)
            .map_err(|_| {
                relo_log!(
                    rt.logger(),
                    DETAIL_LEVEL,
                    "\tno trampoline for cp index {cp_index}"
                );
                ReloFailure::TrampolineRelo
            })
    }
}

/// Reserves the trampolines the body's polymorphic inline caches may need.
#[derive(Debug, Default)]
pub struct PicTrampolines;

impl RecordBehavior for PicTrampolines {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        let count = record.field("num_trampolines")? as u32;
        rt.code_cache().reserve_trampolines(count).map_err(|full| {
            relo_log!(
                rt.logger(),
                DETAIL_LEVEL,
                "\t{count} PIC trampolines: {full}"
            );
            ReloFailure::PicTrampolineRelo
        })
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
