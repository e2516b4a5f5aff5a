//! Class and method pointers re-found through loader and class chains.

use crate::assumptions::{PatchSite, SubscriptionKind};
use crate::error::{ReloFailure, ReloResult};
use crate::logging::DETAIL_LEVEL;
use crate::relo_log;
use crate::runtime::{ClassRef, InlinedSiteMethod, RelocationRuntime};
use crate::target::CodeBuffer;
use crate::wire::RecordView;

use super::class::class_from_chains;
use super::{Location, RecordBehavior, site_index};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerKind {
    /// Profiled receiver class, patched in place.
    Class,
    /// Vtable entry of the profiled receiver class.
    Method,
    /// Any bootstrap class, materialized as an address sequence.
    ArbitraryClass,
}

#[derive(Debug)]
pub struct ClassPointer {
    kind: PointerKind,
    class: Option<ClassRef>,
    pointer: u64,
}

impl ClassPointer {
    pub fn new(kind: PointerKind) -> Self {
        Self {
            kind,
            class: None,
            pointer: 0,
        }
    }

    /// Value stored for a site whose class could not be found; the guard can never match it.
    fn inactive_pointer(pointer_size: usize) -> u64 {
        match pointer_size {
            8 => u64::MAX,
            _ => u32::MAX as u64,
        }
    }

    fn resolve(&self, rt: &RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<Option<(ClassRef, u64)>> {
        let index = site_index(record)?;
        if rt.inlined_site_method(index) == InlinedSiteMethod::CallerFailed {
            return Ok(None);
        }
        let loader_chain = record.field("loader_chain_offset")?;
        let class_chain = record.field("class_chain_offset")?;
        let Some(class) = class_from_chains(rt, loader_chain, class_chain) else {
            return Ok(None);
        };
        let pointer = match self.kind {
            PointerKind::Class | PointerKind::ArbitraryClass => Some(class.0),
            PointerKind::Method => rt
                .fe()
                .vtable_method(class, record.field("vtable_slot")?)
                .map(|method| method.0),
        };
        Ok(pointer.map(|pointer| (class, pointer)))
    }
}

impl RecordBehavior for ClassPointer {
    fn prepare(&mut self, rt: &mut RelocationRuntime<'_>, record: &RecordView<'_>) -> ReloResult<()> {
        match self.resolve(rt, record)? {
            Some((class, pointer)) => {
                self.class = Some(class);
                self.pointer = pointer;
            }
            None => {
                self.class = None;
                self.pointer = Self::inactive_pointer(rt.target().pointer_size());
            }
        }
        if self.kind == PointerKind::ArbitraryClass {
            let loader = rt
                .shared_cache()
                .loader_for_chain(record.field("loader_chain_offset")?);
            let bootstrap = loader.is_some_and(|loader| rt.shared_cache().is_bootstrap_loader(loader));
            if self.class.is_none() || !bootstrap {
                return Err(ReloFailure::ClassRelo);
            }
        }
        relo_log!(
            rt.logger(),
            DETAIL_LEVEL,
            "\t{:?} pointer {:#x} (active: {})",
            self.kind,
            self.pointer,
            self.class.is_some()
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
        if self.kind == PointerKind::ArbitraryClass {
            return location.store_address_sequence(target, code, self.pointer, record.relo_flags());
        }
        let at = location.single()?;
        target.store_pointer(code, self.pointer, at)?;
        let Some(class) = self.class else {
            return Ok(());
        };

        let fe = rt.fe();
        let site = PatchSite::Code {
            address: at,
            size: target.pointer_size(),
        };
        let same_loader = rt
            .method()
            .is_some_and(|body| fe.same_class_loaders(class, fe.class_of_method(body)));
        if !same_loader {
            rt.subscribe(SubscriptionKind::ClassUnloadPointer { class }, site);
        }
        let redefinable = match self.kind {
            PointerKind::Class => fe.want_to_patch_class_pointer(class, at),
            _ => rt.options().hcr_enabled,
        };
        if redefinable {
            rt.subscribe(
                SubscriptionKind::ClassRedefinitionPic {
                    value: self.pointer,
                    unresolved: false,
                },
                site,
            );
        }
        Ok(())
    }
}
