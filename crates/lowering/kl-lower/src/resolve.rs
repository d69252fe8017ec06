//! Identifier resolution against the local table and the module globals

use crate::{LowerError, Session};
use kl_ir::{GlobalId, SlotType, Value};
use kl_span::Span;

/// Where a storage slot lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// An `alloca` in the current function's entry block
    Local(Value),
    /// A module-level global
    Global(GlobalId),
}

/// A resolved storage slot and its shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageHandle {
    pub location: Location,
    pub ty: SlotType,
}

impl StorageHandle {
    pub fn local(slot: Value, ty: SlotType) -> Self {
        Self {
            location: Location::Local(slot),
            ty,
        }
    }

    pub fn global(id: GlobalId, ty: SlotType) -> Self {
        Self {
            location: Location::Global(id),
            ty,
        }
    }

    /// Address of the slot's first element
    pub fn ptr(self) -> Value {
        match self.location {
            Location::Local(slot) => slot,
            Location::Global(id) => Value::Global(id),
        }
    }

    pub fn is_global(self) -> bool {
        matches!(self.location, Location::Global(_))
    }
}

impl Session {
    /// Resolves `name` to local storage, or failing that to the first global
    /// declared under it.
    ///
    /// # Errors
    /// Returns [`LowerError::UndefinedSymbol`] when neither namespace holds `name`.
    pub fn resolve(&self, name: &str, span: Span) -> Result<StorageHandle, LowerError> {
        let undefined = || LowerError::UndefinedSymbol {
            name: name.to_owned(),
            span,
        };
        let sym = self.module.interner().get(name).ok_or_else(undefined)?;

        if let Some(handle) = self.scope.lookup(sym) {
            return Ok(handle);
        }
        self.module
            .get_named_global(sym)
            .map(|id| StorageHandle::global(id, self.module.global(id).ty))
            .ok_or_else(undefined)
    }
}
