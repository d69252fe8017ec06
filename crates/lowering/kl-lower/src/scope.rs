//! Local symbol table with shadow-and-restore bindings

use crate::resolve::StorageHandle;
use kl_intern::Symbol;
use rustc_hash::FxHashMap;

/// What a name was bound to before a binding replaced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a shadowed binding must be restored when its scope exits"]
pub struct SavedBinding {
    name: Symbol,
    previous: Option<StorageHandle>,
}

/// Function-local bindings, one active handle per name
#[derive(Debug, Default)]
pub struct Scope {
    locals: FxHashMap<Symbol, StorageHandle>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: Symbol) -> Option<StorageHandle> {
        self.locals.get(&name).copied()
    }

    /// Installs `handle` under `name`, returning what it shadowed
    pub fn bind(&mut self, name: Symbol, handle: StorageHandle) -> SavedBinding {
        SavedBinding {
            name,
            previous: self.locals.insert(name, handle),
        }
    }

    /// Undoes bindings in reverse order of installation, so a name bound twice
    /// in one list gets its outermost value back.
    pub fn restore(&mut self, saved: Vec<SavedBinding>) {
        for binding in saved.into_iter().rev() {
            match binding.previous {
                Some(handle) => {
                    self.locals.insert(binding.name, handle);
                }
                None => {
                    self.locals.remove(&binding.name);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }
}
