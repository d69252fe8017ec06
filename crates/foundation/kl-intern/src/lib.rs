//! String interning for symbols

pub use lasso::Spur as Symbol;
use lasso::Rodeo;

/// Single-threaded string interner owned by a compilation session
#[derive(Debug, Default)]
pub struct Interner {
    inner: Rodeo,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        self.inner.get_or_intern(s)
    }

    /// Looks up a name without interning it
    pub fn get(&self, s: &str) -> Option<Symbol> {
        self.inner.get(s)
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.inner.resolve(&sym)
    }
}
