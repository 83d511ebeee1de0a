//! Interned symbols.
//!
//! A [`Symbol`] is an opaque `Copy` handle; the printable name is owned by
//! the [`SymbolTable`] of the enclosing model. Two symbols are the same
//! variable iff their handles are equal, so renaming a definition never
//! invalidates expressions and anonymous placeholders are cheap.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque handle of an interned symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub(crate) u32);

impl Symbol {
    /// Raw handle value, usable as a dense index.
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Name interner. One table per model; symbols from different tables must
/// not be mixed.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    index: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing handle if already present.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.index.get(name) {
            return sym;
        }
        let sym = Symbol(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), sym);
        sym
    }

    /// Mint a fresh symbol that cannot collide with any interned name.
    ///
    /// Used for capture-free substitution temporaries and conservation
    /// constant placeholders.
    pub fn fresh(&mut self, prefix: &str) -> Symbol {
        let mut n = self.names.len();
        loop {
            let candidate = format!("{}#{}", prefix, n);
            if !self.index.contains_key(&candidate) {
                return self.intern(&candidate);
            }
            n += 1;
        }
    }

    /// Look up a handle by name.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.index.get(name).copied()
    }

    /// Printable name of a symbol.
    pub fn name(&self, sym: Symbol) -> &str {
        &self.names[sym.0 as usize]
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning() {
        let mut table = SymbolTable::new();
        let a = table.intern("S1");
        let b = table.intern("S2");
        assert_ne!(a, b);
        assert_eq!(table.intern("S1"), a);
        assert_eq!(table.name(b), "S2");
        assert_eq!(table.lookup("S2"), Some(b));
        assert_eq!(table.lookup("S3"), None);
    }

    #[test]
    fn test_fresh_never_collides() {
        let mut table = SymbolTable::new();
        let a = table.intern("tmp#0");
        let f = table.fresh("tmp");
        assert_ne!(a, f);
        assert_ne!(table.name(f), "tmp#0");
    }
}
