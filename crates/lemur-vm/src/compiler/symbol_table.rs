use std::collections::HashMap;

use compact_str::CompactString;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Where a symbol lives at runtime.
pub enum SymbolScope {
    Global,
    Local,
    /// Captured from an enclosing function.
    Free,
    Builtin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A resolved name.
pub struct Symbol {
    pub name: CompactString,
    pub scope: SymbolScope,
    /// The slot within `scope`.
    pub index: usize,
}

#[derive(Debug, Default)]
/// Maps names to slots for one function (or the program) and links to the enclosing table.
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<CompactString, Symbol>,
    num_definitions: usize,
    free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Creates a new top level symbol table.
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Creates a symbol table for a function nested inside `outer`.
    pub fn new_enclosed(outer: SymbolTable) -> SymbolTable {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    /// Returns the enclosing table, or `None` for the top level table.
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    /// Returns `true` if this is the top level table.
    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Defines `name` in the next free slot. Redefining a name shadows the previous symbol with
    /// a new slot.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.into(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Defines a builtin. Builtins do not take up a slot.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.into(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Resolves `name`, searching enclosing tables if needed.
    ///
    /// A local of an enclosing function is captured as a free variable of this table. Capturing
    /// the same name again returns the existing free symbol.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let symbol = self.outer.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            SymbolScope::Local | SymbolScope::Free => Some(self.define_free(symbol)),
        }
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// The symbols captured from enclosing scopes, as they resolve in the enclosing scope. The
    /// position of each symbol is its `OpGetFree` operand.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    /// The number of slots defined in this table.
    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }
}
