//! A persistent, immutable scope chain. `bind` never mutates an
//! existing `Environment`; it returns a new one sharing structure with the
//! old one via `Rc`, the same way closures in this lineage capture their
//! defining scope by reference rather than by deep copy.

use std::collections::HashMap;
use std::rc::Rc;

use crate::store::Location;
use crate::value::EVal;

/// A denotable value: an expressible value or a mutable location. Built-in
/// operators aren't modeled here: they're grammar symbols (`OP`/`UNOP`), never
/// `IDENT`s, so they're
/// never looked up through an environment — the evaluator dispatches them
/// directly off the AST node. See `DESIGN.md`.
#[derive(Debug, Clone)]
pub enum DVal {
    Val(EVal),
    Location(Location),
}

#[derive(Debug, Default)]
struct Frame {
    bindings: HashMap<String, DVal>,
}

#[derive(Debug, Clone)]
pub struct Environment {
    frame: Rc<Frame>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    pub fn empty() -> Self {
        Environment { frame: Rc::new(Frame::default()), parent: None }
    }

    /// Extends this environment with one new binding, shadowing any
    /// existing binding of the same name. Returns a new `Environment`; the
    /// receiver is left untouched.
    pub fn bind(&self, name: impl Into<String>, dval: DVal) -> Environment {
        let mut bindings = HashMap::with_capacity(1);
        bindings.insert(name.into(), dval);
        Environment { frame: Rc::new(Frame { bindings }), parent: Some(Rc::new(self.clone())) }
    }

    /// Innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<DVal> {
        if let Some(dval) = self.frame.bindings.get(name) {
            return Some(dval.clone());
        }
        self.parent.as_deref().and_then(|parent| parent.lookup(name))
    }
}
