//! The store: a growable array from opaque `Location` to a
//! storable slot, plus the `Closure` value that `FunDecl`/`ProcDecl` bind
//! into it. Closures are threaded through the store (not a bare `DVal`
//! variant) so a function/procedure name can be bound to a location
//! *before* the closure itself is built — the same `captured_env` then
//! already resolves the function's own name, which is how recursion works
//! without mutating any environment in place.

use std::rc::Rc;

use crate::ast::{CommandSeq, Expr};
use crate::env::Environment;
use crate::error::DslError;
use crate::token::Span;
use crate::value::MVal;

pub type Location = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    Function,
    Procedure,
}

#[derive(Debug, Clone)]
pub enum ClosureBody {
    Function(Rc<Expr>),
    /// `body` is `None` for a procedure with an empty command sequence
    /// before its terminal `return` (`{ return e }`).
    Procedure { body: Option<Rc<CommandSeq>>, return_expr: Rc<Expr> },
}

/// A function or procedure value: kind, parameters, body, and the
/// environment it closed over at declaration time.
#[derive(Debug, Clone)]
pub struct Closure {
    pub kind: ClosureKind,
    pub params: Rc<Vec<String>>,
    pub body: ClosureBody,
    pub captured_env: Environment,
}

#[derive(Debug, Clone)]
enum StoreSlot {
    Value(MVal),
    Closure(Rc<Closure>),
}

/// A plain growable array with snapshot markers.
/// `next_loc` is simply `slots.len()`.
#[derive(Debug, Clone, Default)]
pub struct Store {
    slots: Vec<StoreSlot>,
}

impl Store {
    pub fn new() -> Self {
        Store { slots: Vec::new() }
    }

    pub fn allocate_value(&mut self, mval: MVal) -> Location {
        self.slots.push(StoreSlot::Value(mval));
        self.slots.len() - 1
    }

    pub fn allocate_closure(&mut self, closure: Closure) -> Location {
        self.slots.push(StoreSlot::Closure(Rc::new(closure)));
        self.slots.len() - 1
    }

    pub fn access_value(&self, loc: Location, span: Span) -> Result<MVal, DslError> {
        match self.slots.get(loc) {
            Some(StoreSlot::Value(v)) => Ok(v.clone()),
            Some(StoreSlot::Closure(_)) => Err(DslError::type_error("expected a value, found a function/procedure", span)),
            None => Err(DslError::semantic(format!("dangling location {loc}"), span)),
        }
    }

    pub fn access_closure(&self, loc: Location, span: Span) -> Result<Rc<Closure>, DslError> {
        match self.slots.get(loc) {
            Some(StoreSlot::Closure(c)) => Ok(c.clone()),
            Some(StoreSlot::Value(_)) => Err(DslError::semantic("name is not a function or procedure", span)),
            None => Err(DslError::semantic(format!("dangling location {loc}"), span)),
        }
    }

    /// Functional update: replaces whatever was at `loc`, value or closure.
    pub fn update(&mut self, loc: Location, mval: MVal, span: Span) -> Result<(), DslError> {
        if loc >= self.slots.len() {
            return Err(DslError::semantic(format!("dangling location {loc}"), span));
        }
        self.slots[loc] = StoreSlot::Value(mval);
        Ok(())
    }

    pub fn next_loc(&self) -> usize {
        self.slots.len()
    }

    /// Loop-scope reclamation: drop every slot allocated since
    /// `high_water_mark`. Callers only do this when nothing escaped the
    /// iteration (no closure was built during it).
    pub fn truncate_to(&mut self, high_water_mark: usize) {
        self.slots.truncate(high_water_mark);
    }

    /// True if any closure was allocated at or after `mark`. The evaluator's
    /// while-loop uses this to decide whether an iteration's allocations may
    /// be safely reclaimed (see `evaluator::Interpreter::execute_while`).
    pub fn has_closure_since(&self, mark: usize) -> bool {
        self.slots[mark.min(self.slots.len())..].iter().any(|slot| matches!(slot, StoreSlot::Closure(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EVal;

    #[test]
    fn test_allocate_and_access() {
        let mut store = Store::new();
        let loc = store.allocate_value(EVal::Int(42));
        assert_eq!(store.access_value(loc, Span::DUMMY).unwrap().as_int(Span::DUMMY).unwrap(), 42);
    }

    #[test]
    fn test_update_replaces_value() {
        let mut store = Store::new();
        let loc = store.allocate_value(EVal::Int(1));
        store.update(loc, EVal::Int(2), Span::DUMMY).unwrap();
        assert_eq!(store.access_value(loc, Span::DUMMY).unwrap().as_int(Span::DUMMY).unwrap(), 2);
    }

    #[test]
    fn test_dangling_location_is_error() {
        let store = Store::new();
        assert!(store.access_value(0, Span::DUMMY).is_err());
    }

    #[test]
    fn test_truncate_reclaims_tail() {
        let mut store = Store::new();
        store.allocate_value(EVal::Int(1));
        let mark = store.next_loc();
        store.allocate_value(EVal::Int(2));
        store.allocate_value(EVal::Int(3));
        assert_eq!(store.next_loc(), 3);
        store.truncate_to(mark);
        assert_eq!(store.next_loc(), 1);
    }

    #[test]
    fn test_closure_slot_rejects_value_access() {
        let mut store = Store::new();
        let loc = store.allocate_closure(Closure {
            kind: ClosureKind::Function,
            params: Rc::new(vec![]),
            body: ClosureBody::Function(Rc::new(Expr::Number(1))),
            captured_env: Environment::empty(),
        });
        assert!(store.access_value(loc, Span::DUMMY).is_err());
        assert!(store.access_closure(loc, Span::DUMMY).is_ok());
    }
}
