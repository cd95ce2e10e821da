//! Per-connection slot tables.
//!
//! `slots` and `refs` together form the value/slot bijection for every
//! reference this side has sent or received. Entries are created on first
//! sight and never reassigned. Pending questions and promise imports keep
//! their resolvers separately and lose them when settled.

use crate::promise::{Promise, Resolver};
use crate::slot::{Slot, SlotKind};
use crate::value::Value;
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct Tables {
    /// Slot (local view) to value, for exports, imports, questions and answers.
    slots: HashMap<Slot, Value>,
    /// Reference identity to slot.
    refs: HashMap<usize, Slot>,
    /// Questions we asked that have not been answered.
    questions: HashMap<u64, Resolver>,
    /// Promise imports the peer has not resolved yet.
    imports: HashMap<u64, Resolver>,
    /// Answers to the peer's questions, kept for pipelining.
    answers: HashMap<u64, Promise>,
    /// Next `o+N` export id.
    next_object: u64,
    /// Next `p+N` export id.
    next_promise: u64,
    /// Next `q-N` question id.
    next_question: u64,
}

impl Tables {
    pub(crate) fn new() -> Self {
        Self {
            next_object: 1,
            next_promise: 1,
            next_question: 1,
            ..Self::default()
        }
    }

    /// The slot already assigned to a reference, if any.
    pub(crate) fn slot_of(&self, value: &Value) -> Option<Slot> {
        value.ref_id().and_then(|id| self.refs.get(&id).copied())
    }

    /// True for references that live on the peer's side of the connection.
    pub(crate) fn is_remote(&self, value: &Value) -> bool {
        self.slot_of(value).is_some_and(|slot| !slot.is_local())
    }

    pub(crate) fn value_of(&self, slot: &Slot) -> Option<Value> {
        self.slots.get(slot).cloned()
    }

    fn record(&mut self, slot: Slot, value: Value) {
        if let Some(id) = value.ref_id() {
            self.refs.insert(id, slot);
        }
        self.slots.insert(slot, value);
    }

    /// Allocate the next export slot for a local object or promise.
    pub(crate) fn export(&mut self, value: Value) -> Slot {
        let kind = match value {
            Value::Promise(_) => SlotKind::Promise,
            _ => SlotKind::Object,
        };
        let counter = match kind {
            SlotKind::Promise => &mut self.next_promise,
            _ => &mut self.next_object,
        };
        let slot = Slot::local(kind, *counter);
        *counter += 1;
        self.record(slot, value);
        slot
    }

    /// Register a value received from the peer under `slot` (local view).
    pub(crate) fn import(&mut self, slot: Slot, value: Value, resolver: Option<Resolver>) {
        if let Some(resolver) = resolver {
            self.imports.insert(slot.id, resolver);
        }
        self.record(slot, value);
    }

    /// Allocate a question id and register its result promise.
    pub(crate) fn next_question(&mut self) -> Slot {
        let slot = Slot::peer(SlotKind::Question, self.next_question);
        self.next_question += 1;
        slot
    }

    /// Record an outstanding question and the resolver for its answer.
    pub(crate) fn ask(&mut self, slot: Slot, promise: Promise, resolver: Resolver) {
        self.questions.insert(slot.id, resolver);
        self.record(slot, Value::Promise(promise));
    }

    pub(crate) fn take_question(&mut self, id: u64) -> Option<Resolver> {
        self.questions.remove(&id)
    }

    pub(crate) fn take_import(&mut self, id: u64) -> Option<Resolver> {
        self.imports.remove(&id)
    }

    pub(crate) fn has_answer(&self, id: u64) -> bool {
        self.answers.contains_key(&id)
    }

    /// Keep our answer to the peer's question so later calls can pipeline on it.
    pub(crate) fn answer(&mut self, slot: Slot, promise: Promise) {
        self.answers.insert(slot.id, promise.clone());
        self.record(slot, Value::Promise(promise));
    }

    pub(crate) fn get_answer(&self, id: u64) -> Option<Promise> {
        self.answers.get(&id).cloned()
    }

    /// Remove every pending resolver, for rejection on abort.
    pub(crate) fn drain_pending(&mut self) -> Vec<Resolver> {
        self.questions
            .drain()
            .chain(self.imports.drain())
            .map(|(_, resolver)| resolver)
            .collect()
    }

    pub(crate) fn pending_questions(&self) -> usize {
        self.questions.len()
    }

    pub(crate) fn pending_imports(&self) -> usize {
        self.imports.len()
    }

    pub(crate) fn exports(&self) -> usize {
        self.slots.keys().filter(|s| s.is_local() && s.kind != SlotKind::Question).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Capability;

    struct Nothing;

    impl Capability for Nothing {
        fn invoke(&self, _method: &str, _args: Vec<Value>) -> Promise {
            Promise::resolved(Value::Undefined)
        }
    }

    #[test]
    fn test_counters_start_at_one_and_are_per_kind() {
        let mut tables = Tables::new();
        let a = tables.export(Value::object(Nothing));
        let p = tables.export(Value::Promise(Promise::pending().0));
        let b = tables.export(Value::object(Nothing));
        assert_eq!(a.to_string(), "o+1");
        assert_eq!(p.to_string(), "p+1");
        assert_eq!(b.to_string(), "o+2");
        assert_eq!(tables.next_question().to_string(), "q-1");
        assert_eq!(tables.next_question().to_string(), "q-2");
    }

    #[test]
    fn test_export_is_bijective() {
        let mut tables = Tables::new();
        let object = Value::object(Nothing);
        let slot = tables.export(object.clone());
        assert_eq!(tables.slot_of(&object), Some(slot));
        assert_eq!(tables.value_of(&slot), Some(object));
        assert_eq!(tables.exports(), 1);
    }

    #[test]
    fn test_drain_pending_empties_questions_and_imports() {
        let mut tables = Tables::new();
        let q = tables.next_question();
        let (promise, resolver) = Promise::pending();
        tables.ask(q, promise.clone(), resolver);
        let (import, import_resolver) = Promise::pending();
        tables.import(
            Slot::peer(SlotKind::Promise, 1),
            Value::Promise(import),
            Some(import_resolver),
        );
        assert_eq!(tables.drain_pending().len(), 2);
        assert_eq!(tables.pending_questions(), 0);
        assert_eq!(tables.pending_imports(), 0);
        assert!(tables.take_question(q.id).is_none());
    }
}
