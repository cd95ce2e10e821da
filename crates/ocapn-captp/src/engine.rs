//! The CapTP engine: one per session.
//!
//! Inbound messages enter through [`CapTp::dispatch`]; outbound messages leave
//! through the [`MessageSink`] supplied at construction. Eventual operations
//! on imported references are turned into `CTP_CALL`s by [`RemoteTarget`].
//!
//! Locking: the tables mutex is only held while reading or writing tables.
//! It is released before any send, any promise settlement and any user code,
//! so a peer that answers synchronously (an in-process loopback) can re-enter
//! the engine safely. Deliveries of `CTP_CALL` and outbound settlements run
//! as jobs on the engine's run queue, in FIFO order.

use crate::error::{CapTpError, CapTpResult};
use crate::eventual;
use crate::message::{one_of, CapTpMessage, WireMethod, WireValue};
use crate::promise::{Outcome, Promise, PromiseHandler};
use crate::slot::{Slot, SlotKind};
use crate::tables::Tables;
use crate::value::{Capability, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Deepest value nesting that will be serialized.
pub const MAX_VALUE_DEPTH: usize = 64;

/// Outbound half of a connection.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: CapTpMessage) -> CapTpResult<()>;
}

impl<F> MessageSink for F
where
    F: Fn(CapTpMessage) -> CapTpResult<()> + Send + Sync,
{
    fn send(&self, message: CapTpMessage) -> CapTpResult<()> {
        self(message)
    }
}

/// The object handed to the peer in answer to `CTP_BOOTSTRAP`.
#[derive(Clone)]
pub enum Bootstrap {
    /// Built up front.
    Value(Value),
    /// Computed on the first request and cached.
    Lazy(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Bootstrap {
    pub fn lazy<F>(make: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Bootstrap::Lazy(Arc::new(make))
    }
}

/// Observer called with every newly allocated export or import slot.
pub type SlotHook = Arc<dyn Fn(Slot, &Value) + Send + Sync>;

#[derive(Clone, Default)]
pub struct CapTpOptions {
    /// Name used in log lines.
    pub label: String,
    /// Tag put on every outgoing message; mismatched inbound messages are dropped.
    pub epoch: u64,
    /// Answer to the peer's `CTP_BOOTSTRAP`. Requests are rejected when absent.
    pub bootstrap: Option<Bootstrap>,
    /// Called for every new export slot.
    pub export_hook: Option<SlotHook>,
    /// Called for every new import slot.
    pub import_hook: Option<SlotHook>,
}

/// Message counters and table sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapTpStats {
    /// Messages sent, by `CTP_*` kind.
    pub sent: BTreeMap<&'static str, u64>,
    /// Messages received, by `CTP_*` kind.
    pub received: BTreeMap<&'static str, u64>,
    /// Questions still waiting for a `CTP_RETURN`.
    pub pending_questions: usize,
    /// Imported promises the peer has not resolved.
    pub pending_imports: usize,
    /// Local objects and promises handed to the peer.
    pub exports: usize,
}

type Job = Box<dyn FnOnce(&CapTp) + Send>;

#[derive(Default)]
struct RunQueue {
    jobs: VecDeque<Job>,
    draining: bool,
}

struct Inner {
    label: String,
    epoch: u64,
    sink: Box<dyn MessageSink>,
    bootstrap: Mutex<Option<Bootstrap>>,
    tables: Mutex<Tables>,
    queue: Mutex<RunQueue>,
    aborted: Mutex<Option<Value>>,
    /// Cancels settlement hooks attached at export time.
    hooks_cancelled: AtomicBool,
    stats: Mutex<CapTpStats>,
    export_hook: Option<SlotHook>,
    import_hook: Option<SlotHook>,
}

/// Handle to a CapTP engine. Clones share the same connection state.
#[derive(Clone)]
pub struct CapTp {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CapTp {
    pub fn new<S: MessageSink + 'static>(sink: S, options: CapTpOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: options.label,
                epoch: options.epoch,
                sink: Box::new(sink),
                bootstrap: Mutex::new(options.bootstrap),
                tables: Mutex::new(Tables::new()),
                queue: Mutex::new(RunQueue::default()),
                aborted: Mutex::new(None),
                hooks_cancelled: AtomicBool::new(false),
                stats: Mutex::new(CapTpStats::default()),
                export_hook: options.export_hook,
                import_hook: options.import_hook,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch
    }

    pub fn is_aborted(&self) -> bool {
        lock(&self.inner.aborted).is_some()
    }

    /// The reason given when the engine was aborted.
    pub fn abort_reason(&self) -> Option<Value> {
        lock(&self.inner.aborted).clone()
    }

    /// Counters plus a snapshot of the table sizes.
    pub fn stats(&self) -> CapTpStats {
        let mut stats = lock(&self.inner.stats).clone();
        let tables = lock(&self.inner.tables);
        stats.pending_questions = tables.pending_questions();
        stats.pending_imports = tables.pending_imports();
        stats.exports = tables.exports();
        stats
    }

    /// True if `value` holds no reference the peer gave us, at any depth.
    ///
    /// Imported objects and promises and our own unanswered questions are
    /// remote. Data, local objects and local promises are not.
    pub fn is_only_local(&self, value: &Value) -> bool {
        let tables = lock(&self.inner.tables);
        let mut stack = vec![value];
        while let Some(next) = stack.pop() {
            match next {
                Value::List(items) => stack.extend(items),
                Value::Record(fields) => stack.extend(fields.values()),
                other => {
                    if tables.is_remote(other) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Ask the peer for its bootstrap object.
    pub fn get_bootstrap(&self) -> Promise {
        if let Some(reason) = self.abort_reason() {
            return Promise::rejected(reason);
        }
        let (question, promise) = self.ask();
        self.send(CapTpMessage::Bootstrap {
            epoch: self.inner.epoch,
            question_id: question,
        });
        promise
    }

    /// Terminate the connection: reject everything pending and tell the peer.
    pub fn abort(&self, reason: Value) {
        self.terminate(reason, true);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Handle one inbound message. Returns false once the engine is aborted
    /// and for messages that violate the protocol.
    pub fn dispatch(&self, message: CapTpMessage) -> bool {
        if self.is_aborted() {
            debug!(label = %self.inner.label, kind = message.kind(), "Ignoring message after abort");
            return false;
        }
        *lock(&self.inner.stats)
            .received
            .entry(message.kind())
            .or_default() += 1;
        if message.epoch() != self.inner.epoch {
            warn!(
                label = %self.inner.label,
                kind = message.kind(),
                epoch = message.epoch(),
                expected = self.inner.epoch,
                "Dropping message from another epoch"
            );
            return false;
        }
        debug!(label = %self.inner.label, kind = message.kind(), "Dispatching");

        let result = match message {
            CapTpMessage::Bootstrap { question_id, .. } => self.handle_bootstrap(question_id),
            CapTpMessage::Call {
                question_id,
                target,
                method,
                ..
            } => self.handle_call(question_id, target, method),
            CapTpMessage::Return {
                answer_id,
                result,
                exception,
                ..
            } => self.handle_return(answer_id, result, exception),
            CapTpMessage::Resolve {
                promise_id,
                res,
                rej,
                ..
            } => self.handle_resolve(promise_id, res, rej),
            CapTpMessage::Abort { exception, .. } => {
                self.handle_abort(exception);
                Ok(())
            }
        };
        self.drain();

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(label = %self.inner.label, error = %e, "CapTP protocol error");
                false
            }
        }
    }

    fn handle_bootstrap(&self, question_id: Slot) -> CapTpResult<()> {
        let answer_slot = self.answer_slot(question_id, "CTP_BOOTSTRAP")?;
        let answer = match self.bootstrap_value() {
            Some(value) => Promise::resolved(value),
            None => Promise::rejected(Value::error("No bootstrap object")),
        };
        lock(&self.inner.tables).answer(answer_slot, answer.clone());
        self.return_when_settled(answer_slot, answer);
        Ok(())
    }

    fn handle_call(&self, question_id: Slot, target: Slot, method: WireMethod) -> CapTpResult<()> {
        let answer_slot = self.answer_slot(question_id, "CTP_CALL")?;
        let target_slot = target.flip();

        let mut imported = Vec::new();
        let prepared = {
            let mut tables = lock(&self.inner.tables);
            let target_value = match (target_slot.is_local(), target_slot.kind) {
                (true, SlotKind::Question) => tables.get_answer(target_slot.id).map(Value::Promise),
                (true, _) => tables.value_of(&target_slot),
                (false, _) => None,
            };
            match target_value {
                None => Err(CapTpError::UnknownTarget(target_slot)),
                Some(target_value) => {
                    let op = match method {
                        WireMethod::Get((property,)) => Ok(PendingOp::Get(property)),
                        WireMethod::Invoke(name, args) => args
                            .into_iter()
                            .map(|arg| self.from_wire(&mut tables, arg, &mut imported, 0))
                            .collect::<CapTpResult<Vec<_>>>()
                            .map(|args| PendingOp::Invoke(name, args)),
                    };
                    op.map(|op| {
                        let (answer, resolver) = Promise::pending();
                        tables.answer(answer_slot, answer.clone());
                        (target_value, op, answer, resolver)
                    })
                }
            }
        };
        self.notify_imports(imported);

        let (target_value, op, answer, resolver) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.send(CapTpMessage::Return {
                    epoch: self.inner.epoch,
                    answer_id: answer_slot,
                    result: None,
                    exception: Some(WireValue::Error(e.to_string())),
                });
                return Err(e);
            }
        };

        self.return_when_settled(answer_slot, answer);
        self.enqueue(Box::new(move |_engine: &CapTp| {
            let result = match op {
                PendingOp::Get(property) => eventual::get(&target_value, &property),
                PendingOp::Invoke(method, args) => eventual::send(&target_value, &method, args),
            };
            resolver.resolve(Value::Promise(result));
        }));
        Ok(())
    }

    fn handle_return(
        &self,
        answer_id: Slot,
        result: Option<WireValue>,
        exception: Option<WireValue>,
    ) -> CapTpResult<()> {
        let question = answer_id.flip();
        if question.is_local() || question.kind != SlotKind::Question {
            return Err(CapTpError::UnknownQuestion(question));
        }
        let resolver = lock(&self.inner.tables)
            .take_question(question.id)
            .ok_or(CapTpError::UnknownQuestion(question))?;
        match self.settlement("CTP_RETURN", result, exception) {
            Ok(outcome) => {
                resolver.settle(outcome);
                Ok(())
            }
            Err(e) => {
                resolver.reject(Value::error(e.to_string()));
                Err(e)
            }
        }
    }

    fn handle_resolve(
        &self,
        promise_id: Slot,
        res: Option<WireValue>,
        rej: Option<WireValue>,
    ) -> CapTpResult<()> {
        let import = promise_id.flip();
        if import.is_local() {
            return Err(CapTpError::NotExporter(import));
        }
        if import.kind != SlotKind::Promise {
            return Err(CapTpError::UnknownImport(import));
        }
        let resolver = lock(&self.inner.tables)
            .take_import(import.id)
            .ok_or(CapTpError::UnknownImport(import))?;
        match self.settlement("CTP_RESOLVE", res, rej) {
            Ok(outcome) => {
                resolver.settle(outcome);
                Ok(())
            }
            Err(e) => {
                resolver.reject(Value::error(e.to_string()));
                Err(e)
            }
        }
    }

    fn handle_abort(&self, exception: WireValue) {
        let reason = {
            let mut tables = lock(&self.inner.tables);
            let mut imported = Vec::new();
            self.from_wire(&mut tables, exception, &mut imported, 0)
                .unwrap_or_else(|_| Value::error("CapTP connection aborted by peer"))
        };
        warn!(label = %self.inner.label, reason = %reason.describe(), "Peer aborted CapTP connection");
        self.terminate(reason, true);
    }

    /// Check that a question id names a fresh answer slot on our side.
    fn answer_slot(&self, question_id: Slot, kind: &'static str) -> CapTpResult<Slot> {
        let slot = question_id.flip();
        if !slot.is_local() || slot.kind != SlotKind::Question {
            return Err(CapTpError::Malformed {
                kind,
                reason: format!("questionID {question_id} is not a question we can answer"),
            });
        }
        if lock(&self.inner.tables).has_answer(slot.id) {
            return Err(CapTpError::DuplicateQuestion(slot));
        }
        Ok(slot)
    }

    fn settlement(
        &self,
        kind: &'static str,
        ok: Option<WireValue>,
        err: Option<WireValue>,
    ) -> CapTpResult<Outcome> {
        let wire = one_of(kind, ok, err)?;
        let mut imported = Vec::new();
        let outcome = {
            let mut tables = lock(&self.inner.tables);
            match wire {
                Ok(value) => Ok(self.from_wire(&mut tables, value, &mut imported, 0)?),
                Err(reason) => Err(self.from_wire(&mut tables, reason, &mut imported, 0)?),
            }
        };
        self.notify_imports(imported);
        Ok(outcome)
    }

    fn bootstrap_value(&self) -> Option<Value> {
        let bootstrap = lock(&self.inner.bootstrap).clone()?;
        match bootstrap {
            Bootstrap::Value(value) => Some(value),
            Bootstrap::Lazy(make) => {
                let value = make();
                *lock(&self.inner.bootstrap) = Some(Bootstrap::Value(value.clone()));
                Some(value)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Allocate a question whose result promise pipelines to the peer.
    fn ask(&self) -> (Slot, Promise) {
        let mut tables = lock(&self.inner.tables);
        let slot = tables.next_question();
        let handler = Arc::new(RemoteTarget::new(&self.inner, slot));
        let (promise, resolver) = Promise::pending_with_handler(handler);
        tables.ask(slot, promise.clone(), resolver);
        (slot, promise)
    }

    /// Send an eventual operation to a peer-owned slot.
    pub(crate) fn call(&self, target: Slot, method: &str, args: Option<Vec<Value>>) -> Promise {
        if let Some(reason) = self.abort_reason() {
            return Promise::rejected(reason);
        }

        let mut exported = Vec::new();
        let wire_method = {
            let mut tables = lock(&self.inner.tables);
            match args {
                None => Ok(WireMethod::get(method)),
                Some(args) => args
                    .iter()
                    .map(|arg| self.to_wire(&mut tables, arg, &mut exported, 0))
                    .collect::<CapTpResult<Vec<_>>>()
                    .map(|args| WireMethod::Invoke(method.to_string(), args)),
            }
        };
        let wire_method = match wire_method {
            Ok(wire_method) => wire_method,
            Err(e) => {
                self.notify_exports(exported);
                return Promise::rejected(Value::error(e.to_string()));
            }
        };
        let (question, promise) = self.ask();
        self.send(CapTpMessage::Call {
            epoch: self.inner.epoch,
            question_id: question,
            target,
            method: wire_method,
        });
        // Settlement hooks may send CTP_RESOLVE at once; the slot must be
        // on the wire first.
        self.notify_exports(exported);
        promise
    }

    /// Queue a `CTP_RETURN` for `answer` once it settles.
    fn return_when_settled(&self, answer_slot: Slot, answer: Promise) {
        let weak = Arc::downgrade(&self.inner);
        answer.then(move |outcome| {
            if let Some(inner) = weak.upgrade() {
                let engine = CapTp { inner };
                engine.enqueue(Box::new(move |engine: &CapTp| {
                    engine.send_settlement(answer_slot, outcome)
                }));
                engine.drain();
            }
        });
    }

    /// Queue a `CTP_RESOLVE` for an exported promise once it settles.
    fn resolve_when_settled(&self, export_slot: Slot, promise: Promise) {
        let weak = Arc::downgrade(&self.inner);
        promise.then(move |outcome| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.hooks_cancelled.load(Ordering::SeqCst) {
                return;
            }
            let engine = CapTp { inner };
            engine.enqueue(Box::new(move |engine: &CapTp| {
                engine.send_settlement(export_slot, outcome)
            }));
            engine.drain();
        });
    }

    /// Serialize an outcome and send it as `CTP_RETURN` (for answers) or
    /// `CTP_RESOLVE` (for exported promises).
    fn send_settlement(&self, slot: Slot, outcome: Outcome) {
        let mut exported = Vec::new();
        let wire = {
            let mut tables = lock(&self.inner.tables);
            match &outcome {
                Ok(value) => match self.to_wire(&mut tables, value, &mut exported, 0) {
                    Ok(wire) => Ok(wire),
                    Err(e) => Err(WireValue::Error(format!("Unserializable result: {e}"))),
                },
                Err(reason) => Err(self
                    .to_wire(&mut tables, reason, &mut exported, 0)
                    .unwrap_or_else(|e| WireValue::Error(reason.describe() + &format!(" ({e})")))),
            }
        };
        let (ok, err) = match wire {
            Ok(value) => (Some(value), None),
            Err(reason) => (None, Some(reason)),
        };
        let epoch = self.inner.epoch;
        let message = if slot.kind == SlotKind::Question {
            CapTpMessage::Return {
                epoch,
                answer_id: slot,
                result: ok,
                exception: err,
            }
        } else {
            CapTpMessage::Resolve {
                epoch,
                promise_id: slot,
                res: ok,
                rej: err,
            }
        };
        self.send(message);
        self.notify_exports(exported);
    }

    fn send(&self, message: CapTpMessage) {
        if self.is_aborted() {
            debug!(label = %self.inner.label, kind = message.kind(), "Dropping outbound message after abort");
            return;
        }
        *lock(&self.inner.stats).sent.entry(message.kind()).or_default() += 1;
        debug!(label = %self.inner.label, kind = message.kind(), "Sending");
        if let Err(e) = self.inner.sink.send(message) {
            warn!(label = %self.inner.label, error = %e, "CapTP send failed, aborting");
            self.terminate(Value::error(e.to_string()), false);
        }
    }

    fn terminate(&self, reason: Value, notify_peer: bool) {
        {
            let mut aborted = lock(&self.inner.aborted);
            if aborted.is_some() {
                return;
            }
            *aborted = Some(reason.clone());
        }
        self.inner.hooks_cancelled.store(true, Ordering::SeqCst);
        lock(&self.inner.queue).jobs.clear();
        info!(label = %self.inner.label, reason = %reason.describe(), "CapTP connection aborted");

        let pending = lock(&self.inner.tables).drain_pending();
        for resolver in pending {
            resolver.reject(reason.clone());
        }

        if notify_peer {
            let exception = {
                let mut tables = lock(&self.inner.tables);
                let mut exported = Vec::new();
                self.to_wire(&mut tables, &reason, &mut exported, 0)
                    .unwrap_or_else(|_| WireValue::Error(reason.describe()))
            };
            *lock(&self.inner.stats).sent.entry("CTP_ABORT").or_default() += 1;
            if let Err(e) = self.inner.sink.send(CapTpMessage::Abort {
                epoch: self.inner.epoch,
                exception,
            }) {
                debug!(label = %self.inner.label, error = %e, "Could not forward CTP_ABORT");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run queue
    // -----------------------------------------------------------------------

    fn enqueue(&self, job: Job) {
        if self.is_aborted() {
            return;
        }
        lock(&self.inner.queue).jobs.push_back(job);
    }

    /// Run queued jobs until the queue is empty. Re-entrant calls return
    /// immediately; the outer drain picks up their jobs.
    fn drain(&self) {
        {
            let mut queue = lock(&self.inner.queue);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        loop {
            let job = {
                let mut queue = lock(&self.inner.queue);
                match queue.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            job(self);
        }
    }

    // -----------------------------------------------------------------------
    // Slot translation
    // -----------------------------------------------------------------------

    fn to_wire(
        &self,
        tables: &mut Tables,
        value: &Value,
        exported: &mut Vec<(Slot, Value)>,
        depth: usize,
    ) -> CapTpResult<WireValue> {
        if depth > MAX_VALUE_DEPTH {
            return Err(CapTpError::TooDeep(MAX_VALUE_DEPTH));
        }
        Ok(match value {
            Value::Undefined => WireValue::Undefined,
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int(i) => WireValue::Int(*i),
            Value::String(s) => WireValue::String(s.clone()),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::Error(message) => WireValue::Error(message.clone()),
            Value::List(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.to_wire(tables, item, exported, depth + 1))
                    .collect::<CapTpResult<_>>()?,
            ),
            Value::Record(fields) => WireValue::Record(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.to_wire(tables, v, exported, depth + 1)?)))
                    .collect::<CapTpResult<_>>()?,
            ),
            Value::Object(_) | Value::Promise(_) => match tables.slot_of(value) {
                Some(slot) => WireValue::Slot(slot),
                None => {
                    let slot = tables.export(value.clone());
                    exported.push((slot, value.clone()));
                    WireValue::Slot(slot)
                }
            },
        })
    }

    fn from_wire(
        &self,
        tables: &mut Tables,
        wire: WireValue,
        imported: &mut Vec<(Slot, Value)>,
        depth: usize,
    ) -> CapTpResult<Value> {
        if depth > MAX_VALUE_DEPTH {
            return Err(CapTpError::TooDeep(MAX_VALUE_DEPTH));
        }
        Ok(match wire {
            WireValue::Undefined => Value::Undefined,
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::Int(i),
            WireValue::String(s) => Value::String(s),
            WireValue::Bytes(b) => Value::Bytes(b),
            WireValue::Error(message) => Value::Error(message),
            WireValue::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.from_wire(tables, item, imported, depth + 1))
                    .collect::<CapTpResult<_>>()?,
            ),
            WireValue::Record(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, self.from_wire(tables, v, imported, depth + 1)?)))
                    .collect::<CapTpResult<_>>()?,
            ),
            WireValue::Slot(sent) => {
                let slot = sent.flip();
                if let Some(value) = tables.value_of(&slot) {
                    return Ok(value);
                }
                if slot.is_local() {
                    return Err(CapTpError::UnknownSlot(slot));
                }
                let remote = Arc::new(RemoteTarget::new(&self.inner, slot));
                let value = match slot.kind {
                    SlotKind::Object => {
                        let value = Value::Object(remote);
                        tables.import(slot, value.clone(), None);
                        value
                    }
                    SlotKind::Promise => {
                        let (promise, resolver) = Promise::pending_with_handler(remote);
                        let value = Value::Promise(promise);
                        tables.import(slot, value.clone(), Some(resolver));
                        value
                    }
                    SlotKind::Question => return Err(CapTpError::UnknownSlot(slot)),
                };
                imported.push((slot, value.clone()));
                value
            }
        })
    }

    fn notify_exports(&self, exported: Vec<(Slot, Value)>) {
        for (slot, value) in exported {
            debug!(label = %self.inner.label, %slot, "Exported");
            if let Some(hook) = &self.inner.export_hook {
                hook(slot, &value);
            }
            if let Value::Promise(promise) = value {
                self.resolve_when_settled(slot, promise);
            }
        }
    }

    fn notify_imports(&self, imported: Vec<(Slot, Value)>) {
        for (slot, value) in imported {
            debug!(label = %self.inner.label, %slot, "Imported");
            if let Some(hook) = &self.inner.import_hook {
                hook(slot, &value);
            }
        }
    }
}

impl std::fmt::Debug for CapTp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapTp")
            .field("label", &self.inner.label)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

enum PendingOp {
    Get(String),
    Invoke(String, Vec<Value>),
}

/// A reference to something the peer hosts: an imported object, an imported
/// promise, or the answer to one of our questions.
pub(crate) struct RemoteTarget {
    engine: Weak<Inner>,
    slot: Slot,
    interface: String,
}

impl RemoteTarget {
    fn new(engine: &Arc<Inner>, slot: Slot) -> Self {
        Self {
            engine: Arc::downgrade(engine),
            slot,
            interface: format!("Alleged: remote {slot}"),
        }
    }

    fn deliver(&self, method: &str, args: Option<Vec<Value>>) -> Promise {
        match self.engine.upgrade() {
            Some(inner) => CapTp { inner }.call(self.slot, method, args),
            None => Promise::rejected(Value::error("CapTP connection closed")),
        }
    }
}

impl Capability for RemoteTarget {
    fn get(&self, property: &str) -> Promise {
        self.deliver(property, None)
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Promise {
        self.deliver(method, Some(args))
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}

impl PromiseHandler for RemoteTarget {
    fn get(&self, property: &str) -> Promise {
        self.deliver(property, None)
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Promise {
        self.deliver(method, Some(args))
    }
}
