//! A shareable, settle-once promise.
//!
//! [`Promise`] is a cheap handle; clones observe the same settlement. The
//! matching [`Resolver`] is consumed by settling, so a promise is settled at
//! most once. Resolving with another promise adopts that promise's eventual
//! outcome.
//!
//! A promise may carry a [`PromiseHandler`]. Remote promises use it to send
//! eventual operations to the peer before the promise settles (pipelining).
//!
//! Continuations registered with [`Promise::then`] run synchronously on the
//! settling thread, after every internal lock has been released. `Promise`
//! also implements [`Future`] so async code can simply `.await` it.

use crate::value::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Fulfilment value or rejection reason.
pub type Outcome = Result<Value, Value>;

type Callback = Box<dyn FnOnce(Outcome) + Send>;

/// Receives eventual operations sent to a promise that has not settled yet.
pub trait PromiseHandler: Send + Sync {
    fn get(&self, property: &str) -> Promise;
    fn invoke(&self, method: &str, args: Vec<Value>) -> Promise;
}

enum State {
    Pending {
        callbacks: Vec<Callback>,
        wakers: Vec<Waker>,
    },
    Settled(Outcome),
}

struct Shared {
    state: Mutex<State>,
    handler: Option<Arc<dyn PromiseHandler>>,
}

#[derive(Clone)]
pub struct Promise {
    shared: Arc<Shared>,
}

/// The settling half of a pending [`Promise`].
pub struct Resolver {
    promise: Promise,
}

impl Promise {
    fn from_state(state: State, handler: Option<Arc<dyn PromiseHandler>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                handler,
            }),
        }
    }

    fn pending_state() -> State {
        State::Pending {
            callbacks: Vec::new(),
            wakers: Vec::new(),
        }
    }

    pub fn pending() -> (Promise, Resolver) {
        let promise = Self::from_state(Self::pending_state(), None);
        (promise.clone(), Resolver { promise })
    }

    /// A pending promise whose eventual operations go to `handler` until it
    /// settles.
    pub fn pending_with_handler(handler: Arc<dyn PromiseHandler>) -> (Promise, Resolver) {
        let promise = Self::from_state(Self::pending_state(), Some(handler));
        (promise.clone(), Resolver { promise })
    }

    /// A fulfilled promise. A promise value is returned as-is.
    pub fn resolved(value: Value) -> Promise {
        match value {
            Value::Promise(promise) => promise,
            value => Self::from_state(State::Settled(Ok(value)), None),
        }
    }

    pub fn rejected(reason: Value) -> Promise {
        Self::from_state(State::Settled(Err(reason)), None)
    }

    pub fn from_outcome(outcome: Outcome) -> Promise {
        match outcome {
            Ok(value) => Self::resolved(value),
            Err(reason) => Self::rejected(reason),
        }
    }

    /// Run `callback` once this promise settles, or now if it already has.
    pub fn then<F>(&self, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        callback(outcome);
    }

    /// The outcome, if settled.
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.lock() {
            State::Pending { .. } => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(&*self.lock(), State::Settled(_))
    }

    pub fn handler(&self) -> Option<Arc<dyn PromiseHandler>> {
        self.shared.handler.clone()
    }

    /// Identity of the shared promise state; equal for all clones.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.shared) as *const () as usize
    }

    pub fn same(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false if the promise had already settled.
    fn settle(&self, outcome: Outcome) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, State::Settled(outcome.clone())) {
                State::Pending { callbacks, wakers } => (callbacks, wakers),
                settled @ State::Settled(_) => {
                    *state = settled;
                    return false;
                }
            }
        };
        for callback in callbacks {
            callback(outcome.clone());
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

impl Resolver {
    /// The promise this resolver settles.
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Fulfil with `value`, or adopt it if it is itself a promise.
    pub fn resolve(self, value: Value) {
        match value {
            Value::Promise(other) if other.same(&self.promise) => {
                self.promise.settle(Err(Value::error(
                    "Cannot resolve a promise with itself",
                )));
            }
            Value::Promise(other) => {
                let target = self.promise;
                other.then(move |outcome| {
                    target.settle(outcome);
                });
            }
            value => {
                self.promise.settle(Ok(value));
            }
        }
    }

    pub fn reject(self, reason: Value) {
        self.promise.settle(Err(reason));
    }

    pub fn settle(self, outcome: Outcome) {
        match outcome {
            Ok(value) => self.resolve(value),
            Err(reason) => self.reject(reason),
        }
    }
}

impl Future for Promise {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.lock();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.lock() {
            State::Pending { .. } => write!(f, "Promise(pending)"),
            State::Settled(Ok(value)) => write!(f, "Promise(fulfilled: {value:?})"),
            State::Settled(Err(reason)) => write!(f, "Promise(rejected: {reason:?})"),
        }
    }
}
