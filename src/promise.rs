//! The promise state machine: settlement, handler chains, flattening of
//! nested promises and the blocking join.
use crate::{completion::Completion, Builder, Error, Settled};
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, error, trace, warn};

/// Settles a promise as fulfilled. Calls after the first settlement are
/// ignored.
pub type Resolve<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Settles a promise as rejected. Calls after the first settlement are
/// ignored.
pub type Reject<E> = Arc<dyn Fn(E) + Send + Sync>;

type Fulfillment<T, E> = Box<dyn FnOnce(T) -> Step<T, E> + Send>;

type Rejection<E> = Box<dyn FnOnce(E) -> E + Send>;

/// Waits for a nested promise and copies its outcome. `None` when it
/// settled without a value to report.
type Adopt<T, E> = Box<dyn FnOnce() -> Option<Result<T, E>> + Send>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a promise. `Pending` moves to exactly one of the two
/// terminal states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// The executor has not settled the promise yet.
    Pending,
    /// Settled through `resolve`.
    Fulfilled,
    /// Settled through `reject` or an executor panic.
    Rejected,
}

impl State {
    /// `true` once the promise left `Pending`.
    pub fn is_settled(self) -> bool {
        self != State::Pending
    }
}

/// What a fulfillment handler produced.
enum Step<T, E> {
    Value(T),
    /// A nested promise, identified by id, whose outcome replaces the
    /// handler's result.
    Chain { nested: u64, adopt: Adopt<T, E> },
}

/// A handle to a value computed by an executor running on its own thread.
///
/// Handlers attached with [`then`](Self::then), [`and_then`](Self::and_then)
/// and [`catch`](Self::catch) all act on this one promise and return it, so
/// fulfillment handlers form a pipeline over a single result slot and
/// rejection handlers over a single error slot. Cloning the handle does not
/// fork the chain.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
///
/// let promise = Promise::<i32>::new(|resolve, _reject| resolve(2));
/// promise.then(|v| v + 1).then(|v| v * 2);
/// promise.wait();
/// assert_eq!(promise.result(), Some(6));
/// ```
///
/// Rejections run every `catch` handler in order, each seeing what the
/// previous one returned:
///
/// ```
/// use promise_chain::{Error, Promise};
///
/// let promise = Promise::<(), Error>::new(|_resolve, reject| reject(Error::msg("disk full")));
/// promise
///     .catch(|e| Error::msg(format!("retry later: {e}")))
///     .catch(|e| e);
/// promise.wait();
/// assert_eq!(promise.error().map(|e| e.to_string()).as_deref(), Some("retry later: disk full"));
/// ```
pub struct Promise<T, E = Error> {
    shared: Arc<Shared<T, E>>,
}

struct Shared<T, E> {
    id: u64,
    inner: Mutex<Inner<T, E>>,
    completion: Arc<Completion>,
}

struct Inner<T, E> {
    state: State,
    result: Option<T>,
    error: Option<E>,
    on_fulfilled: Vec<Fulfillment<T, E>>,
    on_rejected: Vec<Rejection<E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Promise");
        debug.field("id", &self.shared.id);
        // A handler may be running under the lock; don't wait for it.
        match self.shared.inner.try_lock() {
            Some(inner) => debug.field("state", &inner.state),
            None => debug.field("state", &"<locked>"),
        };
        debug
            .field("outstanding", &self.shared.completion.outstanding())
            .finish()
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + 'static,
    E: From<Error> + Send + 'static,
{
    /// Starts `executor` on a new thread and returns the pending promise
    /// without waiting for it.
    ///
    /// If the executor panics before settling, the promise is rejected with
    /// an [`Error::Panicked`] converted into `E`.
    ///
    /// # Panics
    ///
    /// Panics if the OS fails to create a thread, like
    /// [`std::thread::spawn`]. Use [`Builder::spawn`] to handle that case.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolve<T>, Reject<E>) + Send + 'static,
    {
        Builder::new()
            .spawn(executor)
            .unwrap_or_else(|error| panic!("{error}"))
    }

    /// A promise that is already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        let promise = Self::pending();
        promise.resolve(value);
        promise
    }

    /// A promise that is already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        let promise = Self::pending();
        promise.reject(error);
        promise
    }

    pub(crate) fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                inner: Mutex::new(Inner {
                    state: State::Pending,
                    result: None,
                    error: None,
                    on_fulfilled: Vec::new(),
                    on_rejected: Vec::new(),
                }),
                completion: Arc::default(),
            }),
        }
    }

    /// Body of the executor thread.
    pub(crate) fn run<F>(self, executor: F)
    where
        F: FnOnce(Resolve<T>, Reject<E>),
    {
        let resolve: Resolve<T> = {
            let promise = self.clone();
            Arc::new(move |value: T| {
                promise.resolve(value);
            })
        };
        let reject: Reject<E> = {
            let promise = self.clone();
            Arc::new(move |error: E| {
                promise.reject(error);
            })
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || executor(resolve, reject)));
        if let Err(payload) = outcome {
            self.recover(payload);
        }
    }

    fn recover(&self, payload: Box<dyn Any + Send>) {
        if self.state().is_settled() {
            // Only a panic before settlement becomes a rejection. A handler
            // fault, or an executor panicking after it settled, keeps
            // unwinding this thread with its original payload.
            error!(promise = self.id(), "panic on executor thread after settlement");
            panic::resume_unwind(payload);
        }
        let error = Error::from_panic(payload);
        warn!(promise = self.id(), %error, "executor panicked, rejecting promise");
        if !self.reject(E::from(error)) {
            warn!(promise = self.id(), "promise settled elsewhere while executor unwound");
        }
    }

    fn resolve(&self, value: T) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state != State::Pending {
            trace!(promise = self.id(), state = ?inner.state, "resolve ignored");
            return false;
        }
        inner.state = State::Fulfilled;

        let handlers = mem::take(&mut inner.on_fulfilled);
        let total = handlers.len();
        debug!(promise = self.id(), handlers = total, "promise fulfilled");
        let mut current = value;
        for (index, handler) in handlers.into_iter().enumerate() {
            match self.apply(handler, current) {
                Some(Ok(next)) => current = next,
                Some(Err(error)) => {
                    // The current handler and everything after it are owed.
                    debug!(
                        promise = self.id(),
                        skipped = total - index - 1,
                        "nested promise rejected, short-circuiting fulfillment chain"
                    );
                    self.shared.completion.release(total - index);
                    let rejections = mem::take(&mut inner.on_rejected);
                    self.run_rejections(rejections, error);
                    return true;
                }
                None => {
                    warn!(
                        promise = self.id(),
                        "nested promise settled without an outcome, abandoning fulfillment chain"
                    );
                    let bypassed = mem::take(&mut inner.on_rejected).len();
                    self.shared.completion.release(total - index + bypassed);
                    return true;
                }
            }
            self.shared.completion.release(1);
        }
        inner.result = Some(current);

        let bypassed = mem::take(&mut inner.on_rejected).len();
        self.shared.completion.release(bypassed);
        true
    }

    fn reject(&self, error: E) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state != State::Pending {
            trace!(promise = self.id(), state = ?inner.state, "reject ignored");
            return false;
        }
        // Marked before the handlers run so a panicking handler is not
        // mistaken for an executor panic.
        inner.state = State::Rejected;
        let bypassed = mem::take(&mut inner.on_fulfilled).len();
        self.shared.completion.release(bypassed);

        let handlers = mem::take(&mut inner.on_rejected);
        debug!(promise = self.id(), handlers = handlers.len(), "promise rejected");
        inner.error = Some(self.run_rejections(handlers, error));
        true
    }

    /// Runs `handlers` in order over `error`, paying one unit per handler.
    fn run_rejections(&self, handlers: Vec<Rejection<E>>, error: E) -> E {
        let mut current = error;
        for handler in handlers {
            current = handler(current);
            self.shared.completion.release(1);
        }
        current
    }

    fn apply(&self, handler: Fulfillment<T, E>, value: T) -> Option<Result<T, E>> {
        match handler(value) {
            Step::Value(next) => Some(Ok(next)),
            Step::Chain { nested, adopt } => {
                if nested == self.id() {
                    return Some(Err(E::from(Error::SelfChain)));
                }
                trace!(promise = self.id(), nested, "waiting on nested promise");
                adopt()
            }
        }
    }

    fn push_fulfillment(&self, handler: Fulfillment<T, E>) -> &Self {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            State::Pending => {
                self.shared.completion.add(1);
                inner.on_fulfilled.push(handler);
                trace!(promise = self.id(), "fulfillment handler registered");
            }
            State::Fulfilled => {
                // Empty only after the chain was abandoned or short-circuited.
                if let Some(value) = inner.result.take() {
                    inner.result = match self.apply(handler, value) {
                        Some(Ok(next)) => Some(next),
                        Some(Err(_)) => {
                            warn!(
                                promise = self.id(),
                                "nested promise rejected after fulfillment, no rejection handlers remain"
                            );
                            None
                        }
                        None => None,
                    };
                }
            }
            State::Rejected => {}
        }
        self
    }

    fn push_rejection(&self, handler: Rejection<E>) -> &Self {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            State::Pending => {
                self.shared.completion.add(1);
                inner.on_rejected.push(handler);
                trace!(promise = self.id(), "rejection handler registered");
            }
            State::Rejected => {
                // Empty only if an earlier handler panicked mid-chain.
                if let Some(error) = inner.error.take() {
                    inner.error = Some(handler(error));
                }
            }
            State::Fulfilled => {}
        }
        self
    }

    /// Appends a fulfillment handler whose return value replaces the result.
    ///
    /// While pending the handler is queued behind earlier ones. Once
    /// fulfilled it runs immediately, before `then` returns. On a rejected
    /// promise it is dropped without being called.
    pub fn then<F>(&self, fulfillment: F) -> &Self
    where
        F: FnOnce(T) -> T + Send + 'static,
    {
        self.push_fulfillment(Box::new(move |value| Step::Value(fulfillment(value))))
    }

    /// Appends a rejection handler whose return value replaces the error.
    ///
    /// Every rejection handler runs exactly once per rejection, whatever
    /// earlier handlers returned. On a rejected promise the handler runs
    /// immediately; on a fulfilled one it is dropped.
    pub fn catch<F>(&self, rejection: F) -> &Self
    where
        F: FnOnce(E) -> E + Send + 'static,
    {
        self.push_rejection(Box::new(rejection))
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + From<Error> + Send + 'static,
{
    /// Like [`then`](Self::then), but the handler returns another promise.
    ///
    /// The settling thread blocks until that promise settles. A copy of its
    /// value becomes the result seen by the next handler. If it rejects, the
    /// remaining fulfillment handlers are skipped and this promise's `catch`
    /// handlers receive a copy of the nested error. The nested promise keeps
    /// its own outcome and its own handlers still run.
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let promise = Promise::<i32>::new(|resolve, _reject| resolve(1));
    /// promise
    ///     .and_then(|_| Promise::new(|resolve, _reject| resolve(228)))
    ///     .then(|v| v);
    /// promise.wait();
    /// assert_eq!(promise.result(), Some(228));
    /// ```
    pub fn and_then<F>(&self, fulfillment: F) -> &Self
    where
        F: FnOnce(T) -> Promise<T, E> + Send + 'static,
    {
        self.push_fulfillment(Box::new(move |value| {
            let nested = fulfillment(value);
            Step::Chain {
                nested: nested.id(),
                adopt: Box::new(move || nested.outcome()),
            }
        }))
    }

    /// Blocks until this promise settles and reports copies of its outcome.
    ///
    /// The continuations hand back what they received, so later handlers on
    /// this promise see the same value or error. They only touch a private
    /// slot, so an adopting promise may keep holding its own lock.
    fn outcome(&self) -> Option<Result<T, E>> {
        let slot: Arc<Mutex<Option<Result<T, E>>>> = Arc::new(Mutex::new(None));
        let on_value = Arc::clone(&slot);
        let on_error = Arc::clone(&slot);
        self.push_fulfillment(Box::new(move |value: T| {
            *on_value.lock() = Some(Ok(value.clone()));
            Step::Value(value)
        }))
        .push_rejection(Box::new(move |error: E| {
            *on_error.lock() = Some(Err(error.clone()));
            error
        }));
        self.wait();

        let outcome = slot.lock().take();
        outcome
    }
}

impl<T, E> Promise<T, E> {
    /// Blocks until every handler registered while pending has run or been
    /// bypassed.
    ///
    /// Returns at once when nothing was registered, even if the promise is
    /// still pending. There is no timeout: an executor that never settles
    /// blocks this forever.
    pub fn wait(&self) {
        self.shared.completion.wait()
    }

    /// Async counterpart of [`wait`](Self::wait).
    pub fn settled(&self) -> Settled {
        Settled::new(Arc::clone(&self.shared.completion))
    }

    /// Process-unique id, also the `promise` field of every log event.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current lifecycle state. Blocks while a handler runs under the lock.
    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    /// Completion units still owed by pending handlers.
    pub fn outstanding(&self) -> usize {
        self.shared.completion.outstanding()
    }

    /// The current fulfillment value, if fulfilled with a value.
    pub fn result(&self) -> Option<T>
    where
        T: Clone,
    {
        let inner = self.shared.inner.lock();
        match inner.state {
            State::Fulfilled => inner.result.clone(),
            _ => None,
        }
    }

    /// The current rejection error, if rejected.
    pub fn error(&self) -> Option<E>
    where
        E: Clone,
    {
        let inner = self.shared.inner.lock();
        match inner.state {
            State::Rejected => inner.error.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Promise, State};
    use crate::Error;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    };

    /// A promise whose executor waits for `open` before settling.
    fn gated<F>(settle: F) -> (Promise<i32>, mpsc::Sender<()>)
    where
        F: FnOnce(super::Resolve<i32>, super::Reject<Error>) + Send + 'static,
    {
        let (open, gate) = mpsc::channel();
        let promise = Promise::<i32>::new(move |resolve, reject| {
            gate.recv().ok();
            settle(resolve, reject)
        });
        (promise, open)
    }

    #[test]
    fn resolved_and_rejected_skip_the_executor_thread() {
        let ok = Promise::<i32>::resolved(5);
        assert_eq!(ok.state(), State::Fulfilled);
        assert_eq!(ok.result(), Some(5));

        let failed = Promise::<i32>::rejected(Error::msg("bad"));
        assert_eq!(failed.state(), State::Rejected);
        assert_eq!(failed.error().map(|e| e.to_string()).as_deref(), Some("bad"));
        assert_eq!(failed.result(), None);
    }

    #[test]
    fn pending_registrations_owe_one_unit_each() {
        let (promise, open) = gated(|resolve, _| resolve(1));
        promise.then(|v| v).then(|v| v).catch(|e| e);
        assert_eq!(promise.state(), State::Pending);
        assert_eq!(promise.outstanding(), 3);
        open.send(()).unwrap();
        promise.wait();
        assert_eq!(promise.outstanding(), 0);
    }

    #[test]
    fn registration_after_settlement_owes_nothing() {
        let promise = Promise::<i32>::resolved(1);
        promise.then(|v| v + 1).catch(|e| e);
        assert_eq!(promise.outstanding(), 0);
        assert_eq!(promise.result(), Some(2));
    }

    #[test]
    fn self_chain_short_circuits_with_self_chain_error() {
        let (promise, open) = gated(|resolve, _| resolve(1));
        let me = promise.clone();
        let skipped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&skipped);
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&seen);
        promise
            .and_then(move |_| me)
            .then(move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                v
            })
            .catch(move |e| {
                *sink.lock() = Some(e.to_string());
                e
            });
        open.send(()).unwrap();
        promise.wait();
        assert_eq!(skipped.load(Ordering::SeqCst), 0);
        assert_eq!(
            seen.lock().as_deref(),
            Some("a fulfillment handler returned the promise it was registered on")
        );
        // Short-circuit keeps the first settlement.
        assert_eq!(promise.state(), State::Fulfilled);
        assert_eq!(promise.result(), None);
    }

    #[test]
    fn adopted_value_stays_with_the_nested_promise() {
        let nested = Promise::<i32>::resolved(228);
        let (promise, open) = gated(|resolve, _| resolve(1));
        let inner = nested.clone();
        promise.and_then(move |_| inner);
        open.send(()).unwrap();
        promise.wait();
        assert_eq!(promise.result(), Some(228));
        assert_eq!(nested.result(), Some(228));
        assert_eq!(nested.outstanding(), 0);
        nested.then(|v| v + 1);
        assert_eq!(nested.result(), Some(229));
    }

    #[test]
    fn and_then_on_fulfilled_promise_flattens_synchronously() {
        let promise = Promise::<i32>::resolved(1);
        promise.and_then(|v| Promise::new(move |resolve, _| resolve(v + 41)));
        assert_eq!(promise.result(), Some(42));

        promise.and_then(|_| Promise::rejected(Error::msg("late")));
        assert_eq!(promise.state(), State::Fulfilled);
        assert_eq!(promise.result(), None);
    }

    #[test]
    fn debug_output_names_the_state() {
        let promise = Promise::<i32>::resolved(1);
        let text = format!("{promise:?}");
        assert!(text.contains("Fulfilled"), "{text}");
        assert!(text.contains(&format!("id: {}", promise.id())), "{text}");
    }
}
