//! The join primitive behind [`Promise::wait`](crate::Promise::wait).
//!
//! One unit is owed per handler registered while its promise is pending. A
//! unit is paid back when the handler is invoked or bypassed. When nothing is
//! owed, blocked threads are released and parked futures are woken.
use parking_lot::{Condvar, Mutex};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

#[derive(Debug, Default)]
pub(crate) struct Completion {
    inner: Mutex<Inner>,
    zero: Condvar,
}

#[derive(Debug, Default)]
struct Inner {
    owed: usize,
    wakers: Vec<Waker>,
}

impl Completion {
    pub(crate) fn add(&self, units: usize) {
        self.inner.lock().owed += units;
    }

    pub(crate) fn release(&self, units: usize) {
        if units == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        debug_assert!(inner.owed >= units, "released more units than were owed");
        inner.owed = inner.owed.saturating_sub(units);
        if inner.owed == 0 {
            self.zero.notify_all();
            for waker in inner.wakers.drain(..) {
                waker.wake()
            }
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.inner.lock().owed
    }

    pub(crate) fn wait(&self) {
        let mut inner = self.inner.lock();
        while inner.owed > 0 {
            self.zero.wait(&mut inner);
        }
    }
}

/// Future returned by [`Promise::settled`](crate::Promise::settled).
///
/// Resolves once every handler registered while the promise was pending has
/// been invoked or bypassed. Like the blocking join it has no timeout.
///
/// ```
/// use promise_chain::Promise;
/// use futures::executor::block_on;
///
/// let promise = Promise::<i32>::new(|resolve, _reject| resolve(20));
/// promise.then(|v| v + 1);
/// block_on(promise.settled());
/// ```
#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless polled"]
pub struct Settled {
    completion: Arc<Completion>,
}

impl Settled {
    pub(crate) fn new(completion: Arc<Completion>) -> Self {
        Self { completion }
    }
}

impl Future for Settled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.completion.inner.lock();
        if inner.owed == 0 {
            Poll::Ready(())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}
