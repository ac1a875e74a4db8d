//! Thread-backed promises with chainable handlers and a blocking join.
//!
//! A [`Promise`] starts its executor on a fresh thread as soon as it is
//! built. The executor settles it once through `resolve` or `reject`; a
//! panic in the executor becomes a rejection. Handlers added with
//! [`Promise::then`], [`Promise::and_then`] and [`Promise::catch`] run in
//! registration order on whichever thread settles the promise, or right
//! away when it has already settled. [`Promise::wait`] blocks until every
//! handler registered while pending has been dealt with.
//!
//! ```
//! use promise_chain::{wait_all, Error, Promise};
//!
//! let parsed = Promise::<i32>::new(|resolve, reject| match "42".parse() {
//!     Ok(n) => resolve(n),
//!     Err(e) => reject(Error::msg(format!("bad input: {e}"))),
//! });
//! let broken = Promise::<i32>::new(|_resolve, _reject| panic!("boom"));
//!
//! parsed.then(|n| n * 2);
//! broken.catch(|e| e);
//! wait_all([&parsed, &broken]);
//!
//! assert_eq!(parsed.result(), Some(84));
//! ```
//!
//! There is no cancellation and no timeout: waiting on a promise whose
//! executor never settles blocks forever.
mod builder;
mod completion;
mod error;
mod join;
mod promise;

pub use builder::Builder;
pub use completion::Settled;
pub use error::Error;
pub use join::{settle_all, wait_all};
pub use promise::{Promise, Reject, Resolve, State};
