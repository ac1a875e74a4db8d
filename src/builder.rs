use crate::{Error, Promise, Reject, Resolve};
use std::thread;
use tracing::debug;

/// Configures the thread an executor runs on.
///
/// Mirrors [`std::thread::Builder`]: unset options fall back to the
/// platform defaults.
///
/// # Examples
///
/// ```
/// use promise_chain::{Builder, Promise};
///
/// let promise: Promise<String> = Builder::new()
///     .name("fetch-config")
///     .spawn(|resolve, _reject| {
///         resolve(std::thread::current().name().unwrap_or_default().to_owned())
///     })
///     .unwrap();
/// promise.then(|name| name.to_uppercase());
/// promise.wait();
/// assert_eq!(promise.result().as_deref(), Some("FETCH-CONFIG"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    /// A builder with no name and the default stack size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the executor thread. Shown in panic messages.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size of the executor thread, in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Starts `executor` on a configured thread and returns its promise.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] if the thread could not be created. The executor is
    /// dropped without running in that case.
    pub fn spawn<T, E, F>(self, executor: F) -> Result<Promise<T, E>, Error>
    where
        T: Send + 'static,
        E: From<Error> + Send + 'static,
        F: FnOnce(Resolve<T>, Reject<E>) + Send + 'static,
    {
        let mut thread = thread::Builder::new();
        if let Some(name) = self.name {
            thread = thread.name(name);
        }
        if let Some(size) = self.stack_size {
            thread = thread.stack_size(size);
        }

        let promise = Promise::pending();
        let settle = promise.clone();
        thread.spawn(move || settle.run(executor))?;
        debug!(promise = promise.id(), "executor started");
        Ok(promise)
    }
}

#[cfg(test)]
mod tests {
    use super::Builder;
    use crate::{Promise, State};
    use std::thread;

    #[test]
    fn executor_runs_on_named_thread() {
        let promise: Promise<Option<String>> = Builder::new()
            .name("named-executor")
            .stack_size(256 * 1024)
            .spawn(|resolve, _| resolve(thread::current().name().map(str::to_owned)))
            .unwrap();
        promise.then(|name| name);
        promise.wait();
        assert_eq!(promise.state(), State::Fulfilled);
        assert_eq!(promise.result(), Some(Some("named-executor".to_owned())));
    }

    #[test]
    fn constructor_does_not_wait_for_executor() {
        let (open, gate) = std::sync::mpsc::channel::<()>();
        let promise: Promise<i32> = Builder::new()
            .spawn(move |resolve, _| {
                gate.recv().ok();
                resolve(1)
            })
            .unwrap();
        assert_eq!(promise.state(), State::Pending);
        promise.then(|v| v);
        open.send(()).unwrap();
        promise.wait();
        assert_eq!(promise.state(), State::Fulfilled);
    }
}
