use std::{any::Any, io, sync::Arc};

/// Errors produced by the promise machinery itself.
///
/// Application errors travel through the `E` parameter of
/// [`Promise`](crate::Promise); they only need a `From<Error>` conversion so
/// that panics and internal faults can be delivered to the same `catch`
/// handlers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The executor panicked before it settled the promise.
    #[error("{message}")]
    Panicked { message: String },

    /// A fulfillment handler handed back the promise it was attached to.
    #[error("a fulfillment handler returned the promise it was registered on")]
    SelfChain,

    /// The executor thread could not be started.
    #[error("failed to spawn executor thread: {0}")]
    Spawn(#[source] Arc<io::Error>),

    /// An explicit rejection raised by application code.
    #[error("{0}")]
    Rejected(String),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Spawn(Arc::new(error))
    }
}

impl Error {
    /// Shorthand for [`Error::Rejected`].
    ///
    /// ```
    /// use promise_chain::Error;
    /// assert_eq!(Error::msg("nope").to_string(), "nope");
    /// ```
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Rejected(message.into())
    }

    /// Derives an error from a panic payload.
    ///
    /// Never fails: payloads that are neither text nor an error value get a
    /// fixed description.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Error>() {
            Ok(error) => return *error,
            Err(payload) => payload,
        };
        let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_owned()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else if let Some(error) =
            payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>()
        {
            error.to_string()
        } else {
            "executor panicked with a non-text payload".to_owned()
        };
        Error::Panicked { message }
    }

    /// Returns `true` for errors synthesized from an executor panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panicked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::panic::{catch_unwind, panic_any};

    fn payload_of(f: impl FnOnce() + std::panic::UnwindSafe) -> Box<dyn std::any::Any + Send> {
        catch_unwind(f).unwrap_err()
    }

    #[test]
    fn static_str_payload_keeps_its_text() {
        let error = Error::from_panic(payload_of(|| panic!("boom")));
        assert!(error.is_panic());
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn formatted_payload_keeps_its_text() {
        let code = 7;
        let error = Error::from_panic(payload_of(move || panic!("code {code}")));
        assert_eq!(error.to_string(), "code 7");
    }

    #[test]
    fn error_payload_is_passed_through() {
        let error = Error::from_panic(payload_of(|| panic_any(Error::msg("typed"))));
        assert!(matches!(error, Error::Rejected(ref m) if m == "typed"));
    }

    #[test]
    fn opaque_payload_does_not_fail() {
        let error = Error::from_panic(payload_of(|| panic_any(42_u32)));
        assert!(error.is_panic());
        assert_eq!(error.to_string(), "executor panicked with a non-text payload");
    }
}
