use std::any::Any;

use thiserror::Error;

/// Reasons produced by the promise core itself.
///
/// This is also the default rejection type of [`Deferred`](crate::Deferred).
/// A custom reason type only has to implement `From<Error>` so that
/// self-resolution and panicking callbacks can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A promise was resolved with itself, directly or through a chain of
    /// adopted promises that leads back to it.
    #[error("a promise cannot be resolved with itself")]
    SelfResolution,

    /// An initializer, `then` capability or observer callback panicked.
    #[error("callback panicked: {message}")]
    Panicked {
        /// The panic payload, when it was a string.
        message: String,
    },

    /// A user supplied rejection reason.
    #[error("{0}")]
    Rejected(String),
}

impl Error {
    /// Shorthand for [`Error::Rejected`].
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "non-string panic payload".to_owned(),
            },
        };
        Self::Panicked { message }
    }
}
