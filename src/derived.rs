//! Promise types built on top of [`Deferred`].
//!
//! A type that wraps a `Deferred` can offer a `then` returning its own type by
//! implementing [`Construct`] and delegating to [`Deferred::then_as`]. The
//! observer is still registered on the wrapped promise through a plain
//! `Deferred`, so the wrapper gets exactly the core semantics.
//!
//! # Examples
//!
//! ```
//! use thenable::{asap, Construct, Deferred, Error, Rejecter, Resolution, Resolver};
//!
//! struct Labelled<T> {
//!     label: &'static str,
//!     promise: Deferred<T, Error>,
//! }
//!
//! impl<T: Clone + 'static> Construct<T, Error> for Labelled<T> {
//!     fn construct<F>(initializer: F) -> Self
//!     where
//!         F: FnOnce(Resolver<T, Error>, Rejecter<T, Error>) -> Result<(), Error>,
//!     {
//!         Labelled { label: "derived", promise: Deferred::new(initializer) }
//!     }
//! }
//!
//! let base = Deferred::<u8, Error>::resolved(1);
//! let next: Labelled<u8> = base.then_as(|v| Ok(Resolution::Value(v + 1)), Err);
//! asap::run_until_stalled();
//! assert_eq!(next.label, "derived");
//! assert_eq!(next.promise.settled(), Some(Ok(2)));
//! ```
use crate::{Deferred, Error, Rejecter, Resolver};

/// Types that can be built from an initializer the way [`Deferred::new`] is.
pub trait Construct<T, E>: Sized {
    fn construct<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>;
}

impl<T, E> Construct<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn construct<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        Deferred::new(initializer)
    }
}
