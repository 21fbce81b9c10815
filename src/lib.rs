//! A write-once deferred value following the Promises/A+ resolution procedure.
//!
//! A [`Deferred`] starts pending and is settled once, either fulfilled with a
//! value or rejected with a reason. Observers registered with
//! [`Deferred::then`] and friends always run later, from the per-thread
//! [`asap`] queue, in the order they were registered, no matter whether the
//! promise was already settled when they were attached.
//!
//! Resolving with a value goes through the [`Resolution`] procedure: another
//! `Deferred` is adopted, a foreign [`Thenable`] is asked to settle the
//! promise, and anything else fulfills it as-is.
//!
//! ```
//! use thenable::{asap, Deferred, Error, Resolution};
//!
//! let (inner, resolve, _reject) = Deferred::<&str, Error>::with_resolvers();
//! let outer = Deferred::new(move |resolve, _reject| {
//!     resolve.resolve_with(Resolution::Deferred(inner));
//!     Ok(())
//! });
//! let shouted = outer.and_then(|v: &str| Ok(Resolution::Value(v.to_uppercase())));
//!
//! resolve.resolve("hi");
//! assert_eq!(shouted.settled(), None);
//! asap::run_until_stalled();
//! assert_eq!(shouted.settled(), Some(Ok("HI".to_string())));
//! ```
//!
//! The queue is drained by [`asap::run_until_stalled`], or by polling a
//! `Deferred`, which is also a [`Future`](std::future::Future).

pub mod asap;
mod combinators;
mod deferred;
mod derived;
mod error;
pub mod hooks;
mod resolution;

pub use combinators::{all, race};
pub use deferred::{Deferred, PromiseState, Rejecter, Resolver};
pub use derived::Construct;
pub use error::Error;
pub use hooks::PromiseId;
pub use resolution::{Resolution, ThenFn, Thenable};
