//! What a promise can be resolved with.
use crate::{Deferred, Error, Rejecter, Resolver};

/// A foreign `then` capability: called once with the two settlement
/// capabilities of the promise being resolved.
pub type ThenFn<T, E> = Box<dyn FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>>;

/// The `then` capability of a promise-like value.
///
/// Closures of the shape `FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>`
/// are thenables already. Implement the trait by hand when looking up the
/// capability itself can fail.
///
/// Only [`Deferred`] is adopted directly. Other implementations cannot claim
/// to be one:
///
/// ```compile_fail
/// use thenable::{Deferred, Error, ThenFn, Thenable};
///
/// struct Impostor(Deferred<u8, Error>);
///
/// impl Thenable<u8, Error> for Impostor {
///     fn then_fn(self: Box<Self>) -> Result<ThenFn<u8, Error>, Error> {
///         Err(Error::rejected("unused"))
///     }
///
///     fn as_deferred(&self) -> Option<&Deferred<u8, Error>> {
///         Some(&self.0)
///     }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use thenable::{asap, Deferred, Error, Resolution};
///
/// let promise: Deferred<&str, Error> = Deferred::new(|resolve, _reject| {
///     resolve.resolve_with(Resolution::foreign(|resolve, _reject| {
///         resolve.resolve("x");
///         Ok(())
///     }));
///     Ok(())
/// });
/// asap::run_until_stalled();
/// assert_eq!(promise.settled(), Some(Ok("x")));
/// ```
pub trait Thenable<T, E>: 'static {
    /// Looks up the capability. An `Err` rejects the promise being resolved
    /// without invoking anything.
    fn then_fn(self: Box<Self>) -> Result<ThenFn<T, E>, E>;

    /// Only [`Deferred`] returns `Some` here, which selects adoption instead
    /// of calling `then_fn`. The token cannot be named outside this crate,
    /// so no other type can override it.
    #[doc(hidden)]
    fn as_deferred(&self, _: sealed::Token) -> Option<&Deferred<T, E>> {
        None
    }
}

impl<T, E, F> Thenable<T, E> for F
where
    T: 'static,
    E: 'static,
    F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E> + 'static,
{
    fn then_fn(self: Box<Self>) -> Result<ThenFn<T, E>, E> {
        let then: ThenFn<T, E> = self;
        Ok(then)
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn then_fn(self: Box<Self>) -> Result<ThenFn<T, E>, E> {
        let then: ThenFn<T, E> = Box::new(move |resolve: Resolver<T, E>, reject: Rejecter<T, E>| {
            self.pipe(resolve, reject);
            Ok(())
        });
        Ok(then)
    }

    fn as_deferred(&self, _: sealed::Token) -> Option<&Deferred<T, E>> {
        Some(self)
    }
}

pub(crate) mod sealed {
    pub struct Token;
}

/// A settlement value, interpreted by the resolution procedure.
pub enum Resolution<T, E = Error> {
    /// Fulfill with the value as-is.
    Value(T),
    /// Adopt the state of another promise.
    Deferred(Deferred<T, E>),
    /// Call a foreign `then` capability and settle with whatever it reports.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T: 'static, E: 'static> Resolution<T, E> {
    /// Wraps a bare `then` closure.
    pub fn foreign<F>(then: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E> + 'static,
    {
        let thenable: Box<dyn Thenable<T, E>> = Box::new(then);
        Self::Thenable(thenable)
    }

    /// Boxes a thenable.
    pub fn thenable<A>(thenable: A) -> Self
    where
        A: Thenable<T, E>,
    {
        let thenable: Box<dyn Thenable<T, E>> = Box::new(thenable);
        Self::Thenable(thenable)
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Self::Deferred(deferred)
    }
}
