//! Aggregate and convenience operations, built only on the public surface of
//! [`Deferred`].
use std::{cell::RefCell, rc::Rc};

use crate::{resolution::sealed, Deferred, Error, Rejecter, Resolution, Resolver};

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Turns any resolution into a promise.
    ///
    /// A `Deferred` is returned as-is, a foreign thenable is resolved through
    /// a fresh promise, and a plain value gives an already fulfilled promise.
    pub fn wrap(resolution: Resolution<T, E>) -> Self {
        match resolution {
            Resolution::Value(value) => Self::resolved(value),
            Resolution::Deferred(deferred) => deferred,
            Resolution::Thenable(thenable) => match thenable.as_deferred(sealed::Token) {
                Some(deferred) => deferred.clone(),
                None => Self::new(move |resolve, _reject| {
                    resolve.resolve_with(Resolution::Thenable(thenable));
                    Ok(())
                }),
            },
        }
    }

    /// A promise rejected with `reason`.
    pub fn rejected(reason: E) -> Self {
        Self::new(move |_resolve, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// Registers a rejection callback only; fulfillment passes through.
    pub fn catch<G>(&self, on_rejected: G) -> Deferred<T, E>
    where
        G: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.register_rejection(on_rejected)
    }

    /// Runs `f` once this promise settles either way, then settles the
    /// returned promise identically.
    pub fn finally<F>(&self, f: F) -> Deferred<T, E>
    where
        F: FnOnce() + 'static,
    {
        let f = Rc::new(RefCell::new(Some(f)));
        let on_rejected = f.clone();
        self.then(
            move |value| {
                if let Some(f) = f.borrow_mut().take() {
                    f();
                }
                Ok(Resolution::Value(value))
            },
            move |reason| {
                if let Some(f) = on_rejected.borrow_mut().take() {
                    f();
                }
                Err(reason)
            },
        )
    }
}

struct AllState<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Fulfills with every value, in input order, once all inputs have
/// fulfilled. Rejects with the first rejection, without waiting for the rest.
///
/// ```
/// use thenable::{all, asap, Deferred, Error, Resolution};
///
/// let (late, resolve, _) = Deferred::<u8, Error>::with_resolvers();
/// let every = all(vec![Resolution::Deferred(late), Resolution::Value(2)]);
/// resolve.resolve(1);
/// asap::run_until_stalled();
/// assert_eq!(every.settled(), Some(Ok(vec![1, 2])));
/// ```
pub fn all<T, E, I>(values: I) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
    I: IntoIterator<Item = Resolution<T, E>>,
{
    let values: Vec<_> = values.into_iter().collect();
    Deferred::new(move |resolve, reject| {
        if values.is_empty() {
            resolve.resolve(Vec::new());
            return Ok(());
        }
        let state = Rc::new(RefCell::new(AllState {
            values: vec![None; values.len()],
            remaining: values.len(),
        }));
        for (index, value) in values.into_iter().enumerate() {
            let element = match value {
                Resolution::Value(value) => {
                    record(&state, index, value, &resolve);
                    continue;
                }
                Resolution::Deferred(deferred) => deferred,
                thenable @ Resolution::Thenable(_) => Deferred::wrap(thenable),
            };
            match element.settled() {
                Some(Ok(value)) => record(&state, index, value, &resolve),
                Some(Err(reason)) => reject.reject(reason),
                None => {
                    let state = state.clone();
                    let resolve = resolve.clone();
                    let reject = reject.clone();
                    let _ = element.then(
                        move |value| {
                            record(&state, index, value, &resolve);
                            Ok(Resolution::Value(()))
                        },
                        move |reason| {
                            reject.reject(reason);
                            Ok(Resolution::Value(()))
                        },
                    );
                }
            }
        }
        Ok(())
    })
}

fn record<T, E>(
    state: &Rc<RefCell<AllState<T>>>,
    index: usize,
    value: T,
    resolve: &Resolver<Vec<T>, E>,
) where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let values = {
        let mut state = state.borrow_mut();
        state.values[index] = Some(value);
        state.remaining -= 1;
        if state.remaining > 0 {
            return;
        }
        state.values.iter_mut().filter_map(Option::take).collect()
    };
    resolve.resolve(values);
}

/// Settles like whichever input settles first, in either direction.
///
/// ```
/// use thenable::{asap, race, Deferred, Error, Resolution};
///
/// let (never, _, _) = Deferred::<u8, Error>::with_resolvers();
/// let first = race(vec![
///     Resolution::Deferred(never),
///     Resolution::Deferred(Deferred::rejected(Error::rejected("fast"))),
/// ]);
/// asap::run_until_stalled();
/// assert_eq!(first.settled(), Some(Err(Error::rejected("fast"))));
/// ```
pub fn race<T, E, I>(values: I) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
    I: IntoIterator<Item = Resolution<T, E>>,
{
    let values: Vec<_> = values.into_iter().collect();
    Deferred::new(move |resolve, reject| {
        for value in values {
            forward(Deferred::wrap(value), resolve.clone(), reject.clone());
        }
        Ok(())
    })
}

fn forward<T, E>(element: Deferred<T, E>, resolve: Resolver<T, E>, reject: Rejecter<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let _ = element.then(
        move |value| {
            resolve.resolve(value);
            Ok(Resolution::Value(()))
        },
        move |reason| {
            reject.reject(reason);
            Ok(Resolution::Value(()))
        },
    );
}
