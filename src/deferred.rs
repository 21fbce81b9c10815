use std::{
    cell::{Cell, RefCell},
    convert::identity,
    fmt,
    future::Future,
    mem,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{asap, hooks, resolution::sealed, Error, PromiseId, Resolution};

/// A write-once value that is either fulfilled with a `T` or rejected with an
/// `E`, and notifies every observer asynchronously through [`asap`].
///
/// Cloning a `Deferred` clones the handle, not the value: both handles see
/// the same settlement.
///
/// # Examples
///
/// ```
/// use thenable::{asap, Deferred, Error, Resolution};
///
/// let promise: Deferred<u32, Error> = Deferred::new(|resolve, _reject| {
///     resolve.resolve(20);
///     Ok(())
/// });
/// let doubled = promise.and_then(|v| Ok(Resolution::Value(v * 2)));
/// asap::run_until_stalled();
/// assert_eq!(doubled.settled(), Some(Ok(40)));
/// ```
pub struct Deferred<T, E = Error> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

/// The observable disposition of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

struct Inner<T, E> {
    id: PromiseId,
    state: State<T, E>,
    wakers: Vec<Waker>,
}

enum State<T, E> {
    Pending(Deferreds<T, E>),
    Fulfilled(T),
    Rejected(E),
    /// Settled by delegating to another promise. Terminal for this promise,
    /// observers always look through it.
    Adopted(Deferred<T, E>),
}

type Handler<T, E> = Box<dyn Reaction<T, E>>;

/// Observers waiting on a pending promise, in registration order.
enum Deferreds<T, E> {
    None,
    One(Handler<T, E>),
    Many(Vec<Handler<T, E>>),
}

impl<T, E> Deferreds<T, E> {
    fn push(&mut self, handler: Handler<T, E>) {
        *self = match mem::replace(self, Deferreds::None) {
            Deferreds::None => Deferreds::One(handler),
            Deferreds::One(first) => Deferreds::Many(vec![first, handler]),
            Deferreds::Many(mut handlers) => {
                handlers.push(handler);
                Deferreds::Many(handlers)
            }
        };
    }

    fn len(&self) -> usize {
        match self {
            Deferreds::None => 0,
            Deferreds::One(_) => 1,
            Deferreds::Many(handlers) => handlers.len(),
        }
    }
}

/// Something run once, from a scheduled task, with the settled outcome.
trait Reaction<T, E> {
    fn react(self: Box<Self>, settled: Result<T, E>);
}

type Callback<A, U, E> = Box<dyn FnOnce(A) -> Result<Resolution<U, E>, E>>;

enum OnFulfilled<T, U, E> {
    Call(Callback<T, U, E>),
    Forward(fn(T) -> U),
}

/// An observer record: the callbacks and the promise their outcome settles.
struct Continuation<T, U, E> {
    on_fulfilled: OnFulfilled<T, U, E>,
    on_rejected: Option<Callback<E, U, E>>,
    promise: Deferred<U, E>,
}

impl<T, U, E> Reaction<T, E> for Continuation<T, U, E>
where
    U: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn react(self: Box<Self>, settled: Result<T, E>) {
        let Continuation {
            on_fulfilled,
            on_rejected,
            promise,
        } = *self;
        let outcome = match settled {
            Ok(value) => match on_fulfilled {
                OnFulfilled::Forward(forward) => Ok(Resolution::Value(forward(value))),
                OnFulfilled::Call(callback) => try_call_one(callback, value),
            },
            Err(reason) => match on_rejected {
                None => Err(reason),
                Some(callback) => try_call_one(callback, reason),
            },
        };
        match outcome {
            Ok(resolution) => resolve(&promise, resolution),
            Err(reason) => reject(&promise, reason),
        }
    }
}

/// Hands the outcome to another promise's settlement capabilities.
struct Pipe<T, E> {
    resolve: Resolver<T, E>,
    reject: Rejecter<T, E>,
}

impl<T, E> Reaction<T, E> for Pipe<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn react(self: Box<Self>, settled: Result<T, E>) {
        match settled {
            Ok(value) => self.resolve.resolve(value),
            Err(reason) => self.reject.reject(reason),
        }
    }
}

fn try_call_one<A, U, E>(callback: Callback<A, U, E>, arg: A) -> Result<Resolution<U, E>, E>
where
    E: From<Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(move || callback(arg))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let error = Error::from_panic(payload);
            tracing::warn!(%error, "observer callback panicked");
            Err(E::from(error))
        }
    }
}

/// Shared by one resolver/rejecter pair: whichever is called first wins.
#[derive(Clone, Default)]
struct Latch(Rc<Cell<bool>>);

impl Latch {
    fn try_close(&self) -> bool {
        !self.0.replace(true)
    }
}

/// The settle-success capability handed to initializers and foreign `then`s.
pub struct Resolver<T, E = Error> {
    promise: Deferred<T, E>,
    latch: Latch,
}

/// The settle-failure capability handed to initializers and foreign `then`s.
pub struct Rejecter<T, E = Error> {
    promise: Deferred<T, E>,
    latch: Latch,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            latch: self.latch.clone(),
        }
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            latch: self.latch.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resolver").field(&self.promise.id()).finish()
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejecter").field(&self.promise.id()).finish()
    }
}

fn capabilities<T, E>(promise: &Deferred<T, E>) -> (Resolver<T, E>, Rejecter<T, E>) {
    let latch = Latch::default();
    (
        Resolver {
            promise: promise.clone(),
            latch: latch.clone(),
        },
        Rejecter {
            promise: promise.clone(),
            latch,
        },
    )
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Fulfills with `value`, unless this pair already settled.
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value));
    }

    /// Runs the resolution procedure on `resolution`, unless this pair
    /// already settled.
    pub fn resolve_with(&self, resolution: Resolution<T, E>) {
        if !self.latch.try_close() {
            tracing::trace!(promise = %self.promise.id(), "resolve ignored, already settled");
            return;
        }
        resolve(&self.promise, resolution);
    }
}

impl<T, E> Rejecter<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Rejects with `reason`, unless this pair already settled.
    pub fn reject(&self, reason: E) {
        if !self.latch.try_close() {
            tracing::trace!(promise = %self.promise.id(), "reject ignored, already settled");
            return;
        }
        reject(&self.promise, reason);
    }
}

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
}

impl<T, E> Deferred<T, E> {
    pub(crate) fn pending() -> Self {
        let id = PromiseId(NEXT_ID.with(|next| next.replace(next.get() + 1)));
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id,
                state: State::Pending(Deferreds::None),
                wakers: Vec::new(),
            })),
        }
    }

    /// A promise already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        let promise = Self::pending();
        promise.inner.borrow_mut().state = State::Fulfilled(value);
        promise
    }

    pub fn id(&self) -> PromiseId {
        self.inner.borrow().id
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Follows adoption links to the promise that holds the real outcome.
    fn chase(&self) -> Self {
        let mut current = self.clone();
        loop {
            let next = match &current.inner.borrow().state {
                State::Adopted(next) => Some(next.clone()),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// The disposition, looking through adoption.
    pub fn state(&self) -> PromiseState {
        match self.chase().inner.borrow().state {
            State::Fulfilled(_) => PromiseState::Fulfilled,
            State::Rejected(_) => PromiseState::Rejected,
            State::Pending(_) | State::Adopted(_) => PromiseState::Pending,
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a pending promise and synchronously runs `initializer` with its
    /// settlement capabilities.
    ///
    /// Only the first call to either capability has any effect. If the
    /// initializer returns `Err` or panics before settling, the promise is
    /// rejected with that reason.
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending();
        do_resolve(initializer, &promise);
        promise
    }

    /// A pending promise together with its settlement capabilities, for
    /// settling from outside an initializer.
    ///
    /// ```
    /// use thenable::{asap, Deferred, Error};
    ///
    /// let (promise, resolve, _reject) = Deferred::<String, Error>::with_resolvers();
    /// resolve.resolve("🍓".into());
    /// asap::run_until_stalled();
    /// assert_eq!(promise.settled(), Some(Ok("🍓".to_string())));
    /// ```
    pub fn with_resolvers() -> (Self, Resolver<T, E>, Rejecter<T, E>) {
        let promise = Self::pending();
        let (resolve, reject) = capabilities(&promise);
        (promise, resolve, reject)
    }

    /// The outcome, looking through adoption, or `None` while pending.
    pub fn settled(&self) -> Option<Result<T, E>> {
        self.chase().outcome()
    }

    fn outcome(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().state {
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
            State::Pending(_) | State::Adopted(_) => None,
        }
    }

    /// Registers callbacks for both dispositions.
    ///
    /// The returned promise is resolved with whatever the matching callback
    /// returns, or rejected with its `Err` (or panic). Callbacks always run
    /// from the [`asap`] queue, never inside this call.
    pub fn then<U, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        G: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let on_fulfilled: Callback<T, U, E> = Box::new(on_fulfilled);
        let on_rejected: Callback<E, U, E> = Box::new(on_rejected);
        self.register(OnFulfilled::Call(on_fulfilled), Some(on_rejected))
    }

    /// Registers a fulfillment callback; a rejection passes through unchanged.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        let on_fulfilled: Callback<T, U, E> = Box::new(on_fulfilled);
        self.register(OnFulfilled::Call(on_fulfilled), None)
    }

    /// The fully optional form of [`then`](Self::then). A missing callback
    /// passes that disposition through to the returned promise.
    ///
    /// A bare `None` leaves its callback type open, so name it:
    ///
    /// ```
    /// use thenable::{asap, Deferred, Error, Resolution};
    ///
    /// type OnRejected = fn(Error) -> Result<Resolution<u8, Error>, Error>;
    ///
    /// let promise = Deferred::<u8, Error>::resolved(1);
    /// let next = promise.attach(Some(|v: u8| Ok(Resolution::Value(v + 1))), None::<OnRejected>);
    /// asap::run_until_stalled();
    /// assert_eq!(next.settled(), Some(Ok(2)));
    /// ```
    ///
    /// [`and_then`](Self::and_then) and [`catch`](Self::catch) cover the
    /// one-callback cases without annotations.
    pub fn attach<F, G>(&self, on_fulfilled: Option<F>, on_rejected: Option<G>) -> Deferred<T, E>
    where
        F: FnOnce(T) -> Result<Resolution<T, E>, E> + 'static,
        G: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        let on_fulfilled = match on_fulfilled {
            Some(callback) => OnFulfilled::Call(Box::new(callback) as Callback<T, T, E>),
            None => OnFulfilled::Forward(identity),
        };
        let on_rejected = on_rejected.map(|callback| Box::new(callback) as Callback<E, T, E>);
        self.register(on_fulfilled, on_rejected)
    }

    pub(crate) fn register_rejection<G>(&self, on_rejected: G) -> Deferred<T, E>
    where
        G: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        let on_rejected: Callback<E, T, E> = Box::new(on_rejected);
        self.register(OnFulfilled::Forward(identity), Some(on_rejected))
    }

    fn register<U>(
        &self,
        on_fulfilled: OnFulfilled<T, U, E>,
        on_rejected: Option<Callback<E, U, E>>,
    ) -> Deferred<U, E>
    where
        U: Clone + 'static,
    {
        let promise = Deferred::pending();
        handle(
            self,
            Box::new(Continuation {
                on_fulfilled,
                on_rejected,
                promise: promise.clone(),
            }),
        );
        promise
    }

    /// Forwards this promise's outcome into another pair of capabilities.
    pub(crate) fn pipe(&self, resolve: Resolver<T, E>, reject: Rejecter<T, E>) {
        handle(self, Box::new(Pipe { resolve, reject }));
    }

    /// Like [`then`](Self::then), but the continuation is built as `C`.
    ///
    /// For types that wrap a `Deferred` and want `then` to return their own
    /// type: the callbacks are registered against this promise through a
    /// plain intermediate `Deferred`, whose outcome is then piped into the
    /// `C` built by [`Construct::construct`](crate::Construct::construct).
    pub fn then_as<C, U, F, G>(&self, on_fulfilled: F, on_rejected: G) -> C
    where
        C: crate::Construct<U, E>,
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        G: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let this = self.clone();
        let on_fulfilled: Callback<T, U, E> = Box::new(on_fulfilled);
        let on_rejected: Callback<E, U, E> = Box::new(on_rejected);
        C::construct(move |resolve: Resolver<U, E>, reject: Rejecter<U, E>| {
            let intermediate = this.register(OnFulfilled::Call(on_fulfilled), Some(on_rejected));
            intermediate.pipe(resolve, reject);
            Ok(())
        })
    }
}

/// Registers `handler` against the end of `this`'s adoption chain: queued
/// while pending, scheduled once settled.
fn handle<T, E>(this: &Deferred<T, E>, handler: Handler<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let target = this.chase();
    hooks::handled(target.id());
    {
        let mut inner = target.inner.borrow_mut();
        if let State::Pending(deferreds) = &mut inner.state {
            deferreds.push(handler);
            return;
        }
    }
    handle_resolved(target, handler);
}

fn handle_resolved<T, E>(target: Deferred<T, E>, handler: Handler<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    asap::schedule(move || {
        if let Some(settled) = target.outcome() {
            handler.react(settled);
        }
    });
}

/// The resolution procedure.
fn resolve<T, E>(this: &Deferred<T, E>, resolution: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match resolution {
        Resolution::Value(value) => {
            settle(this, State::Fulfilled(value));
        }
        Resolution::Deferred(other) => adopt(this, other),
        Resolution::Thenable(thenable) => {
            if let Some(other) = thenable.as_deferred(sealed::Token) {
                let other = other.clone();
                return adopt(this, other);
            }
            match thenable.then_fn() {
                Ok(then) => do_resolve(then, this),
                Err(reason) => reject(this, reason),
            }
        }
    }
}

fn adopt<T, E>(this: &Deferred<T, E>, other: Deferred<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    // `this` is still pending, so a chain that leads back to it stops there.
    if other.chase().ptr_eq(this) {
        tracing::debug!(promise = %this.id(), "rejecting self-resolution");
        return reject(this, E::from(Error::SelfResolution));
    }
    tracing::debug!(promise = %this.id(), adopted = %other.id(), "adopting");
    settle(this, State::Adopted(other));
}

fn reject<T, E>(this: &Deferred<T, E>, reason: E)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    if settle(this, State::Rejected(reason)) {
        hooks::rejected(this.id());
    }
}

/// Moves `this` out of pending and drains its observers. Returns `false`,
/// leaving `this` untouched, when it had already settled.
fn settle<T, E>(this: &Deferred<T, E>, state: State<T, E>) -> bool
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let (deferreds, wakers) = {
        let mut inner = this.inner.borrow_mut();
        let deferreds = match mem::replace(&mut inner.state, state) {
            State::Pending(deferreds) => deferreds,
            settled => {
                inner.state = settled;
                tracing::trace!(promise = %inner.id, "settlement ignored, already settled");
                return false;
            }
        };
        (deferreds, mem::take(&mut inner.wakers))
    };
    tracing::trace!(
        promise = %this.id(),
        state = ?this.state(),
        observers = deferreds.len(),
        "settled"
    );
    finale(this, deferreds);
    // Woken futures re-poll and find the outcome, or the adopted promise.
    for waker in wakers {
        waker.wake();
    }
    true
}

fn finale<T, E>(this: &Deferred<T, E>, deferreds: Deferreds<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match deferreds {
        Deferreds::None => {}
        Deferreds::One(handler) => handle(this, handler),
        Deferreds::Many(handlers) => {
            for handler in handlers {
                handle(this, handler);
            }
        }
    }
}

/// Runs `then` with a fresh resolver/rejecter pair for `promise`, turning an
/// `Err` or panic into a rejection if neither capability was called first.
fn do_resolve<T, E, F>(then: F, promise: &Deferred<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
    F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
{
    let (resolver, rejecter) = capabilities(promise);
    let latch = resolver.latch.clone();
    let raised = match panic::catch_unwind(AssertUnwindSafe(move || then(resolver, rejecter))) {
        Ok(Ok(())) => None,
        Ok(Err(reason)) => Some(reason),
        Err(payload) => Some(E::from(Error::from_panic(payload))),
    };
    if let Some(reason) = raised {
        if latch.try_close() {
            reject(promise, reason);
        }
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Awaiting drains the current thread's [`asap`] queue on every poll, so a
/// plain `block_on` is enough to drive a promise chain. A pending poll is
/// woken again by settlement or by the next task queued on this thread.
impl<T, E> Future for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        asap::run_until_stalled();
        let target = self.chase();
        if let Some(settled) = target.outcome() {
            return Poll::Ready(settled);
        }
        {
            let mut inner = target.inner.borrow_mut();
            if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                inner.wakers.push(cx.waker().clone());
            }
        }
        // The outcome may hang on a task some other future queues later.
        asap::wake_on_schedule(cx.waker());
        Poll::Pending
    }
}
