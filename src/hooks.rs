//! Per-thread observation hooks.
//!
//! These exist for tooling such as unhandled-rejection tracking: one hook sees
//! every observer registration, the other every rejection. Both receive the
//! [`PromiseId`] of the promise involved.
use std::{cell::RefCell, fmt, rc::Rc};

/// Identity of a [`Deferred`](crate::Deferred), unique per thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromiseId(pub u64);

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

type Hook = Rc<dyn Fn(PromiseId)>;

thread_local! {
    static ON_HANDLE: RefCell<Option<Hook>> = const { RefCell::new(None) };
    static ON_REJECT: RefCell<Option<Hook>> = const { RefCell::new(None) };
}

/// Called each time an observer is registered against a promise. The id is
/// that of the promise at the end of any adoption chain.
pub fn set_on_handle<F>(hook: F)
where
    F: Fn(PromiseId) + 'static,
{
    ON_HANDLE.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
}

/// Called each time a promise transitions to rejected.
pub fn set_on_reject<F>(hook: F)
where
    F: Fn(PromiseId) + 'static,
{
    ON_REJECT.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
}

/// Removes both hooks on this thread.
pub fn clear() {
    ON_HANDLE.with(|slot| slot.borrow_mut().take());
    ON_REJECT.with(|slot| slot.borrow_mut().take());
}

pub(crate) fn handled(id: PromiseId) {
    // Clone out of the slot so the hook may itself replace hooks.
    if let Some(hook) = ON_HANDLE.with(|slot| slot.borrow().clone()) {
        hook(id);
    }
}

pub(crate) fn rejected(id: PromiseId) {
    if let Some(hook) = ON_REJECT.with(|slot| slot.borrow().clone()) {
        hook(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hooks_fire_until_cleared() {
        let seen = Rc::new(Cell::new(None));
        let slot = seen.clone();
        set_on_reject(move |id| slot.set(Some(id)));
        rejected(PromiseId(4));
        assert_eq!(seen.get(), Some(PromiseId(4)));

        clear();
        rejected(PromiseId(5));
        assert_eq!(seen.get(), Some(PromiseId(4)));
    }

    #[test]
    fn test_hook_may_replace_itself() {
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        set_on_handle(move |_| {
            counter.set(counter.get() + 1);
            set_on_handle(|_| {});
        });
        handled(PromiseId(1));
        handled(PromiseId(2));
        assert_eq!(count.get(), 1);
        clear();
    }

    #[test]
    fn test_promise_id_display() {
        assert_eq!(PromiseId(12).to_string(), "promise#12");
    }
}
