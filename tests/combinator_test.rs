#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };
    use thenable::{all, asap, race, Deferred, Error, PromiseState, Rejecter, Resolution, Resolver};

    type Promise<T> = Deferred<T, Error>;

    fn value<T>(v: T) -> Resolution<T, Error> {
        Resolution::Value(v)
    }

    fn pending<T: Clone + 'static>() -> (Promise<T>, Resolver<T, Error>, Rejecter<T, Error>) {
        Promise::with_resolvers()
    }

    #[test]
    fn test_wrap_returns_the_same_promise() {
        let (promise, _, _) = pending::<u8>();
        let wrapped = Deferred::wrap(Resolution::Deferred(promise.clone()));
        assert_eq!(wrapped.id(), promise.id());

        let boxed = Deferred::wrap(Resolution::thenable(promise.clone()));
        assert_eq!(boxed.id(), promise.id());
    }

    #[test]
    fn test_wrap_plain_value_is_fulfilled() {
        let wrapped: Promise<u8> = Deferred::wrap(value(5));
        assert_eq!(wrapped.state(), PromiseState::Fulfilled);
        assert_eq!(wrapped.settled(), Some(Ok(5)));
    }

    #[test]
    fn test_wrap_foreign_thenable() {
        let wrapped: Promise<&str> = Deferred::wrap(Resolution::foreign(|resolve, _| {
            resolve.resolve("from thenable");
            Ok(())
        }));
        assert_eq!(wrapped.settled(), Some(Ok("from thenable")));

        let failing: Promise<&str> =
            Deferred::wrap(Resolution::foreign(|_, _| Err(Error::rejected("bad then"))));
        assert_eq!(failing.settled(), Some(Err(Error::rejected("bad then"))));
    }

    #[test]
    fn test_rejected_and_catch() {
        let failed = Promise::<u8>::rejected(Error::rejected("nope"));
        assert_eq!(failed.state(), PromiseState::Rejected);
        let recovered = failed.catch(|e| {
            assert_eq!(e, Error::rejected("nope"));
            Ok(value(0))
        });
        let untouched = Promise::resolved(8).catch(|_| Ok(value(0)));
        asap::run_until_stalled();
        assert_eq!(recovered.settled(), Some(Ok(0)));
        assert_eq!(untouched.settled(), Some(Ok(8)));
    }

    #[test]
    fn test_finally_runs_and_passes_through() {
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let ok = Promise::resolved(1).finally(move || counter.set(counter.get() + 1));
        let counter = runs.clone();
        let err = Promise::<u8>::rejected(Error::rejected("e"))
            .finally(move || counter.set(counter.get() + 1));
        assert_eq!(runs.get(), 0);
        asap::run_until_stalled();
        assert_eq!(runs.get(), 2);
        assert_eq!(ok.settled(), Some(Ok(1)));
        assert_eq!(err.settled(), Some(Err(Error::rejected("e"))));
    }

    #[test]
    fn test_all_of_nothing_is_empty() {
        let every = all(Vec::<Resolution<u8, Error>>::new());
        assert_eq!(every.settled(), Some(Ok(vec![])));
    }

    #[test]
    fn test_all_keeps_input_order() {
        let (first, resolve_first, _) = pending::<u8>();
        let (second, resolve_second, _) = pending::<u8>();
        let every = all(vec![
            Resolution::Deferred(first),
            value(2),
            Resolution::Deferred(second),
            Resolution::foreign(|resolve, _| {
                resolve.resolve(4);
                Ok(())
            }),
        ]);
        resolve_second.resolve(3);
        asap::run_until_stalled();
        assert_eq!(every.state(), PromiseState::Pending);

        resolve_first.resolve(1);
        asap::run_until_stalled();
        assert_eq!(every.settled(), Some(Ok(vec![1, 2, 3, 4])));
    }

    #[test]
    fn test_all_unwraps_adopted_elements() {
        let (inner, resolve_inner, _) = pending::<u8>();
        let (outer, resolve_outer, _) = pending::<u8>();
        resolve_outer.resolve_with(Resolution::Deferred(inner));
        resolve_inner.resolve(7);
        // Already settled through the chase, no turn needed.
        let every = all(vec![Resolution::Deferred(outer), value(8)]);
        assert_eq!(every.settled(), Some(Ok(vec![7, 8])));
    }

    #[test]
    fn test_all_rejects_on_first_failure() {
        let (slow, resolve_slow, _) = pending::<u8>();
        let (failing, _, reject_failing) = pending::<u8>();
        let (later, _, reject_later) = pending::<u8>();
        let every = all(vec![
            Resolution::Deferred(slow),
            Resolution::Deferred(failing),
            Resolution::Deferred(later),
        ]);
        reject_failing.reject(Error::rejected("first"));
        asap::run_until_stalled();
        assert_eq!(every.settled(), Some(Err(Error::rejected("first"))));

        // The aggregate is terminal, later outcomes are discarded.
        reject_later.reject(Error::rejected("second"));
        resolve_slow.resolve(1);
        asap::run_until_stalled();
        assert_eq!(every.settled(), Some(Err(Error::rejected("first"))));
    }

    #[test]
    fn test_all_with_presettled_failure() {
        let every = all(vec![
            value(1),
            Resolution::Deferred(Promise::rejected(Error::rejected("already"))),
            value(3),
        ]);
        assert_eq!(every.settled(), Some(Err(Error::rejected("already"))));
    }

    #[test]
    fn test_race_presettled_failure_beats_pending_success() {
        let (slow, resolve_slow, _) = pending::<u8>();
        let first = race(vec![
            Resolution::Deferred(slow),
            Resolution::Deferred(Promise::rejected(Error::rejected("fast"))),
        ]);
        asap::run_until_stalled();
        resolve_slow.resolve(1);
        asap::run_until_stalled();
        assert_eq!(first.settled(), Some(Err(Error::rejected("fast"))));
    }

    #[test]
    fn test_race_first_settlement_wins() {
        let (a, resolve_a, _) = pending::<&str>();
        let (b, resolve_b, _) = pending::<&str>();
        let winner = race(vec![Resolution::Deferred(a), Resolution::Deferred(b)]);
        resolve_b.resolve("b");
        resolve_a.resolve("a");
        asap::run_until_stalled();
        assert_eq!(winner.settled(), Some(Ok("b")));
    }

    #[test]
    fn test_race_plain_values_settle_in_input_order() {
        let winner = race(vec![value(1), value(2)]);
        assert_eq!(winner.state(), PromiseState::Pending);
        asap::run_until_stalled();
        assert_eq!(winner.settled(), Some(Ok(1)));
    }

    #[test]
    fn test_race_of_nothing_stays_pending() {
        let never = race(Vec::<Resolution<u8, Error>>::new());
        asap::run_until_stalled();
        assert_eq!(never.state(), PromiseState::Pending);
    }

    #[test]
    fn test_chained_combinators() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let total = all(vec![value(1_u32), value(2), value(3)])
            .and_then(|values| Ok(value(values.iter().sum::<u32>())))
            .and_then(move |sum| {
                sink.borrow_mut().push(sum);
                Ok(value(sum * 2))
            });
        asap::run_until_stalled();
        assert_eq!(*log.borrow(), vec![6]);
        assert_eq!(total.settled(), Some(Ok(12)));
    }
}
