//! Scenario S3 (glitch-free) and S4 (unsubscribe on retracking), §8
//! TESTABLE PROPERTIES.

use std::cell::RefCell;
use std::rc::Rc;

use reactive_graph_core::{batch, create_runtime, ComputedValue, ObservableValue, Reaction};

#[test]
fn glitch_free_unchanged_memo_output_suppresses_downstream_rerun() {
    let rt = create_runtime();
    let x = ObservableValue::new(rt, "x", 1);
    let y = {
        let x = x.clone();
        ComputedValue::new(rt, "y", move || x.get() > 0)
    };

    let log = Rc::new(RefCell::new(Vec::new()));
    let _r = {
        let y = y.clone();
        let log = Rc::clone(&log);
        Reaction::autorun(rt, "r", move || log.borrow_mut().push(y.get()))
    };
    assert_eq!(*log.borrow(), vec![true]);

    batch(rt, || x.set(2));
    assert_eq!(*log.borrow(), vec![true]);

    batch(rt, || x.set(-1));
    assert_eq!(*log.borrow(), vec![true, false]);

    rt.dispose();
}

#[test]
fn retracking_unsubscribes_from_branches_no_longer_read() {
    let rt = create_runtime();
    let cond = ObservableValue::new(rt, "cond", true);
    let a = ObservableValue::new(rt, "a", 1);
    let b = ObservableValue::new(rt, "b", 2);

    let log = Rc::new(RefCell::new(Vec::new()));
    let _r = {
        let (cond, a, b) = (cond.clone(), a.clone(), b.clone());
        let log = Rc::clone(&log);
        Reaction::autorun(rt, "r", move || {
            let value = if cond.get() { a.get() } else { b.get() };
            log.borrow_mut().push(value);
        })
    };
    assert_eq!(*log.borrow(), vec![1]);

    batch(rt, || cond.set(false));
    assert_eq!(*log.borrow(), vec![1, 2]);

    // `a` is no longer read by the reaction's current branch, so writing it
    // must not trigger another run.
    batch(rt, || a.set(99));
    assert_eq!(*log.borrow(), vec![1, 2]);

    batch(rt, || b.set(3));
    assert_eq!(*log.borrow(), vec![1, 2, 3]);

    rt.dispose();
}
