//! Scenarios S1 (basic tracking) and S2 (batching suppresses intermediates),
//! §8 TESTABLE PROPERTIES.

use std::cell::RefCell;
use std::rc::Rc;

use reactive_graph_core::{batch, create_runtime, ComputedValue, ObservableValue, Reaction};

#[test]
fn basic_tracking_logs_once_per_relevant_change() {
    let rt = create_runtime();
    let a = ObservableValue::new(rt, "a", 1);
    let b = ObservableValue::new(rt, "b", 2);
    let c = {
        let (a, b) = (a.clone(), b.clone());
        ComputedValue::new(rt, "c", move || a.get() + b.get())
    };

    let log = Rc::new(RefCell::new(Vec::new()));
    let _r = {
        let c = c.clone();
        let log = Rc::clone(&log);
        Reaction::autorun(rt, "r", move || log.borrow_mut().push(c.get()))
    };
    assert_eq!(*log.borrow(), vec![3]);

    batch(rt, || a.set(10));
    assert_eq!(*log.borrow(), vec![3, 12]);

    // Same value again: no change, no log.
    batch(rt, || a.set(10));
    assert_eq!(*log.borrow(), vec![3, 12]);

    rt.dispose();
}

#[test]
fn batching_suppresses_intermediate_values() {
    let rt = create_runtime();
    let a = ObservableValue::new(rt, "a", 1);
    let b = ObservableValue::new(rt, "b", 2);
    let c = {
        let (a, b) = (a.clone(), b.clone());
        ComputedValue::new(rt, "c", move || a.get() + b.get())
    };

    let log = Rc::new(RefCell::new(Vec::new()));
    let _r = {
        let c = c.clone();
        let log = Rc::clone(&log);
        Reaction::autorun(rt, "r", move || log.borrow_mut().push(c.get()))
    };
    assert_eq!(*log.borrow(), vec![3]);

    batch(rt, || {
        a.set(5);
        a.set(7);
        b.set(3);
    });
    assert_eq!(*log.borrow(), vec![3, 10]);

    rt.dispose();
}
