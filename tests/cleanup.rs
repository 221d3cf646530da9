//! Scenario S6 (observable-object administration), §8 TESTABLE PROPERTIES.

use std::cell::RefCell;
use std::rc::Rc;

use reactive_graph_core::{create_runtime, Change, ObservableObject};

#[test]
fn update_and_remove_emit_exactly_one_record_each_and_deleted_keys_read_as_none() {
    let rt = create_runtime();
    let obj = ObservableObject::new(rt, "obj");
    obj.add_observable_prop("x", 1i32);

    let records = Rc::new(RefCell::new(Vec::new()));
    {
        let records = Rc::clone(&records);
        obj.observe(move |change| records.borrow_mut().push(change.clone()));
    }

    obj.set("x", 2i32);
    assert_eq!(records.borrow().len(), 1);
    match &records.borrow()[0] {
        Change::Update { name, old_value, new_value } => {
            assert_eq!(name, "x");
            assert_eq!(*old_value.downcast_ref::<i32>().unwrap(), 1);
            assert_eq!(*new_value.downcast_ref::<i32>().unwrap(), 2);
        }
        other => panic!("expected an Update record, got {other:?}"),
    }

    obj.remove("x");
    assert_eq!(records.borrow().len(), 2);
    match &records.borrow()[1] {
        Change::Remove { name, old_value } => {
            assert_eq!(name, "x");
            assert_eq!(*old_value.downcast_ref::<i32>().unwrap(), 2);
        }
        other => panic!("expected a Remove record, got {other:?}"),
    }

    assert_eq!(obj.get::<i32>("x"), None, "a removed property reads as undefined");

    rt.dispose();
}

#[test]
fn an_interceptor_returning_none_cancels_the_write() {
    let rt = create_runtime();
    let obj = ObservableObject::new(rt, "obj");
    obj.add_observable_prop("x", 1i32);
    obj.intercept(|change| match &change {
        Change::Update { new_value, .. } if new_value.downcast_ref::<i32>() == Some(&13) => None,
        _ => Some(change),
    });

    let records = Rc::new(RefCell::new(Vec::new()));
    {
        let records = Rc::clone(&records);
        obj.observe(move |change| records.borrow_mut().push(change.clone()));
    }

    obj.set("x", 13i32);
    assert_eq!(obj.get::<i32>("x"), Some(1), "cancelled write must not commit");
    assert!(records.borrow().is_empty(), "a cancelled write must not notify listeners");

    obj.set("x", 2i32);
    assert_eq!(obj.get::<i32>("x"), Some(2));
    assert_eq!(records.borrow().len(), 1);

    rt.dispose();
}

#[test]
#[should_panic(expected = "not extensible")]
fn adding_a_property_after_seal_panics() {
    let rt = create_runtime();
    let obj = ObservableObject::new(rt, "obj");
    obj.seal();
    obj.add_observable_prop("x", 1i32);
}

#[test]
fn keys_reflects_additions_and_removals() {
    let rt = create_runtime();
    let obj = ObservableObject::new(rt, "obj");
    obj.add_observable_prop("x", 1i32);
    assert_eq!(obj.keys(), vec!["x".to_string()]);

    obj.add_observable_prop("y", 2i32);
    let mut keys = obj.keys();
    keys.sort();
    assert_eq!(keys, vec!["x".to_string(), "y".to_string()]);

    obj.remove("x");
    assert_eq!(obj.keys(), vec!["y".to_string()]);

    rt.dispose();
}

#[test]
fn removing_a_computed_prop_runs_interceptors_and_notifies_listeners_like_a_data_prop() {
    let rt = create_runtime();
    let obj = ObservableObject::new(rt, "obj");
    obj.add_computed_prop("c", || 42i32, None);

    let intercepted = Rc::new(RefCell::new(false));
    {
        let intercepted = Rc::clone(&intercepted);
        obj.intercept(move |change| {
            if matches!(change, Change::Remove { .. }) {
                *intercepted.borrow_mut() = true;
            }
            Some(change)
        });
    }

    let records = Rc::new(RefCell::new(Vec::new()));
    {
        let records = Rc::clone(&records);
        obj.observe(move |change| records.borrow_mut().push(change.clone()));
    }

    obj.remove("c");
    assert!(*intercepted.borrow(), "removing a computed prop must run through the same interceptor chain as a data prop");
    assert_eq!(records.borrow().len(), 1);
    match &records.borrow()[0] {
        Change::Remove { name, old_value } => {
            assert_eq!(name, "c");
            assert_eq!(*old_value.downcast_ref::<i32>().unwrap(), 42);
        }
        other => panic!("expected a Remove record, got {other:?}"),
    }

    rt.dispose();
}
