//! Domains: slice seeding, targeted dispatch, and handlers.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{init_tracing, type_as_id, Calls, Log};
use ripple_store::{
    next_tick, plain, Action, Domain, DomainBase, DomainSet, EnhancedStore, Enhancer,
    MemoryStoreCreator, StoreError, TargetedDispatch, UsageError,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Ducks {
    base: DomainBase<i64>,
    add: TargetedDispatch<i64, i64>,
    reset: TargetedDispatch<i64, ()>,
}

fn ducks() -> Domain<i64, Ducks> {
    Domain::new(0, |base: &DomainBase<i64>| Ducks {
        base: base.clone(),
        add: base.reduce("add", |count: i64, by: i64| count + by),
        reset: base.reduce("reset", |_: i64, _: ()| 0),
    })
}

fn store_with(domains: DomainSet) -> EnhancedStore {
    Enhancer::without_proc()
        .with_domains(domains)
        .enhance(
            MemoryStoreCreator::new(),
            plain(|state: Value, _: &Action| state),
        )
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn initial_slices_are_seeded() {
    init_tracing();
    let store = store_with(
        DomainSet::new()
            .with("ducks", ducks())
            .with("pond", Domain::new(json!({ "depth": 2 }), |_: &DomainBase<Value>| ())),
    );
    assert_eq!(
        store.get_state(),
        json!({ "ducks": 0, "pond": { "depth": 2 } })
    );
}

#[test]
fn targeted_dispatch_reaches_one_named_reducer() {
    init_tracing();
    let domain = ducks();
    let store = store_with(DomainSet::new().with("ducks", domain.clone()));
    let ducks = domain.interface().unwrap();

    let action = ducks.add.call(3).unwrap();
    assert_eq!(action.action_type, "ducks/add");
    assert_eq!(ducks.add.reducer_name(), "add");
    assert_eq!(store.get_state(), json!({ "ducks": 3 }));
    assert_eq!(ducks.base.get_state().unwrap(), 3);

    ducks.reset.call(()).unwrap();
    assert_eq!(store.get_state(), json!({ "ducks": 0 }));
}

#[test]
fn targeted_type_is_configurable() {
    init_tracing();
    let domain = ducks();
    let _store = Enhancer::without_proc()
        .with_domains(DomainSet::new().with("ducks", domain.clone()))
        .with_targeted_type(|domain: &str, reducer: &str, payload: &Value| {
            format!("{domain}:{reducer}:{payload}")
        })
        .enhance(
            MemoryStoreCreator::new(),
            plain(|state: Value, _: &Action| state),
        )
        .unwrap();

    let action = domain.interface().unwrap().add.call(2).unwrap();
    assert_eq!(action.action_type, "ducks:add:2");
}

#[test]
fn unknown_domain_or_reducer_is_a_usage_error() {
    init_tracing();
    let store = store_with(DomainSet::new().with("ducks", ducks()));

    let err = store
        .dispatch(Action::targeted("geese/add", "geese", "add", json!(1)))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Usage(UsageError::UnknownDomain(ref name)) if name == "geese"
    ));

    let err = store
        .dispatch(Action::targeted("ducks/fly", "ducks", "fly", json!(1)))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Usage(UsageError::UnknownReducer { .. })
    ));
    assert_eq!(store.get_state(), json!({ "ducks": 0 }));
}

#[test]
fn targeted_dispatch_before_connect_is_a_usage_error() {
    init_tracing();
    let early = Rc::new(RefCell::new(None));
    let slot = early.clone();
    let domain = Domain::new(0_i64, move |base: &DomainBase<i64>| {
        let add = base.reduce("add", |count: i64, by: i64| count + by);
        *slot.borrow_mut() = Some(add.call(1));
        add
    });
    let store = store_with(DomainSet::new().with("ducks", domain.clone()));

    assert!(matches!(
        early.borrow_mut().take(),
        Some(Err(StoreError::Usage(UsageError::NotConnected(_))))
    ));
    domain.interface().unwrap().call(1).unwrap();
    assert_eq!(store.get_state(), json!({ "ducks": 1 }));
}

#[test]
fn handlers_start_in_order_without_waiting_for_each_other() {
    init_tracing();
    let log = Log::default();
    let (first, second) = (log.clone(), log.clone());
    let domain = ducks()
        .on("QUACK", move |_: Action, _: Rc<Ducks>| {
            let log = first.clone();
            async move {
                log.push("first:start");
                next_tick().await;
                log.push("first:end");
                anyhow::Ok(())
            }
        })
        .on("QUACK", move |_: Action, ducks: Rc<Ducks>| {
            let log = second.clone();
            async move {
                log.push("second");
                ducks.add.call(1)?;
                anyhow::Ok(())
            }
        });
    let store = store_with(DomainSet::new().with("ducks", domain));

    store.dispatch(Action::new("QUACK")).unwrap();
    assert_eq!(log.entries(), vec!["first:start", "second"]);
    assert_eq!(store.get_state(), json!({ "ducks": 1 }));

    store.scheduler().run_until_idle();
    assert_eq!(log.entries(), vec!["first:start", "second", "first:end"]);
}

#[test]
fn handler_dispatch_bursts_are_debounced_and_caused_by_trigger() {
    init_tracing();
    let added = Rc::new(RefCell::new(Vec::<Action>::new()));
    let log = added.clone();
    let domain = ducks().on("QUACK", move |_: Action, ducks: Rc<Ducks>| {
        let log = log.clone();
        async move {
            next_tick().await;
            for _ in 0..3 {
                let action = ducks.add.call(1)?;
                log.borrow_mut().push(action);
            }
            anyhow::Ok(())
        }
    });
    let store = Enhancer::without_proc()
        .with_id_fn(type_as_id)
        .with_domains(DomainSet::new().with("ducks", domain.clone()))
        .enhance(
            MemoryStoreCreator::new(),
            plain(|state: Value, _: &Action| state),
        )
        .unwrap();
    let notified = Calls::default();
    let listener = notified.clone();
    store.subscribe(move || listener.hit());

    store.dispatch(Action::new("QUACK")).unwrap();
    assert_eq!(notified.get(), 1);

    store.scheduler().tick();
    assert_eq!(store.get_state(), json!({ "ducks": 3 }));
    assert_eq!(notified.get(), 2);

    for action in added.borrow().iter() {
        let fingerprint = store.fingerprint(action).unwrap();
        assert_eq!(fingerprint.parent.as_deref(), Some("QUACK"));
        assert_eq!(fingerprint.origin.as_deref(), Some("QUACK"));
    }

    // Outside handler code a targeted dispatch is a new root and notifies
    // before returning.
    let action = domain.interface().unwrap().add.call(1).unwrap();
    assert_eq!(notified.get(), 3);
    assert_eq!(store.fingerprint(&action).unwrap().parent, None);
}

#[test]
fn handler_failure_before_suspension_fails_dispatch() {
    init_tracing();
    let domain = ducks().on("QUACK", |_: Action, _: Rc<Ducks>| async {
        Err::<(), _>(anyhow::anyhow!("no quacking"))
    });
    let store = store_with(DomainSet::new().with("ducks", domain));

    let err = store.dispatch(Action::new("QUACK")).unwrap_err();
    assert!(matches!(err, StoreError::Proc(_)));
}
