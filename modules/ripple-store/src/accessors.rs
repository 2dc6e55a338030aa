//! Path-addressed state access for proc code.
//!
//! Procs read state by path and write it by dispatching put actions, so no
//! reducer has to be written per field.

use std::rc::Rc;

use serde_json::Value;

use crate::action::Action;
use crate::error::StoreResult;
use crate::path;
use crate::put::PutActionConfig;

/// Reads the current store state by path.
#[derive(Clone)]
pub struct StateReader {
    get_state: Rc<dyn Fn() -> Option<Value>>,
}

impl StateReader {
    /// `get_state` yields the whole state, or `None` once the store is gone.
    pub fn new(get_state: impl Fn() -> Option<Value> + 'static) -> Self {
        Self {
            get_state: Rc::new(get_state),
        }
    }

    /// Value at `path`; the whole state for an empty path. `None` when a
    /// segment is missing.
    pub fn get<K: AsRef<str>>(&self, path: &[K]) -> Option<Value> {
        let state = (self.get_state)()?;
        path::get(&state, path).cloned()
    }

    pub fn whole(&self) -> Option<Value> {
        (self.get_state)()
    }
}

/// Build the put action a putter dispatches for `trigger`.
pub fn put_action(
    trigger: &Action,
    config: &PutActionConfig,
    keys: Vec<String>,
    data: Value,
) -> Action {
    Action::put(config.action_type(trigger), keys, data)
}

/// Writes state by path on behalf of the action that triggered a proc.
#[derive(Clone)]
pub struct StatePutter {
    trigger: Action,
    config: PutActionConfig,
    reader: StateReader,
    dispatch: Rc<dyn Fn(Action) -> StoreResult<Action>>,
}

impl StatePutter {
    /// `dispatch` should skip the proc layer.
    pub fn new(
        trigger: Action,
        config: PutActionConfig,
        reader: StateReader,
        dispatch: impl Fn(Action) -> StoreResult<Action> + 'static,
    ) -> Self {
        Self {
            trigger,
            config,
            reader,
            dispatch: Rc::new(dispatch),
        }
    }

    /// Replace the value at `path` with `update(current)`. Missing values read
    /// as `Null`. Returns the dispatched put action.
    pub fn put<K: AsRef<str>>(
        &self,
        path: &[K],
        update: impl FnOnce(Value) -> Value,
    ) -> StoreResult<Action> {
        let current = self.reader.get(path).unwrap_or(Value::Null);
        let keys = path.iter().map(|key| key.as_ref().to_string()).collect();
        let action = put_action(&self.trigger, &self.config, keys, update(current));
        (self.dispatch)(action)
    }
}

/// Read state by path from anything with a `get_state(&[&str])` method.
///
/// ```ignore
/// let count = get_state!(hooks, "counters", "a");
/// let everything = get_state!(hooks);
/// ```
#[macro_export]
macro_rules! get_state {
    ($hooks:expr $(, $key:expr)* $(,)?) => {{
        let keys: &[&str] = &[$($key),*];
        $hooks.get_state(keys)
    }};
}

/// Update state by path from anything with a `put_state(&[&str], f)` method.
/// The producer is mandatory; an empty invocation does not compile.
///
/// ```ignore
/// put_state!(hooks, "x", "y" => |n| json!(n.as_i64().unwrap_or(0) + 1))?;
/// put_state!(hooks => |_| json!({}))?;
/// ```
#[macro_export]
macro_rules! put_state {
    ($hooks:expr $(, $key:expr)* => $update:expr) => {{
        let keys: &[&str] = &[$($key),*];
        $hooks.put_state(keys, $update)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn reader_of(state: Value) -> StateReader {
        StateReader::new(move || Some(state.clone()))
    }

    #[test]
    fn reader_walks_paths() {
        let reader = reader_of(json!({ "x": { "y": 5 } }));
        assert_eq!(reader.get(&["x", "y"]), Some(json!(5)));
        assert_eq!(reader.get(&["x", "missing", "deeper"]), None);
        assert_eq!(reader.get::<&str>(&[]), Some(json!({ "x": { "y": 5 } })));
    }

    #[test]
    fn reader_of_dropped_store_sees_nothing() {
        let reader = StateReader::new(|| None);
        assert_eq!(reader.whole(), None);
        assert_eq!(reader.get(&["x"]), None);
    }

    #[test]
    fn putter_dispatches_computed_put_action() {
        let dispatched = Rc::new(RefCell::new(Vec::new()));
        let sink = dispatched.clone();
        let putter = StatePutter::new(
            Action::new("INCR"),
            PutActionConfig::default(),
            reader_of(json!({ "x": { "y": 5 } })),
            move |action| {
                sink.borrow_mut().push(action.clone());
                Ok(action)
            },
        );

        putter
            .put(&["x", "y"], |n| json!(n.as_i64().unwrap_or(0) + 1))
            .unwrap();

        let dispatched = dispatched.borrow();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].action_type, "INCR/PUT");
        let put = dispatched[0].put_payload().unwrap();
        assert_eq!(put.keys, vec!["x", "y"]);
        assert_eq!(put.data, json!(6));
    }

    #[test]
    fn putter_reads_missing_values_as_null() {
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let putter = StatePutter::new(
            Action::new("LOAD"),
            PutActionConfig::default(),
            reader_of(json!({})),
            Ok,
        );

        putter
            .put(&["absent"], move |current| {
                *sink.borrow_mut() = Some(current);
                json!("filled")
            })
            .unwrap();
        assert_eq!(*seen.borrow(), Some(Value::Null));
    }

    struct Fake {
        state: Value,
        puts: RefCell<Vec<(Vec<String>, Value)>>,
    }

    impl Fake {
        fn get_state(&self, keys: &[&str]) -> Option<Value> {
            path::get(&self.state, keys).cloned()
        }

        fn put_state(&self, keys: &[&str], update: impl FnOnce(Value) -> Value) -> Option<()> {
            let current = self.get_state(keys).unwrap_or(Value::Null);
            let keys = keys.iter().map(|key| key.to_string()).collect();
            self.puts.borrow_mut().push((keys, update(current)));
            Some(())
        }
    }

    #[test]
    fn macros_pass_variadic_keys() {
        let fake = Fake {
            state: json!({ "a": { "b": 2 } }),
            puts: RefCell::new(Vec::new()),
        };

        assert_eq!(get_state!(fake, "a", "b"), Some(json!(2)));
        assert_eq!(get_state!(fake), Some(json!({ "a": { "b": 2 } })));

        put_state!(fake, "a", "b" => |n: Value| json!(n.as_i64().unwrap_or(0) * 10));
        put_state!(fake => |_| json!(null));
        assert_eq!(
            *fake.puts.borrow(),
            vec![
                (vec!["a".to_string(), "b".to_string()], json!(20)),
                (vec![], json!(null)),
            ]
        );
    }
}
