//! Actions and the envelope that tells the enhancer how to treat them.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path;

/// Type of the action the base store dispatches once on creation.
pub const INIT_ACTION: &str = "@@ripple/INIT";

/// An immutable record describing an intended state transition.
///
/// Payload fields live in `fields`; fingerprint metadata is written there too,
/// under the keys the enhancer is configured with. The `envelope` says whether
/// the action is a plain action, a put-state action or a targeted dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,

    #[serde(default, skip_serializing_if = "ActionKind::is_plain")]
    pub envelope: ActionKind,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Explicit discriminant for the special actions the enhancer interprets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    Plain,
    Put(PutPayload),
    Targeted(TargetedPayload),
}

impl ActionKind {
    pub fn is_plain(&self) -> bool {
        matches!(self, ActionKind::Plain)
    }
}

/// Replacement value for the state at `keys`. Empty `keys` replaces the whole state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutPayload {
    pub keys: Vec<String>,
    pub data: Value,
}

/// Routes a payload to one named reducer of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetedPayload {
    pub domain: String,
    pub reducer: String,
    pub payload: Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            envelope: ActionKind::Plain,
            fields: Map::new(),
        }
    }

    /// Build a put-state action.
    pub fn put(action_type: impl Into<String>, keys: Vec<String>, data: Value) -> Self {
        Self {
            envelope: ActionKind::Put(PutPayload { keys, data }),
            ..Self::new(action_type)
        }
    }

    /// Build a targeted dispatch for `domain`'s reducer `reducer`.
    pub fn targeted(
        action_type: impl Into<String>,
        domain: impl Into<String>,
        reducer: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            envelope: ActionKind::Targeted(TargetedPayload {
                domain: domain.into(),
                reducer: reducer.into(),
                payload,
            }),
            ..Self::new(action_type)
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Shorthand for the conventional `payload` field.
    pub fn with_payload(self, payload: Value) -> Self {
        self.with_field("payload", payload)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn payload(&self) -> Option<&Value> {
        self.field("payload")
    }

    pub fn put_payload(&self) -> Option<&PutPayload> {
        match &self.envelope {
            ActionKind::Put(put) => Some(put),
            _ => None,
        }
    }

    pub fn targeted_payload(&self) -> Option<&TargetedPayload> {
        match &self.envelope {
            ActionKind::Targeted(targeted) => Some(targeted),
            _ => None,
        }
    }

    /// Value at a nested path inside the action's fields.
    pub fn meta<K: AsRef<str>>(&self, path: &[K]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        path::get(self.fields.get(first.as_ref())?, rest)
    }

    /// Copy of this action with `value` written at a nested path of its fields.
    pub fn with_meta<K: AsRef<str>>(self, path: &[K], value: Value) -> Self {
        if path.is_empty() {
            return self;
        }
        let Self {
            action_type,
            envelope,
            fields,
        } = self;
        let fields = match path::set_owned(Value::Object(fields), path, value) {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        Self {
            action_type,
            envelope,
            fields,
        }
    }

    /// JSON rendering, `type` included.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Test an action is matched against: its type, or an arbitrary predicate.
#[derive(Clone)]
pub enum ActionTest {
    Type(String),
    Predicate(Rc<dyn Fn(&Action) -> bool>),
}

impl ActionTest {
    pub fn predicate(test: impl Fn(&Action) -> bool + 'static) -> Self {
        ActionTest::Predicate(Rc::new(test))
    }

    pub fn matches(&self, action: &Action) -> bool {
        match self {
            ActionTest::Type(action_type) => action.action_type == *action_type,
            ActionTest::Predicate(test) => test(action),
        }
    }
}

impl fmt::Debug for ActionTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionTest::Type(action_type) => f.debug_tuple("Type").field(action_type).finish(),
            ActionTest::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for ActionTest {
    fn from(action_type: &str) -> Self {
        ActionTest::Type(action_type.to_string())
    }
}

impl From<String> for ActionTest {
    fn from(action_type: String) -> Self {
        ActionTest::Type(action_type)
    }
}
