//! Action fingerprints: a fresh id per dispatched action, plus the parent and
//! origin ids that trace it back to the dispatch that caused it.

use std::rc::Rc;

use serde_json::Value;
use uuid::Uuid;

use crate::action::Action;
use crate::config::Config;
use crate::path::split_dotted;

/// Produces the id stamped onto an action.
pub type IdFn = Rc<dyn Fn(&Action) -> String>;

/// `"{type}-{random}"`. Unique enough to tell dispatches apart, not a secret.
pub fn default_id_fn() -> IdFn {
    Rc::new(|action: &Action| {
        format!("{}-{}", action.action_type, Uuid::new_v4().simple())
    })
}

/// Fingerprint fields as read back from an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub id: String,
    pub parent: Option<String>,
    pub origin: Option<String>,
}

/// Causal position handed to dispatches made in response to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lineage {
    pub parent: String,
    pub origin: String,
}

/// Reads and writes fingerprint fields at the configured paths.
#[derive(Clone)]
pub struct Fingerprinter {
    enabled: bool,
    id_path: Vec<String>,
    parent_path: Vec<String>,
    origin_path: Vec<String>,
    id_fn: IdFn,
}

impl Fingerprinter {
    pub fn new(config: &Config, id_fn: IdFn) -> Self {
        let field_path = |key: &str| {
            let mut path = config
                .meta_key
                .as_deref()
                .map(split_dotted)
                .unwrap_or_default();
            path.extend(split_dotted(key));
            path
        };

        Self {
            enabled: config.fingerprinting,
            id_path: field_path(&config.id_key),
            parent_path: field_path(&config.parent_key),
            origin_path: field_path(&config.origin_key),
            id_fn,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stamp a fresh id. An action without an origin starts a chain, so its
    /// origin becomes its own id. Returns the lineage its responses inherit,
    /// or `None` with fingerprinting disabled.
    pub fn stamp(&self, action: Action) -> (Action, Option<Lineage>) {
        if !self.enabled {
            return (action, None);
        }

        let (action, id) = self.stamp_id(action);
        let existing_origin = action
            .meta(&self.origin_path)
            .and_then(Value::as_str)
            .map(str::to_string);

        let (action, origin) = match existing_origin {
            Some(origin) => (action, origin),
            None => (
                action.with_meta(&self.origin_path, Value::String(id.clone())),
                id.clone(),
            ),
        };

        (action, Some(Lineage { parent: id, origin }))
    }

    /// Write a fresh id only.
    pub fn stamp_id(&self, action: Action) -> (Action, String) {
        let id = (self.id_fn)(&action);
        let action = action.with_meta(&self.id_path, Value::String(id.clone()));
        (action, id)
    }

    /// Mark `action` as caused by the dispatch that produced `lineage`.
    pub fn stamp_causality(&self, action: Action, lineage: &Lineage) -> Action {
        if !self.enabled {
            return action;
        }
        action
            .with_meta(&self.parent_path, Value::String(lineage.parent.clone()))
            .with_meta(&self.origin_path, Value::String(lineage.origin.clone()))
    }

    pub fn read(&self, action: &Action) -> Option<Fingerprint> {
        let text = |path: &[String]| {
            action
                .meta(path)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Some(Fingerprint {
            id: text(&self.id_path)?,
            parent: text(&self.parent_path),
            origin: text(&self.origin_path),
        })
    }
}
