//! Widget declarations and the per-session widget registry.
//!
//! A widget is declared by a display output carrying the [`WIDGET_MIME`]
//! payload: `{"widget": "<kind>", "code_uid": "...", "value": ..., ...}`.
//! The special `App` kind is not a control; it carries notebook-level
//! settings (title, show_code, ...) that are applied to the render config.
//!
//! [`WidgetRegistry`] maps `code_uid` to the current value and the index
//! of the cell that declared it. It is owned by one Execution Engine and
//! rebuilt from scratch on every notebook initialization.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::notebook::{Cell, Notebook, NotebookConfig, WIDGET_MIME};

/// Widget kind of the notebook-level settings pseudo-widget.
pub const APP_WIDGET: &str = "App";

/// Widget kind whose values are upload tokens.
pub const FILE_WIDGET: &str = "File";

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// A control declared by a cell output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetDefinition {
    pub widget: String,
    pub code_uid: String,
    #[serde(default)]
    pub value: Value,
    /// Kind-specific attributes (label, min, max, choices, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WidgetDefinition {
    pub fn is_file(&self) -> bool {
        self.widget == FILE_WIDGET
    }

    /// Same kind and attributes, ignoring the current value.
    pub fn same_shape(&self, other: &WidgetDefinition) -> bool {
        self.widget == other.widget && self.extra == other.extra
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Notebook-level settings carried by the `App` pseudo-widget.
///
/// Every field is optional; only the ones present override the config.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AppSettings {
    pub title: Option<String>,
    pub description: Option<String>,
    pub show_code: Option<bool>,
    pub show_prompt: Option<bool>,
    pub continuous_update: Option<bool>,
    pub static_notebook: Option<bool>,
    pub stop_on_error: Option<bool>,
    pub presentation: Option<Value>,
}

impl AppSettings {
    /// Overwrite the fields of `config` this declaration sets.
    pub fn apply(&self, config: &mut NotebookConfig) {
        if let Some(title) = &self.title {
            config.title = title.clone();
        }
        if let Some(description) = &self.description {
            config.description = description.clone();
        }
        if let Some(v) = self.show_code {
            config.show_code = v;
        }
        if let Some(v) = self.show_prompt {
            config.show_prompt = v;
        }
        if let Some(v) = self.continuous_update {
            config.continuous_update = v;
        }
        if let Some(v) = self.static_notebook {
            config.static_notebook = v;
        }
        if let Some(v) = self.stop_on_error {
            config.stop_on_error = v;
        }
        if let Some(p) = &self.presentation {
            config.presentation = Some(p.clone());
        }
    }
}

/// What a single marker payload declares.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    App(AppSettings),
    Widget(WidgetDefinition),
}

/// Extract every declaration from one cell's outputs, in output order.
///
/// Malformed payloads are logged and skipped.
pub fn declarations(cell: &Cell) -> Vec<Declaration> {
    let mut found = Vec::new();
    for output in &cell.outputs {
        let Some(payload) = output.data().and_then(|d| d.get(WIDGET_MIME)) else {
            continue;
        };
        let kind = payload.get("widget").and_then(Value::as_str);
        let parsed = if kind == Some(APP_WIDGET) {
            serde_json::from_value::<AppSettings>(payload.clone()).map(Declaration::App)
        } else {
            serde_json::from_value::<WidgetDefinition>(payload.clone()).map(Declaration::Widget)
        };
        match parsed {
            Ok(decl) => found.push(decl),
            Err(e) => {
                tracing::warn!(error = %e, kind = ?kind, "Skipping malformed widget declaration");
            }
        }
    }
    found
}

/// All `code_uid`s declared anywhere in the document.
pub fn present_code_uids(nb: &Notebook) -> HashSet<String> {
    nb.cells
        .iter()
        .flat_map(declarations)
        .filter_map(|d| match d {
            Declaration::Widget(w) => Some(w.code_uid),
            Declaration::App(_) => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Value equality
// ---------------------------------------------------------------------------

/// Structural equality for widget values.
///
/// Numbers compare by numeric value so that `5` and `5.0` are equal after a
/// serialization round trip. Arrays compare element-wise in order.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetEntry {
    pub definition: WidgetDefinition,
    /// 0-based index of the declaring cell.
    pub cell_index: usize,
}

/// Result of pushing a client value into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// No widget with that `code_uid` is registered.
    Unknown,
    /// The stored value already equals the pushed one.
    Unchanged,
    /// The value was replaced; re-execution must start at `cell_index`.
    Changed { cell_index: usize },
}

#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    entries: HashMap<String, WidgetEntry>,
}

impl WidgetRegistry {
    /// Build a registry by scanning every cell of an executed document.
    ///
    /// When a `code_uid` is declared twice the first declaring cell wins.
    pub fn rebuild(nb: &Notebook) -> Self {
        let mut registry = Self::default();
        for (index, cell) in nb.cells.iter().enumerate() {
            for decl in declarations(cell) {
                if let Declaration::Widget(definition) = decl {
                    registry
                        .entries
                        .entry(definition.code_uid.clone())
                        .or_insert(WidgetEntry {
                            definition,
                            cell_index: index,
                        });
                }
            }
        }
        registry
    }

    pub fn get(&self, code_uid: &str) -> Option<&WidgetEntry> {
        self.entries.get(code_uid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare `value` with the stored one without recording it.
    pub fn compare_value(&self, code_uid: &str, value: &Value) -> PushOutcome {
        match self.entries.get(code_uid) {
            None => PushOutcome::Unknown,
            Some(entry) if values_equal(&entry.definition.value, value) => PushOutcome::Unchanged,
            Some(entry) => PushOutcome::Changed {
                cell_index: entry.cell_index,
            },
        }
    }

    /// Store `value` for `code_uid` if it differs from the current one.
    pub fn push_value(&mut self, code_uid: &str, value: &Value) -> PushOutcome {
        let outcome = self.compare_value(code_uid, value);
        if let (PushOutcome::Changed { .. }, Some(entry)) = (outcome, self.entries.get_mut(code_uid)) {
            entry.definition.value = value.clone();
        }
        outcome
    }

    /// Register declarations from cells at `from..` after a partial re-run.
    ///
    /// Returns the definitions that are new or whose shape changed, which
    /// the client must (re)build in its panel.
    pub fn merge_from(&mut self, nb: &Notebook, from: usize) -> Vec<WidgetDefinition> {
        let mut updated = Vec::new();
        for (index, cell) in nb.cells.iter().enumerate().skip(from) {
            for decl in declarations(cell) {
                let Declaration::Widget(definition) = decl else {
                    continue;
                };
                match self.entries.get_mut(&definition.code_uid) {
                    Some(entry) => {
                        if !entry.definition.same_shape(&definition) {
                            updated.push(definition.clone());
                        }
                        entry.definition = definition;
                        entry.cell_index = index;
                    }
                    None => {
                        updated.push(definition.clone());
                        self.entries.insert(
                            definition.code_uid.clone(),
                            WidgetEntry {
                                definition,
                                cell_index: index,
                            },
                        );
                    }
                }
            }
        }
        updated
    }

    /// All definitions as a JSON object keyed by `code_uid`.
    pub fn definitions(&self) -> Map<String, Value> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|a, b| (a.1.cell_index, a.0).cmp(&(b.1.cell_index, b.0)));
        sorted
            .into_iter()
            .map(|(uid, e)| (uid.clone(), e.definition.to_value()))
            .collect()
    }
}
