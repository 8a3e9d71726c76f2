//! Pieces of the incremental re-execution algorithm.
//!
//! A `run-notebook` payload is reduced to a [`RunPlan`]: the widgets whose
//! value genuinely changed and the first cell that has to run again (the
//! lowest defining cell among them). Cells before that index keep the
//! outputs of the last snapshot; everything from it onward is re-executed.

use std::collections::HashSet;

use livenb_core::notebook::{Notebook, NotebookConfig};
use livenb_core::protocol::WorkerMessage;
use livenb_core::widgets::{declarations, Declaration, PushOutcome, WidgetRegistry};
use serde_json::{Map, Value};

use crate::error::WorkerResult;
use crate::kernel::{CellStatus, Kernel};

/// What a `run-notebook` payload requires.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// First cell to re-execute (0-based; the defining cell itself reruns).
    pub start: usize,
    /// Changed widgets with their new values, in payload order.
    pub changed: Vec<(String, Value)>,
}

/// Compare every payload value with the registry and plan the rerun.
///
/// Returns `None` when no value changed. Unknown `code_uid`s are ignored.
/// The registry is left untouched; [`commit_plan`] records the values once
/// the rerun has succeeded.
pub fn plan_run(registry: &WidgetRegistry, widgets: &Map<String, Value>) -> Option<RunPlan> {
    let mut start: Option<usize> = None;
    let mut changed = Vec::new();
    for (code_uid, value) in widgets {
        match registry.compare_value(code_uid, value) {
            PushOutcome::Changed { cell_index } => {
                start = Some(start.map_or(cell_index, |s| s.min(cell_index)));
                changed.push((code_uid.clone(), value.clone()));
            }
            PushOutcome::Unchanged => {}
            PushOutcome::Unknown => {
                tracing::debug!(code_uid = %code_uid, "Ignoring value for unknown widget");
            }
        }
    }
    start.map(|start| RunPlan { start, changed })
}

/// Record the values of a completed run in the registry.
pub fn commit_plan(registry: &mut WidgetRegistry, plan: &RunPlan) {
    for (code_uid, value) in &plan.changed {
        registry.push_value(code_uid, value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeOutcome {
    /// Code cells executed.
    pub executed: usize,
    /// Index of the cell that halted the run, if any.
    pub halted_at: Option<usize>,
}

/// Execute cells `[start, end)` of `nb` in order.
///
/// A Stop status always halts; an Error status halts only with
/// `stop_on_error`. Cells after the halting one are cleared.
pub async fn execute_range(
    kernel: &mut dyn Kernel,
    nb: &mut Notebook,
    start: usize,
    stop_on_error: bool,
) -> WorkerResult<RangeOutcome> {
    let mut executed = 0;
    for index in start..nb.cells.len() {
        let cell = &mut nb.cells[index];
        if !cell.is_code() {
            continue;
        }
        let result = kernel.execute(&cell.source).await?;
        cell.outputs = result.outputs;
        cell.execution_count = result.execution_count;
        executed += 1;

        let halt = match result.status {
            CellStatus::Ok => false,
            CellStatus::Stop => true,
            CellStatus::Error => stop_on_error,
        };
        if halt {
            for rest in &mut nb.cells[index + 1..] {
                rest.clear();
            }
            tracing::debug!(cell = index, status = ?result.status, "Execution halted");
            return Ok(RangeOutcome {
                executed,
                halted_at: Some(index),
            });
        }
    }
    Ok(RangeOutcome {
        executed,
        halted_at: None,
    })
}

/// Request keys with no widget declaration left in `present`, sorted.
pub fn hidden_keys(widgets: &Map<String, Value>, present: &HashSet<String>) -> Vec<String> {
    let mut keys: Vec<String> = widgets
        .keys()
        .filter(|k| !present.contains(k.as_str()))
        .cloned()
        .collect();
    keys.sort();
    keys
}

/// Apply the document's `App` declarations to `config`.
///
/// Returns the live `update-title` / `update-show-code` messages for the
/// fields that changed.
pub fn apply_app_settings(nb: &Notebook, config: &mut NotebookConfig) -> Vec<WorkerMessage> {
    let mut next = config.clone();
    for decl in nb.cells.iter().flat_map(declarations) {
        if let Declaration::App(settings) = decl {
            settings.apply(&mut next);
        }
    }

    let mut messages = Vec::new();
    if next.title != config.title {
        messages.push(WorkerMessage::UpdateTitle {
            title: next.title.clone(),
        });
    }
    if next.show_code != config.show_code {
        messages.push(WorkerMessage::UpdateShowCode {
            show_code: next.show_code,
        });
    }
    *config = next;
    messages
}

/// Configuration derived from a freshly initialized document.
pub fn derive_config(
    nb: &Notebook,
    registry: &WidgetRegistry,
    persisted: &NotebookConfig,
) -> NotebookConfig {
    let mut config = persisted.clone();
    apply_app_settings(nb, &mut config);
    config.widgets = registry.definitions().into_iter().collect();
    config
}

#[cfg(test)]
mod tests {
    use livenb_core::notebook::{Cell, Output};
    use serde_json::json;

    use super::*;

    fn widget_cell(payload: Value) -> Cell {
        let mut cell = Cell::code("w = widget()");
        cell.outputs = vec![Output::widget(payload)];
        cell
    }

    fn sample() -> Notebook {
        Notebook {
            cells: vec![
                widget_cell(json!({"widget": "App", "title": "Demo"})),
                widget_cell(json!({"widget": "Slider", "code_uid": "a", "value": 1})),
                Cell::code("print(a)"),
                widget_cell(json!({"widget": "Slider", "code_uid": "b", "value": 2})),
            ],
            metadata: Map::new(),
        }
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    // -- plan_run ---------------------------------------------------------------

    #[test]
    fn unchanged_payload_plans_nothing() {
        let registry = WidgetRegistry::rebuild(&sample());
        assert_eq!(plan_run(&registry, &payload(json!({"a": 1, "b": 2.0}))), None);
    }

    #[test]
    fn start_is_the_lowest_changed_defining_cell() {
        let mut registry = WidgetRegistry::rebuild(&sample());
        let plan = plan_run(&registry, &payload(json!({"a": 1, "b": 9}))).unwrap();
        assert_eq!(plan.start, 3);
        assert_eq!(plan.changed, vec![("b".to_string(), json!(9))]);
        commit_plan(&mut registry, &plan);

        let plan = plan_run(&registry, &payload(json!({"a": 5, "b": 3}))).unwrap();
        assert_eq!(plan.start, 1);
        assert_eq!(plan.changed.len(), 2);
    }

    #[test]
    fn unknown_widgets_are_ignored() {
        let registry = WidgetRegistry::rebuild(&sample());
        assert_eq!(plan_run(&registry, &payload(json!({"ghost": 1}))), None);
    }

    #[test]
    fn widgetless_notebook_never_plans_a_run() {
        let nb = Notebook {
            cells: vec![Cell::code("1 + 1")],
            metadata: Map::new(),
        };
        let registry = WidgetRegistry::rebuild(&nb);
        assert_eq!(plan_run(&registry, &payload(json!({"a": 1}))), None);
    }

    #[test]
    fn planning_does_not_record_values_until_committed() {
        let mut registry = WidgetRegistry::rebuild(&sample());
        let changed = payload(json!({"a": 4}));

        let plan = plan_run(&registry, &changed).unwrap();
        assert_eq!(plan_run(&registry, &changed), Some(plan.clone()));

        commit_plan(&mut registry, &plan);
        assert_eq!(plan_run(&registry, &changed), None);
    }

    // -- hidden_keys ------------------------------------------------------------

    #[test]
    fn hidden_keys_lists_request_keys_without_declarations() {
        let present: HashSet<String> = ["a".to_string()].into();
        assert_eq!(
            hidden_keys(&payload(json!({"b": 1, "a": 2, "c": 3})), &present),
            vec!["b", "c"]
        );
        assert!(hidden_keys(&payload(json!({"a": 2})), &present).is_empty());
    }

    // -- App settings -----------------------------------------------------------

    #[test]
    fn app_changes_emit_live_updates() {
        let mut config = NotebookConfig::default();
        let messages = apply_app_settings(&sample(), &mut config);
        assert_eq!(
            messages,
            vec![WorkerMessage::UpdateTitle {
                title: "Demo".into()
            }]
        );
        assert_eq!(config.title, "Demo");
        assert!(apply_app_settings(&sample(), &mut config).is_empty());
    }

    #[test]
    fn derived_config_carries_widget_defaults() {
        let nb = sample();
        let registry = WidgetRegistry::rebuild(&nb);
        let config = derive_config(&nb, &registry, &NotebookConfig::default());
        assert_eq!(config.title, "Demo");
        assert_eq!(config.widgets.len(), 2);
        assert_eq!(config.widgets["b"]["value"], json!(2));
    }
}
