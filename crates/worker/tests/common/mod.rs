#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use livenb_core::memory::MemoryNotebookStore;
use livenb_core::notebook::{Cell, Notebook, NotebookConfig, NotebookSource, Output};
use livenb_core::storage::LocalStorage;
use livenb_worker::engine::{Engine, EngineDeps};
use livenb_worker::error::WorkerResult;
use livenb_worker::kernel::{CellExecution, CellStatus, Kernel};
use livenb_worker::render::HtmlRenderer;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

pub const NOTEBOOK_ID: i64 = 42;
pub const SESSION_ID: &str = "abc";

// ---------------------------------------------------------------------------
// Scripted kernel
// ---------------------------------------------------------------------------

/// What the fake kernel saw.
#[derive(Debug, Default)]
pub struct KernelLog {
    pub executed: Vec<String>,
    pub set_widgets: Vec<(String, Value)>,
}

/// A kernel that interprets a tiny line language:
///
/// - `slider <uid> <default>`: declare a Slider bound to `uid`;
/// - `text <uid> <default>`: declare a Text widget;
/// - `file <uid>`: declare a File widget;
/// - `select <uid> <src>`: declare a Select whose only choice is `src`'s value;
/// - `show <uid>`: print `uid=<value>`;
/// - `app <json>`: declare App settings;
/// - `title-from <uid>`: App settings with `title` set to `uid`'s value;
/// - `fail`: raise; `stop`: halt execution;
/// - anything else prints its source.
pub struct ScriptedKernel {
    vars: HashMap<String, Value>,
    log: Arc<Mutex<KernelLog>>,
    counter: u32,
}

impl ScriptedKernel {
    pub fn new() -> (Self, Arc<Mutex<KernelLog>>) {
        let log = Arc::new(Mutex::new(KernelLog::default()));
        (
            Self {
                vars: HashMap::new(),
                log: log.clone(),
                counter: 0,
            },
            log,
        )
    }

    fn var_or(&mut self, uid: &str, default: Value) -> Value {
        self.vars.entry(uid.to_string()).or_insert(default).clone()
    }
}

fn stream(text: impl Into<String>) -> Output {
    Output::Stream {
        name: "stdout".into(),
        text: text.into(),
    }
}

#[async_trait]
impl Kernel for ScriptedKernel {
    async fn execute(&mut self, source: &str) -> WorkerResult<CellExecution> {
        self.log.lock().unwrap().executed.push(source.to_string());
        self.counter += 1;

        let mut words = source.splitn(3, ' ');
        let command = words.next().unwrap_or_default();
        let first = words.next().unwrap_or_default().to_string();
        let rest = words.next().unwrap_or_default();

        let (status, outputs) = match command {
            "slider" | "text" => {
                let default = serde_json::from_str(rest).unwrap_or(Value::String(rest.into()));
                let value = self.var_or(&first, default);
                let kind = if command == "slider" { "Slider" } else { "Text" };
                let decl = json!({"widget": kind, "code_uid": first, "value": value});
                (CellStatus::Ok, vec![Output::widget(decl)])
            }
            "file" => {
                let value = self.var_or(&first, Value::Null);
                let decl = json!({"widget": "File", "code_uid": first, "value": value});
                (CellStatus::Ok, vec![Output::widget(decl)])
            }
            "select" => {
                let choice = self.vars.get(rest).cloned().unwrap_or(Value::Null);
                let value = self.var_or(&first, Value::Null);
                let decl = json!({
                    "widget": "Select",
                    "code_uid": first,
                    "value": value,
                    "choices": [choice],
                });
                (CellStatus::Ok, vec![Output::widget(decl)])
            }
            "show" => {
                let value = self.vars.get(&first).cloned().unwrap_or(Value::Null);
                (CellStatus::Ok, vec![stream(format!("{first}={value}"))])
            }
            "app" => {
                let mut settings: Value = serde_json::from_str(&format!("{first} {rest}"))
                    .unwrap_or_else(|_| json!({}));
                settings["widget"] = json!("App");
                (CellStatus::Ok, vec![Output::widget(settings)])
            }
            "title-from" => {
                let title = match self.vars.get(&first) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                (
                    CellStatus::Ok,
                    vec![Output::widget(json!({"widget": "App", "title": title}))],
                )
            }
            "fail" => (
                CellStatus::Error,
                vec![Output::Error {
                    ename: "RuntimeError".into(),
                    evalue: "boom".into(),
                    traceback: Vec::new(),
                }],
            ),
            "stop" => (CellStatus::Stop, Vec::new()),
            _ => (CellStatus::Ok, vec![stream(source)]),
        };

        Ok(CellExecution {
            status,
            outputs,
            execution_count: Some(self.counter),
        })
    }

    async fn set_widget(&mut self, code_uid: &str, value: &Value) -> WorkerResult<()> {
        self.log
            .lock()
            .unwrap()
            .set_widgets
            .push((code_uid.to_string(), value.clone()));
        self.vars.insert(code_uid.to_string(), value.clone());
        Ok(())
    }
}

impl KernelLog {
    pub fn take_executed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.executed)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn notebook(sources: &[&str]) -> Notebook {
    Notebook {
        cells: sources.iter().map(|s| Cell::code(*s)).collect(),
        metadata: Map::new(),
    }
}

pub fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub struct Harness {
    pub engine: Engine,
    pub kernel: Arc<Mutex<KernelLog>>,
    pub notebooks: Arc<MemoryNotebookStore>,
    pub storage_dir: TempDir,
}

impl Harness {
    pub async fn new(sources: &[&str]) -> Self {
        Self::with_config(sources, NotebookConfig::default()).await
    }

    pub async fn with_config(sources: &[&str], config: NotebookConfig) -> Self {
        let notebooks = Arc::new(MemoryNotebookStore::new());
        notebooks
            .put(NotebookSource {
                notebook_id: NOTEBOOK_ID,
                owner_id: Some(7),
                notebook: notebook(sources),
                config,
            })
            .await;

        let storage_dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(storage_dir.path(), "/media"));
        let (kernel, log) = ScriptedKernel::new();

        let engine = Engine::new(
            NOTEBOOK_ID,
            SESSION_ID,
            "light",
            EngineDeps {
                notebooks: notebooks.clone(),
                storage,
                renderer: Arc::new(HtmlRenderer),
                kernel: Box::new(kernel),
            },
        );
        Self {
            engine,
            kernel: log,
            notebooks,
            storage_dir,
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.kernel.lock().unwrap().take_executed()
    }

    /// Outputs of cell `index` in the working copy.
    pub fn outputs(&self, index: usize) -> Vec<Output> {
        self.engine.working_copy().unwrap().cells[index].outputs.clone()
    }
}
