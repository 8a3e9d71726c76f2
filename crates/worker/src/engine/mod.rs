//! The per-session execution engine.
//!
//! One engine owns one kernel and one notebook. It consumes
//! [`ClientMessage`]s strictly in order on a single task; a `run-notebook`
//! that arrives mid-run waits for the current one to finish.
//!
//! Working state after `init-notebook`:
//!
//! - `baseline`: the fully executed document as initialized;
//! - `nb`: the working copy from the last run;
//! - `prev_snapshot`: a copy of `nb` after the last completed run, if any;
//! - `prev_widget_values`: the payload of that run.

pub mod incremental;

use std::sync::Arc;

use livenb_core::notebook::Notebook;
use livenb_core::notebook::NotebookConfig;
use livenb_core::protocol::{ClientMessage, WorkerMessage};
use livenb_core::storage::ArtifactStorage;
use livenb_core::store::NotebookStore;
use livenb_core::types::DbId;
use livenb_core::widgets::{present_code_uids, WidgetRegistry};
use livenb_core::worker_state::WorkerState;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{WorkerError, WorkerResult};
use crate::kernel::Kernel;
use crate::render::{RenderOptions, Renderer};

use self::incremental::{
    apply_app_settings, commit_plan, derive_config, execute_range, hidden_keys, plan_run, RunPlan,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Idle,
    Busy,
    Terminated,
}

/// Collaborators an engine drives.
pub struct EngineDeps {
    pub notebooks: Arc<dyn NotebookStore>,
    pub storage: Arc<dyn ArtifactStorage>,
    pub renderer: Arc<dyn Renderer>,
    pub kernel: Box<dyn Kernel>,
}

struct Loaded {
    baseline: Notebook,
    nb: Notebook,
    config: NotebookConfig,
    registry: WidgetRegistry,
    prev_snapshot: Option<Notebook>,
    prev_widget_values: Map<String, Value>,
}

pub struct Engine {
    notebook_id: DbId,
    session_id: String,
    theme: String,
    notebooks: Arc<dyn NotebookStore>,
    storage: Arc<dyn ArtifactStorage>,
    renderer: Arc<dyn Renderer>,
    kernel: Box<dyn Kernel>,
    state: watch::Sender<WorkerState>,
    phase: Phase,
    loaded: Option<Loaded>,
}

/// Channels to a spawned engine task.
pub struct EngineHandle {
    pub commands: mpsc::UnboundedSender<ClientMessage>,
    pub outbound: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Running while idle, Busy while executing.
    pub state: watch::Receiver<WorkerState>,
    pub task: tokio::task::JoinHandle<()>,
}

impl Engine {
    pub fn new(
        notebook_id: DbId,
        session_id: impl Into<String>,
        theme: impl Into<String>,
        deps: EngineDeps,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Running);
        Self {
            notebook_id,
            session_id: session_id.into(),
            theme: theme.into(),
            notebooks: deps.notebooks,
            storage: deps.storage,
            renderer: deps.renderer,
            kernel: deps.kernel,
            state,
            phase: Phase::Uninitialized,
            loaded: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// The working copy from the last init or run.
    pub fn working_copy(&self) -> Option<&Notebook> {
        self.loaded.as_ref().map(|l| &l.nb)
    }

    pub fn baseline(&self) -> Option<&Notebook> {
        self.loaded.as_ref().map(|l| &l.baseline)
    }

    pub fn snapshot(&self) -> Option<&Notebook> {
        self.loaded.as_ref().and_then(|l| l.prev_snapshot.as_ref())
    }

    pub fn last_widget_values(&self) -> Option<&Map<String, Value>> {
        self.loaded.as_ref().map(|l| &l.prev_widget_values)
    }

    pub fn config(&self) -> Option<&NotebookConfig> {
        self.loaded.as_ref().map(|l| &l.config)
    }

    /// Process one message and return the replies for the client group.
    pub async fn handle(&mut self, message: ClientMessage) -> WorkerResult<Vec<WorkerMessage>> {
        if self.phase == Phase::Terminated {
            return Ok(Vec::new());
        }
        match message {
            ClientMessage::InitNotebook => {
                self.set_busy(true);
                let result = self.init().await;
                self.set_busy(false);
                result
            }
            ClientMessage::RunNotebook { widgets } => self.run(widgets).await,
            ClientMessage::DisplayNotebook => {
                let loaded = self.require_loaded("display-notebook")?;
                Ok(vec![WorkerMessage::ExecutedNotebook {
                    body: self.render(&loaded.nb, &loaded.config, false),
                    reload_notebook: false,
                }])
            }
            ClientMessage::SaveNotebook => {
                self.save_html().await?;
                Ok(vec![WorkerMessage::SavedNotebook])
            }
            ClientMessage::DownloadHtml => {
                let saved = self.save_html().await?;
                Ok(vec![WorkerMessage::DownloadHtml {
                    url: saved.url,
                    filename: saved.filename,
                }])
            }
            ClientMessage::DownloadPdf => {
                let loaded = self.require_loaded("download-pdf")?;
                let html = self.render(&loaded.nb, &loaded.config, true);
                let saved = self
                    .storage
                    .save_pdf(
                        &self.session_id,
                        html.as_bytes(),
                        loaded.config.presentation.is_some(),
                    )
                    .await?;
                Ok(vec![WorkerMessage::DownloadPdf {
                    url: saved.url,
                    filename: saved.filename,
                }])
            }
            ClientMessage::CloseWorker => {
                self.phase = Phase::Terminated;
                tracing::info!(session_id = %self.session_id, "Engine terminated");
                Ok(Vec::new())
            }
            // Relay-level messages; nothing for the engine to do.
            ClientMessage::WorkerPing | ClientMessage::ServerAddress { .. } => Ok(Vec::new()),
        }
    }

    /// Run on a task until `commands` closes, `cancel` fires, or the engine
    /// terminates.
    pub fn spawn(self, cancel: CancellationToken) -> EngineHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let (tx, outbound) = mpsc::unbounded_channel();
        let state = self.subscribe_state();
        let task = tokio::spawn(self.run_loop(rx, tx, cancel));
        EngineHandle {
            commands,
            outbound,
            state,
            task,
        }
    }

    async fn run_loop(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClientMessage>,
        outbound: mpsc::UnboundedSender<WorkerMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = commands.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let purpose = message.purpose();
            match self.handle(message).await {
                Ok(replies) => {
                    for reply in replies {
                        if outbound.send(reply).is_err() {
                            tracing::debug!("Outbound channel closed");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(?purpose, session_id = %self.session_id, error = %e, "Engine operation failed");
                }
            }
            if self.phase == Phase::Terminated {
                break;
            }
        }
        tracing::debug!(session_id = %self.session_id, "Engine loop stopped");
    }

    // -- operations ------------------------------------------------------------

    async fn init(&mut self) -> WorkerResult<Vec<WorkerMessage>> {
        let source = self.notebooks.load(self.notebook_id).await?;
        let mut nb = source.notebook;
        for cell in &mut nb.cells {
            cell.clear();
        }
        let outcome =
            execute_range(self.kernel.as_mut(), &mut nb, 0, source.config.stop_on_error).await?;

        let registry = WidgetRegistry::rebuild(&nb);
        let config = derive_config(&nb, &registry, &source.config);
        let mut reload_notebook = false;
        if config != source.config {
            match self.notebooks.save_config(self.notebook_id, &config).await {
                Ok(()) => reload_notebook = true,
                Err(e) => {
                    tracing::warn!(notebook_id = self.notebook_id, error = %e, "Failed to persist derived config");
                }
            }
        }

        let body = self.render(&nb, &config, false);
        let widgets = registry.definitions();
        tracing::info!(
            notebook_id = self.notebook_id,
            session_id = %self.session_id,
            cells = nb.len(),
            executed = outcome.executed,
            widgets = registry.len(),
            reload_notebook,
            "Notebook initialized",
        );

        self.loaded = Some(Loaded {
            baseline: nb.clone(),
            nb,
            config,
            registry,
            prev_snapshot: None,
            prev_widget_values: Map::new(),
        });
        Ok(vec![
            WorkerMessage::ExecutedNotebook {
                body,
                reload_notebook,
            },
            WorkerMessage::InitWidgets { widgets },
        ])
    }

    async fn run(&mut self, widgets: Map<String, Value>) -> WorkerResult<Vec<WorkerMessage>> {
        let loaded = self
            .loaded
            .as_ref()
            .ok_or_else(|| not_initialized("run-notebook"))?;
        let Some(plan) = plan_run(&loaded.registry, &widgets) else {
            tracing::debug!(session_id = %self.session_id, "No widget changed; skipping run");
            return Ok(Vec::new());
        };

        // A failed rerun records nothing, so resending the payload retries it.
        self.set_busy(true);
        let result = self.rerun(plan, widgets).await;
        self.set_busy(false);
        result
    }

    async fn rerun(
        &mut self,
        plan: RunPlan,
        widgets: Map<String, Value>,
    ) -> WorkerResult<Vec<WorkerMessage>> {
        let Self {
            kernel,
            storage,
            renderer,
            loaded,
            theme,
            session_id,
            ..
        } = self;
        let loaded = loaded.as_mut().ok_or_else(|| not_initialized("run-notebook"))?;

        for (code_uid, value) in &plan.changed {
            let is_file = loaded
                .registry
                .get(code_uid)
                .is_some_and(|entry| entry.definition.is_file());
            let value = if is_file {
                resolve_upload(storage.as_ref(), value).await?
            } else {
                value.clone()
            };
            kernel.set_widget(code_uid, &value).await?;
        }

        let mut nb = loaded
            .prev_snapshot
            .clone()
            .unwrap_or_else(|| loaded.baseline.clone());
        let outcome =
            execute_range(kernel.as_mut(), &mut nb, plan.start, loaded.config.stop_on_error).await?;

        let live_updates = apply_app_settings(&nb, &mut loaded.config);
        let options = RenderOptions::from_config(&loaded.config, theme.as_str());
        let mut messages = vec![WorkerMessage::ExecutedNotebook {
            body: renderer.render(&nb, &options),
            reload_notebook: false,
        }];

        let hidden = hidden_keys(&widgets, &present_code_uids(&nb));
        if !hidden.is_empty() {
            messages.push(WorkerMessage::HideWidgets { keys: hidden });
        }
        messages.extend(live_updates);

        commit_plan(&mut loaded.registry, &plan);
        let updated = loaded.registry.merge_from(&nb, plan.start);
        if !updated.is_empty() {
            messages.push(WorkerMessage::UpdateWidgets {
                widgets: updated
                    .into_iter()
                    .map(|d| (d.code_uid.clone(), d.to_value()))
                    .collect(),
            });
        }

        tracing::debug!(
            session_id = %session_id,
            start = plan.start,
            changed = plan.changed.len(),
            executed = outcome.executed,
            halted_at = ?outcome.halted_at,
            "Notebook re-executed",
        );

        loaded.prev_snapshot = Some(nb.clone());
        loaded.nb = nb;
        loaded.prev_widget_values = widgets;
        Ok(messages)
    }

    async fn save_html(&self) -> WorkerResult<livenb_core::storage::SavedArtifact> {
        let loaded = self.require_loaded("save-notebook")?;
        let html = self.render(&loaded.nb, &loaded.config, true);
        Ok(self.storage.save_html(&self.session_id, html.as_bytes()).await?)
    }

    // -- helpers ---------------------------------------------------------------

    fn require_loaded(&self, purpose: &str) -> WorkerResult<&Loaded> {
        self.loaded.as_ref().ok_or_else(|| not_initialized(purpose))
    }

    fn render(&self, nb: &Notebook, config: &NotebookConfig, full_document: bool) -> String {
        let mut options = RenderOptions::from_config(config, &self.theme);
        options.full_document = full_document;
        self.renderer.render(nb, &options)
    }

    fn set_busy(&mut self, busy: bool) {
        let (phase, state) = if busy {
            (Phase::Busy, WorkerState::Busy)
        } else {
            (Phase::Idle, WorkerState::Running)
        };
        self.phase = phase;
        self.state.send_replace(state);
    }
}

fn not_initialized(purpose: &str) -> WorkerError {
    WorkerError::Protocol(format!("{purpose} before init-notebook"))
}

/// Resolve a File widget's upload token to the local path the kernel reads.
async fn resolve_upload(storage: &dyn ArtifactStorage, value: &Value) -> WorkerResult<Value> {
    let Some(token) = value.as_str() else {
        return Err(WorkerError::Protocol(format!(
            "File widget value must be an upload token, got {value}"
        )));
    };
    let path = storage.load_upload(token).await?;
    Ok(Value::String(path.display().to_string()))
}
