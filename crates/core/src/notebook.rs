//! Notebook document model and persisted render configuration.
//!
//! The shape follows the usual notebook JSON layout (cells with a
//! `cell_type`, `source`, and `outputs`), kept deliberately loose: unknown
//! metadata is carried through as raw JSON.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::DbId;

/// MIME type of the reserved output payload that declares a widget.
pub const WIDGET_MIME: &str = "application/vnd.livenb.widget+json";

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,
    #[serde(deserialize_with = "multiline_string")]
    pub source: String,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub execution_count: Option<u32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Cell {
    pub fn code(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Code,
            source: source.into(),
            outputs: Vec::new(),
            execution_count: None,
            metadata: Map::new(),
        }
    }

    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Markdown,
            ..Self::code(source)
        }
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// Drop outputs and the execution counter.
    pub fn clear(&mut self) {
        self.outputs.clear();
        self.execution_count = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        #[serde(deserialize_with = "multiline_string")]
        text: String,
    },
    DisplayData {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default)]
        execution_count: Option<u32>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// The MIME bundle of a display or result output.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        match self {
            Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Build a display output holding a widget declaration.
    pub fn widget(payload: Value) -> Self {
        let mut data = Map::new();
        data.insert(WIDGET_MIME.to_string(), payload);
        Output::DisplayData {
            data,
            metadata: Map::new(),
        }
    }
}

/// Accept either a string or a list of string fragments.
fn multiline_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Text::deserialize(deserializer)? {
        Text::One(s) => s,
        Text::Many(parts) => parts.concat(),
    })
}

impl Notebook {
    /// Parse a notebook from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text)
            .map_err(|e| CoreError::Validation(format!("Malformed notebook document: {e}")))
    }

    /// Read and parse a notebook file.
    pub async fn from_path(path: &Path) -> Result<Self, CoreError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::capability("notebook-source", format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Number of cells in the document.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Persisted configuration
// ---------------------------------------------------------------------------

/// Render and behaviour settings persisted alongside a notebook.
///
/// Derived from the notebook's `App` declaration and widget outputs on
/// every initialization and written back when it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    pub title: String,
    pub description: String,
    pub show_code: bool,
    pub show_prompt: bool,
    pub continuous_update: bool,
    pub static_notebook: bool,
    pub stop_on_error: bool,
    /// Slide-show settings; `None` renders a regular document.
    pub presentation: Option<Value>,
    /// Widget declarations keyed by `code_uid`, as defaults for the panel.
    pub widgets: BTreeMap<String, Value>,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            show_code: false,
            show_prompt: false,
            continuous_update: true,
            static_notebook: false,
            stop_on_error: false,
            presentation: None,
            widgets: BTreeMap::new(),
        }
    }
}

/// Everything a worker needs to initialize a notebook.
#[derive(Debug, Clone)]
pub struct NotebookSource {
    pub notebook_id: DbId,
    pub owner_id: Option<DbId>,
    pub notebook: Notebook,
    pub config: NotebookConfig,
}
