//! Notebook to HTML.
//!
//! The browser client inserts the rendered body into its page, so by
//! default only a fragment is produced. Saved and downloaded artifacts
//! request a full document.

use livenb_core::notebook::{Cell, CellType, Notebook, NotebookConfig, Output, WIDGET_MIME};
use serde_json::{Map, Value};

/// Per-render presentation switches.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub title: String,
    pub show_code: bool,
    pub show_prompt: bool,
    /// Render cells as slides.
    pub presentation: bool,
    pub theme: String,
    /// Wrap the body in a standalone `<html>` document.
    pub full_document: bool,
}

impl RenderOptions {
    pub fn from_config(config: &NotebookConfig, theme: &str) -> Self {
        Self {
            title: config.title.clone(),
            show_code: config.show_code,
            show_prompt: config.show_prompt,
            presentation: config.presentation.is_some(),
            theme: theme.to_string(),
            full_document: false,
        }
    }

    pub fn full_document(mut self) -> Self {
        self.full_document = true;
        self
    }
}

/// The "render" capability.
pub trait Renderer: Send + Sync {
    fn render(&self, nb: &Notebook, options: &RenderOptions) -> String;
}

/// Plain HTML renderer.
///
/// Markdown source is emitted escaped inside a `markdown` block for the
/// client to format. Widget declarations are never rendered; the client
/// draws widgets in its side panel.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn render(&self, nb: &Notebook, options: &RenderOptions) -> String {
        let mut body = String::new();
        for cell in &nb.cells {
            let html = render_cell(cell, options);
            if html.is_empty() {
                continue;
            }
            if options.presentation {
                body.push_str("<section class=\"slide\">");
                body.push_str(&html);
                body.push_str("</section>\n");
            } else {
                body.push_str(&html);
                body.push('\n');
            }
        }

        let class = format!("livenb theme-{}", escape(&options.theme));
        if !options.full_document {
            return format!("<div class=\"{class}\">\n{body}</div>");
        }
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body class=\"{class}\">\n{body}</body>\n</html>\n",
            escape(&options.title)
        )
    }
}

fn render_cell(cell: &Cell, options: &RenderOptions) -> String {
    match cell.cell_type {
        CellType::Markdown => format!(
            "<div class=\"cell markdown\">{}</div>",
            escape(&cell.source)
        ),
        CellType::Raw => String::new(),
        CellType::Code => {
            let mut html = String::new();
            if options.show_code {
                html.push_str("<div class=\"input\">");
                if options.show_prompt {
                    let count = cell
                        .execution_count
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| " ".into());
                    html.push_str(&format!("<span class=\"prompt\">In [{count}]:</span>"));
                }
                html.push_str(&format!("<pre><code>{}</code></pre></div>", escape(&cell.source)));
            }
            for output in &cell.outputs {
                html.push_str(&render_output(output));
            }
            if html.is_empty() {
                html
            } else {
                format!("<div class=\"cell code\">{html}</div>")
            }
        }
    }
}

fn render_output(output: &Output) -> String {
    match output {
        Output::Stream { name, text } => format!(
            "<pre class=\"output stream {}\">{}</pre>",
            escape(name),
            escape(text)
        ),
        Output::Error {
            ename,
            evalue,
            traceback,
        } => {
            let mut text = format!("{ename}: {evalue}");
            for line in traceback {
                text.push('\n');
                text.push_str(line);
            }
            format!("<pre class=\"output error\">{}</pre>", escape(&text))
        }
        Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => render_bundle(data),
    }
}

/// Pick the richest displayable representation of a MIME bundle.
fn render_bundle(data: &Map<String, Value>) -> String {
    if data.contains_key(WIDGET_MIME) {
        return String::new();
    }
    if let Some(html) = data.get("text/html").and_then(text_of) {
        return format!("<div class=\"output html\">{html}</div>");
    }
    for mime in ["image/png", "image/jpeg"] {
        if let Some(b64) = data.get(mime).and_then(text_of) {
            return format!(
                "<div class=\"output image\"><img src=\"data:{mime};base64,{}\"></div>",
                b64.trim()
            );
        }
    }
    if let Some(svg) = data.get("image/svg+xml").and_then(text_of) {
        return format!("<div class=\"output image\">{svg}</div>");
    }
    if let Some(plain) = data.get("text/plain").and_then(text_of) {
        return format!("<pre class=\"output text\">{}</pre>", escape(&plain));
    }
    String::new()
}

/// MIME payloads are a string or a list of line fragments.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(parts.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
