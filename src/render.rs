//! View rendering collaborator.
//! The pipeline only needs `render(path, data) -> markup`; the substitution
//! language is deliberately tiny (`{{NAME}}` placeholders). `DirRenderer`
//! serves templates from a directory for the real server, `MapRenderer`
//! serves them from memory for tests.

use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, AppResult};

pub trait ViewRenderer: Send + Sync {
    fn render(&self, path: &str, data: &HashMap<String, String>) -> AppResult<String>;
}

static LEFTOVER_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[A-Za-z0-9_]+\}\}").unwrap());

fn substitute(template: &str, data: &HashMap<String, String>) -> String {
    let mut html = template.to_string();
    for (name, value) in data {
        html = html.replace(&format!("{{{{{}}}}}", name), value);
    }
    // Placeholders with no matching attribute render as empty.
    LEFTOVER_PLACEHOLDER.replace_all(&html, "").into_owned()
}

/// Escape a value interpolated into markup by a handler.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Reads templates from a root directory, e.g. `views/list.html`.
pub struct DirRenderer {
    root: PathBuf,
}

impl DirRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ViewRenderer for DirRenderer {
    fn render(&self, path: &str, data: &HashMap<String, String>) -> AppResult<String> {
        let file = self.root.join(path.trim_start_matches('/'));
        let template = std::fs::read_to_string(&file).map_err(|e| {
            AppError::system_with_cause(format!("view not found: {}", path), e.to_string())
        })?;
        Ok(substitute(&template, data))
    }
}

/// In-memory template table for tests.
#[derive(Default)]
pub struct MapRenderer {
    templates: HashMap<String, String>,
}

impl MapRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, template: &str) -> Self {
        self.templates.insert(path.to_string(), template.to_string());
        self
    }
}

impl ViewRenderer for MapRenderer {
    fn render(&self, path: &str, data: &HashMap<String, String>) -> AppResult<String> {
        let template = self
            .templates
            .get(path)
            .ok_or_else(|| AppError::system(format!("view not found: {}", path)))?;
        Ok(substitute(template, data))
    }
}
