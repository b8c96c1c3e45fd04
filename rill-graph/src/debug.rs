//! Optional per-node source-trace side table shipped alongside a graph.

use std::collections::HashMap;

/// One frame of a source trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLineCol {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl FileLineCol {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        FileLineCol {
            file: file.into(),
            line,
            col,
        }
    }
}

/// Debug locations keyed by node name (or by `node@function` for nodes
/// produced from function bodies). Innermost frame first.
#[derive(Clone, Debug, Default)]
pub struct DebugInfo {
    traces: HashMap<String, Vec<FileLineCol>>,
}

impl DebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, trace: Vec<FileLineCol>) {
        self.traces.insert(key.into(), trace);
    }

    pub fn trace(&self, key: &str) -> Option<&[FileLineCol]> {
        self.traces.get(key).map(|t| t.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}
