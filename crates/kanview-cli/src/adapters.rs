//! File-backed collaborators for the engine.
//!
//! - [`DirConfigurations`] reads every `*.toml` board definition in a directory.
//! - [`JsonFileIssueSource`] answers each fetch with the next JSON issue dump
//!   from a list of files, repeating the last one once the list runs out.

use anyhow::{Context, Result};
use kanview_core::{BoardConfiguration, BoardError, ConfigurationProvider, Issue, IssueSource, User};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One board definition file and what became of it.
#[derive(Debug)]
pub struct BoardFile {
    pub path: PathBuf,
    pub parsed: Result<Arc<BoardConfiguration>, BoardError>,
}

impl BoardFile {
    /// Parse and validate.
    pub fn check(&self) -> Result<&BoardConfiguration, BoardError> {
        let config = self.parsed.as_ref().map_err(Clone::clone)?;
        config.validate()?;
        Ok(&**config)
    }
}

#[derive(Debug, Default)]
pub struct DirConfigurations {
    files: Vec<BoardFile>,
    by_code: BTreeMap<String, Arc<BoardConfiguration>>,
}

impl DirConfigurations {
    /// Load every `*.toml` file directly inside `dir`, in file name order.
    ///
    /// Files that do not parse are kept for reporting but serve no board.
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read board directory {}", dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list {}", dir.display()))?
                .path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = Self::default();
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let parsed = BoardConfiguration::from_toml_str(&text).map(Arc::new);
            match &parsed {
                Ok(config) => {
                    if let Some(previous) = loaded.by_code.insert(config.code.clone(), Arc::clone(config)) {
                        tracing::warn!(
                            board = %previous.code,
                            file = %path.display(),
                            "board code defined twice, keeping later file"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(file = %path.display(), error = %err, "skipping board file");
                }
            }
            loaded.files.push(BoardFile { path, parsed });
        }

        tracing::debug!(dir = %dir.display(), boards = loaded.by_code.len(), "loaded board definitions");
        Ok(loaded)
    }

    pub fn files(&self) -> &[BoardFile] {
        &self.files
    }
}

impl ConfigurationProvider for DirConfigurations {
    fn configuration(&self, code: &str) -> Option<Arc<BoardConfiguration>> {
        self.by_code.get(code).cloned()
    }

    fn codes(&self) -> Vec<String> {
        self.by_code.keys().cloned().collect()
    }
}

/// Serves a sequence of JSON issue dumps, one per fetch.
#[derive(Debug)]
pub struct JsonFileIssueSource {
    dumps: Vec<PathBuf>,
    next: AtomicUsize,
}

impl JsonFileIssueSource {
    pub const fn new(dumps: Vec<PathBuf>) -> Self {
        Self {
            dumps,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of dumps, i.e. distinct fetches this source can answer.
    pub fn len(&self) -> usize {
        self.dumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }
}

impl IssueSource for JsonFileIssueSource {
    fn fetch_issues(
        &self,
        config: &BoardConfiguration,
        user: &User,
    ) -> kanview_core::Result<Vec<Issue>> {
        let fetch = self.next.fetch_add(1, Ordering::SeqCst);
        let Some(path) = self.dumps.get(fetch).or_else(|| self.dumps.last()) else {
            return Err(BoardError::source_unavailable(&config.code, "no issue dumps given"));
        };

        tracing::debug!(
            board = %config.code,
            user = %user.key(),
            file = %path.display(),
            "reading issue dump"
        );
        let text = std::fs::read_to_string(path).map_err(|err| {
            BoardError::source_unavailable(&config.code, format!("{}: {err}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|err| {
            BoardError::source_unavailable(&config.code, format!("{}: {err}", path.display()))
        })
    }
}
