//! Module loading from the file system.
//!
//! `require "name"` resolves to `<dir>/name.brie`, where `dir` is the
//! directory of the entry file. Every source handed to the analysis is kept
//! so that diagnostics raised inside a module can be rendered against it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use brie_typeck::ModuleLoader;

/// File extension of Brie sources.
pub const EXTENSION: &str = "brie";

pub struct FsLoader {
    dir: PathBuf,
    sources: HashMap<String, String>,
}

impl FsLoader {
    pub fn new(dir: &Path) -> Self {
        FsLoader {
            dir: dir.to_path_buf(),
            sources: HashMap::new(),
        }
    }

    /// Path of module `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{EXTENSION}"))
    }

    /// Source of a module that has already been loaded.
    pub fn source(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }
}

impl ModuleLoader for FsLoader {
    fn load(&mut self, name: &str) -> Option<String> {
        if let Some(source) = self.sources.get(name) {
            return Some(source.clone());
        }
        let path = self.path(name);
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                tracing::debug!(module = name, path = %path.display(), "loaded module");
                self.sources.insert(name.to_string(), source.clone());
                Some(source)
            }
            Err(err) => {
                tracing::debug!(module = name, path = %path.display(), %err, "module not readable");
                None
            }
        }
    }
}
