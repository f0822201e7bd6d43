use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::api::{BytecodeSource, ResultSink};
use crate::error::DecompileError;
use crate::vfs::VirtualFile;

/// Bytes for every file of one decompilation, keyed by absolute path.
///
/// Contents are read up front, so the decompiler never touches the host's
/// file layer for its own inputs.
#[derive(Debug, Default)]
pub struct BytecodeProvider {
    entries: HashMap<PathBuf, Vec<u8>>,
}

impl BytecodeProvider {
    pub fn from_files(files: &[Arc<dyn VirtualFile>]) -> Result<Self, DecompileError> {
        let mut entries = HashMap::with_capacity(files.len());
        for file in files {
            let path = file.path();
            let bytes = file.contents().map_err(|cause| DecompileError::Io {
                path: path.display().to_string(),
                cause,
            })?;
            entries.insert(path, bytes);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BytecodeSource for BytecodeProvider {
    fn bytecode(&self, external_path: &Path, _internal_path: Option<&str>) -> Result<Vec<u8>> {
        self.entries
            .get(external_path)
            .cloned()
            .with_context(|| format!("no bytecode registered for {}", external_path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedClass {
    pub qualified_name: String,
    pub content: String,
    pub mapping: Option<Vec<i32>>,
}

/// Keeps the first non-empty class the decompiler saves.
#[derive(Debug, Default)]
pub struct ResultCollector {
    saved: Mutex<Option<CollectedClass>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Option<CollectedClass> {
        self.saved.lock().take()
    }
}

impl ResultSink for ResultCollector {
    fn save_class_file(
        &self,
        _path: &str,
        qualified_name: &str,
        entry_name: &str,
        content: &str,
        mapping: Option<&[i32]>,
    ) {
        let mut saved = self.saved.lock();
        if saved.as_ref().is_some_and(|c| !c.content.is_empty()) {
            debug!(entry = entry_name, "ignoring additional decompiled class");
            return;
        }
        *saved = Some(CollectedClass {
            qualified_name: qualified_name.to_string(),
            content: content.to_string(),
            mapping: mapping.map(<[i32]>::to_vec),
        });
    }
}

/// Flat `[bytecode line, source line, ...]` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LineNumbersMapping {
    pairs: Vec<i32>,
}

impl LineNumbersMapping {
    pub fn new(pairs: Vec<i32>) -> Self {
        Self { pairs }
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.pairs
    }

    pub fn bytecode_to_source(&self, line: i32) -> Option<i32> {
        self.pairs
            .chunks_exact(2)
            .find(|pair| pair[0] == line)
            .map(|pair| pair[1])
    }

    pub fn source_to_bytecode(&self, line: i32) -> Option<i32> {
        self.pairs
            .chunks_exact(2)
            .find(|pair| pair[1] == line)
            .map(|pair| pair[0])
    }
}

pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}
