//! The surface a decompiler library exposes to the bridge, and the surface
//! the bridge hands back to it.
//!
//! A library implements [`DecompilerLibrary`]; everything it offers beyond the
//! engine factory is optional and may be missing in older versions.

use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{BindingError, Canceled};

/// Short option key to string value, as the decompiler consumes it.
pub type OptionMap = BTreeMap<String, String>;

/// Source of class-file bytes for the units being decompiled.
pub trait BytecodeSource: Send + Sync {
    /// `internal_path` names an entry inside an archive; plain files pass `None`.
    fn bytecode(&self, external_path: &Path, internal_path: Option<&str>) -> Result<Vec<u8>>;
}

/// Sink the decompiler writes its output into.
pub trait ResultSink: Send + Sync {
    fn save_class_file(
        &self,
        path: &str,
        qualified_name: &str,
        entry_name: &str,
        content: &str,
        mapping: Option<&[i32]>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warn,
    Info,
    Debug,
}

pub trait DecompilerLogger: Send + Sync {
    fn write(&self, severity: Severity, message: &str, cause: Option<&anyhow::Error>);

    /// Polled by the library between units of work.
    fn check_canceled(&self) -> Result<(), Canceled>;

    /// Called when the library gives up because of a cancellation signal; the
    /// returned error unwinds the decompiler run.
    fn fatal(&self, cause: anyhow::Error) -> anyhow::Error;
}

/// Resolves classes the decompiler references but was not given as sources.
pub trait ContextSource: Send + Sync {
    fn name(&self) -> String;

    /// `internal_name` uses slashes for packages and `$` for nesting.
    fn has_class(&self, internal_name: &str) -> Result<bool>;

    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>>;
}

/// Everything an engine is constructed from.
pub struct EngineParts {
    pub provider: Arc<dyn BytecodeSource>,
    pub sink: Arc<dyn ResultSink>,
    pub options: OptionMap,
    pub logger: Arc<dyn DecompilerLogger>,
}

/// One decompiler instance.
pub trait Engine: Send {
    fn add_source(&mut self, path: &Path) -> Result<()>;

    fn add_library(&mut self, source: Arc<dyn ContextSource>) -> Result<()> {
        bail!(
            "this decompiler cannot attach library context source {}",
            source.name()
        )
    }

    fn decompile_context(&mut self) -> Result<()>;
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, parts: EngineParts) -> Result<Box<dyn Engine>>;
}

/// Presence of lazily-queried library context sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSourceSupport {
    pub lazy: bool,
}

/// Explicit replacement for the library's implicit "current context".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecompilerContext {
    pub library: String,
    pub plugin_languages: Vec<String>,
}

pub trait LanguageProbe: Send + Sync {
    fn init_context(&self) -> Result<DecompilerContext>;

    /// `None` means the library has no plugin claiming this class.
    fn language_of(&self, context: &DecompilerContext, bytes: &[u8]) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Bool,
    Int,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: String,
    pub kind: OptionKind,
    pub name: String,
    pub description: String,
    pub plugin: Option<String>,
    pub default_value: Option<String>,
}

/// Option metadata published by descriptive-key library versions.
pub trait OptionCatalog: Send + Sync {
    fn options(&self) -> Result<Vec<OptionSpec>>;
}

/// A decompiler library whose API surface is resolved at runtime.
pub trait DecompilerLibrary: Send + Sync {
    fn describe(&self) -> String;

    fn engine_factory(&self) -> Result<Arc<dyn EngineFactory>, BindingError>;

    fn context_sources(&self) -> Result<ContextSourceSupport, BindingError> {
        Err(BindingError::missing(self.describe(), "IContextSource"))
    }

    fn language_probe(&self) -> Result<Arc<dyn LanguageProbe>, BindingError> {
        Err(BindingError::missing(self.describe(), "PluginContext"))
    }

    fn option_catalog(&self) -> Result<Arc<dyn OptionCatalog>, BindingError> {
        Err(BindingError::missing(self.describe(), "DecompilerOption"))
    }
}
