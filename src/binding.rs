use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::api::{
    ContextSourceSupport, DecompilerLibrary, EngineFactory, LanguageProbe, OptionCatalog,
};
use crate::error::BindingError;

/// Capability handles resolved once against a decompiler library.
///
/// The engine factory is mandatory. Every other handle is either fully bound
/// or `None`; call sites branch on presence.
#[derive(Clone)]
pub struct Bindings {
    library: String,
    pub(crate) engine: Arc<dyn EngineFactory>,
    pub(crate) context_source: Option<ContextSourceSupport>,
    pub(crate) language: Option<Arc<dyn LanguageProbe>>,
    pub(crate) options: Option<Arc<dyn OptionCatalog>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub library: String,
    pub context_source: bool,
    pub language_probe: bool,
    pub option_catalog: bool,
}

impl Bindings {
    pub fn resolve(library: &dyn DecompilerLibrary) -> Result<Self, BindingError> {
        let name = library.describe();
        let engine = library.engine_factory()?;

        let context_source = optional(&name, "context source", library.context_sources())
            .filter(|support| {
                if !support.lazy {
                    debug!(library = %name, "context sources are not lazy, ignoring");
                }
                support.lazy
            });
        let language = optional(&name, "language probe", library.language_probe());
        let options = optional(&name, "option catalog", library.option_catalog());

        Ok(Self {
            library: name,
            engine,
            context_source,
            language,
            options,
        })
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            library: self.library.clone(),
            context_source: self.context_source.is_some(),
            language_probe: self.language.is_some(),
            option_catalog: self.options.is_some(),
        }
    }
}

fn optional<T>(library: &str, capability: &str, resolved: Result<T, BindingError>) -> Option<T> {
    match resolved {
        Ok(handle) => {
            debug!(library, capability, "capability bound");
            Some(handle)
        }
        Err(err) => {
            debug!(library, capability, error = %err, "capability absent");
            None
        }
    }
}
