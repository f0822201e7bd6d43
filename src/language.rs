use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::api::{DecompilerContext, LanguageProbe};
use crate::classfile::is_class_file;

pub const DEFAULT_LANGUAGE: &str = "java";

/// Best-effort source-language classification of compiled units.
pub struct LanguageClassifier {
    probe: Option<Arc<dyn LanguageProbe>>,
    context: Mutex<Option<Arc<DecompilerContext>>>,
}

impl LanguageClassifier {
    pub fn new(probe: Option<Arc<dyn LanguageProbe>>) -> Self {
        Self {
            probe,
            context: Mutex::new(None),
        }
    }

    pub fn classify(&self, bytes: &[u8]) -> String {
        if !is_class_file(bytes) {
            return DEFAULT_LANGUAGE.to_string();
        }
        let Some(probe) = self.probe.as_ref() else {
            return DEFAULT_LANGUAGE.to_string();
        };

        let context = match self.context(probe.as_ref()) {
            Ok(context) => context,
            Err(err) => {
                debug!(error = %format!("{err:#}"), "failed to initialize decompiler context");
                return DEFAULT_LANGUAGE.to_string();
            }
        };

        match probe.language_of(&context, bytes) {
            Ok(Some(language)) => language,
            Ok(None) => DEFAULT_LANGUAGE.to_string(),
            Err(err) => {
                debug!(error = %format!("{err:#}"), "language classification failed");
                DEFAULT_LANGUAGE.to_string()
            }
        }
    }

    fn context(&self, probe: &dyn LanguageProbe) -> anyhow::Result<Arc<DecompilerContext>> {
        let mut slot = self.context.lock();
        if let Some(context) = slot.as_ref() {
            return Ok(Arc::clone(context));
        }
        let context = Arc::new(probe.init_context()?);
        debug!(library = %context.library, plugins = ?context.plugin_languages, "decompiler context initialized");
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }
}

/// Source languages with a dedicated output flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFamily {
    Java,
    Kotlin,
}

impl LanguageFamily {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "java" => Some(Self::Java),
            "kotlin" => Some(Self::Kotlin),
            _ => None,
        }
    }

    pub fn source_extension(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Kotlin => "kt",
        }
    }
}

/// Source extension for a reported family; unknown families decompile to Java.
pub fn source_extension(language: &str) -> &'static str {
    LanguageFamily::from_name(language)
        .unwrap_or(LanguageFamily::Java)
        .source_extension()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::tests::class_with_constants;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProbe {
        inits: AtomicUsize,
        calls: AtomicUsize,
        fail: bool,
    }

    impl LanguageProbe for CountingProbe {
        fn init_context(&self) -> anyhow::Result<DecompilerContext> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(DecompilerContext {
                library: "probe".to_string(),
                plugin_languages: vec!["kotlin".to_string()],
            })
        }

        fn language_of(&self, context: &DecompilerContext, bytes: &[u8]) -> anyhow::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("plugin languages unsupported");
            }
            let kotlin = crate::classfile::references_descriptor(bytes, "Lkotlin/Metadata;")?;
            Ok(kotlin.then(|| context.plugin_languages[0].clone()))
        }
    }

    #[test]
    fn non_class_input_skips_the_probe() {
        let probe = Arc::new(CountingProbe::default());
        let classifier = LanguageClassifier::new(Some(probe.clone() as Arc<dyn LanguageProbe>));
        assert_eq!(classifier.classify(b"not a class"), "java");
        assert_eq!(classifier.classify(&[]), "java");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(probe.inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn context_is_initialized_once() {
        let probe = Arc::new(CountingProbe::default());
        let classifier = LanguageClassifier::new(Some(probe.clone() as Arc<dyn LanguageProbe>));
        let kotlin = class_with_constants(&["demo/Foo", "Lkotlin/Metadata;"]);
        let java = class_with_constants(&["demo/Bar"]);

        assert_eq!(classifier.classify(&kotlin), "kotlin");
        assert_eq!(classifier.classify(&java), "java");
        assert_eq!(probe.inits.load(Ordering::SeqCst), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn probe_failures_yield_default_family() {
        let probe = Arc::new(CountingProbe {
            fail: true,
            ..CountingProbe::default()
        });
        let classifier = LanguageClassifier::new(Some(probe as Arc<dyn LanguageProbe>));
        assert_eq!(classifier.classify(&class_with_constants(&["a/B"])), "java");

        let absent = LanguageClassifier::new(None);
        assert_eq!(absent.classify(&class_with_constants(&["a/B"])), "java");
    }

    #[test]
    fn families_map_to_extensions() {
        assert_eq!(source_extension("kotlin"), "kt");
        assert_eq!(source_extension("scala"), "java");
        assert_eq!(LanguageFamily::from_name("kotlin"), Some(LanguageFamily::Kotlin));
        assert_eq!(LanguageFamily::from_name("scala"), None);
    }
}
