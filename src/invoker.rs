//! Orchestrates one decompilation.
//!
//! The decompiler runs on a dedicated background thread while the calling
//! thread pumps read tasks for it. Options are normalized per run from the
//! host settings, the target file set is the requested class plus its nested
//! class siblings, and the first saved output becomes the result.

use anyhow::{Context, anyhow};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error};

use crate::api::{DecompilerLibrary, EngineFactory, EngineParts, OptionMap, ResultSink};
use crate::binding::{Bindings, Capabilities};
use crate::error::{BindingError, DecompileError};
use crate::host::{Host, host_options};
use crate::index::ProjectIndex;
use crate::language::{DEFAULT_LANGUAGE, LanguageClassifier};
use crate::logger::TracingLogger;
use crate::options::{OptionNormalizer, SettingsEntry};
use crate::provider::{BytecodeProvider, LineNumbersMapping, ResultCollector};
use crate::pump::{ReadActionRunner, ReadTaskQueue, panic_message};
use crate::resolver::ProjectContextSource;
use crate::vfs::VirtualFile;

pub const DECOMPILE_THREAD: &str = "vineflower-decompile";

pub struct Invoker {
    bindings: Bindings,
    host: Arc<dyn Host>,
    normalizer: OptionNormalizer,
    classifier: LanguageClassifier,
}

impl Invoker {
    pub fn new(library: &dyn DecompilerLibrary, host: Arc<dyn Host>) -> Result<Self, BindingError> {
        let bindings = Bindings::resolve(library)?;
        let normalizer = OptionNormalizer::discover(bindings.options.as_ref());
        let classifier = LanguageClassifier::new(bindings.language.clone());
        debug!(
            library = bindings.library(),
            generation = ?normalizer.generation(),
            "decompiler bound"
        );
        Ok(Self {
            bindings,
            host,
            normalizer,
            classifier,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.bindings.capabilities()
    }

    pub fn normalizer(&self) -> &OptionNormalizer {
        &self.normalizer
    }

    /// Options for the next run, from the host's current settings.
    pub fn options(&self) -> OptionMap {
        self.normalizer
            .normalize(&self.host.settings(), &host_options(self.host.as_ref()))
    }

    pub fn settings_entries(&self) -> Vec<SettingsEntry> {
        self.normalizer
            .settings_entries(&self.host.settings(), &host_options(self.host.as_ref()))
    }

    /// Source language family of a compiled unit; `java` whenever unsure.
    pub fn language(&self, file: &dyn VirtualFile) -> String {
        match file.contents() {
            Ok(bytes) => self.classifier.classify(&bytes),
            Err(err) => {
                debug!(file = %file.path().display(), error = %format!("{err:#}"), "cannot read file for classification");
                DEFAULT_LANGUAGE.to_string()
            }
        }
    }

    pub fn decompile(&self, file: &Arc<dyn VirtualFile>) -> Result<String, DecompileError> {
        self.invocation(file).run()
    }

    pub fn invocation(&self, file: &Arc<dyn VirtualFile>) -> Invocation<'_> {
        Invocation {
            invoker: self,
            file: Arc::clone(file),
            state: InvocationState::NotStarted,
        }
    }
}

/// The requested file first, then `<stem>$*.class` siblings sorted by name.
pub fn target_files(file: &Arc<dyn VirtualFile>) -> anyhow::Result<Vec<Arc<dyn VirtualFile>>> {
    let mask = format!("{}$", file.name_without_extension());
    let mut files = vec![Arc::clone(file)];
    if let Some(parent) = file.parent() {
        let mut siblings: Vec<_> = parent
            .children()
            .with_context(|| format!("Failed to list siblings of {}", file.path().display()))?
            .into_iter()
            .filter(|child| child.is_class_file() && child.name().starts_with(&mask))
            .collect();
        siblings.sort_by_key(|child| child.name());
        files.extend(siblings);
    }
    Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

/// A single decompilation with an observable lifecycle.
///
/// Cancellation ends the run in [`InvocationState::Canceled`], never in
/// [`InvocationState::Failed`].
pub struct Invocation<'a> {
    invoker: &'a Invoker,
    file: Arc<dyn VirtualFile>,
    state: InvocationState,
}

impl Invocation<'_> {
    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn run(&mut self) -> Result<String, DecompileError> {
        let file_id = self.file.path().display().to_string();
        if self.state != InvocationState::NotStarted {
            return Err(DecompileError::Failed {
                file: file_id,
                cause: anyhow!("invocation already ran"),
            });
        }

        self.state = InvocationState::Running;
        let started = Instant::now();
        let result = self.execute(&file_id);
        match &result {
            Ok(_) => {
                self.state = InvocationState::Succeeded;
                debug!(file = %file_id, elapsed_ms = started.elapsed().as_millis() as u64, "decompiled");
            }
            Err(err) if err.is_canceled() => {
                self.state = InvocationState::Canceled;
                debug!(file = %file_id, "decompilation canceled");
            }
            Err(err) => {
                self.state = InvocationState::Failed;
                error!(file = %file_id, error = %err, "decompilation failed");
            }
        }
        result
    }

    fn execute(&self, file_id: &str) -> Result<String, DecompileError> {
        let invoker = self.invoker;
        let files = target_files(&self.file).map_err(|cause| DecompileError::Io {
            path: file_id.to_string(),
            cause,
        })?;
        let provider = Arc::new(BytecodeProvider::from_files(&files)?);
        let collector = Arc::new(ResultCollector::new());
        let host = Arc::clone(&invoker.host);

        let queue = ReadTaskQueue::new();
        let reads = ReadActionRunner::new(
            queue.requester(),
            Arc::clone(&host),
            host.is_read_access_allowed(),
        );
        let project = match invoker.bindings.context_source {
            Some(_) => host.locate_project(self.file.as_ref()),
            None => None,
        };

        let run = BackgroundRun {
            engine: Arc::clone(&invoker.bindings.engine),
            parts: EngineParts {
                provider,
                sink: Arc::clone(&collector) as Arc<dyn ResultSink>,
                options: invoker.options(),
                logger: Arc::new(TracingLogger::new(file_id, Arc::clone(&host))),
            },
            sources: files.iter().map(|f| f.path()).collect(),
            project,
            reads,
        };
        debug!(file = %file_id, sources = run.sources.len(), "starting decompiler thread");

        let requester = queue.requester();
        let thread_file = file_id.to_string();
        thread::Builder::new()
            .name(DECOMPILE_THREAD.to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| run.execute()))
                    .unwrap_or_else(|payload| {
                        Err(anyhow!("decompiler panicked: {}", panic_message(payload)))
                    })
                    .map_err(|cause| DecompileError::classify(thread_file, cause));
                requester.finish(outcome);
            })
            .map_err(DecompileError::Spawn)?;

        queue.pump()?;

        let saved = collector.take().ok_or_else(|| DecompileError::NoOutput {
            file: file_id.to_string(),
        })?;
        if let Some(mapping) = saved.mapping {
            self.file
                .user_data()
                .put_line_mapping(LineNumbersMapping::new(mapping));
        }
        Ok(saved.content)
    }
}

/// Everything the decompiler thread owns.
struct BackgroundRun {
    engine: Arc<dyn EngineFactory>,
    parts: EngineParts,
    sources: Vec<PathBuf>,
    project: Option<Arc<dyn ProjectIndex>>,
    reads: ReadActionRunner,
}

impl BackgroundRun {
    fn execute(self) -> anyhow::Result<()> {
        let mut engine = self
            .engine
            .create(self.parts)
            .context("Failed to construct decompiler")?;
        for source in &self.sources {
            engine
                .add_source(source)
                .with_context(|| format!("Failed to add source {}", source.display()))?;
        }
        if let Some(project) = self.project {
            let source = ProjectContextSource::new(project, self.reads);
            engine
                .add_library(Arc::new(source))
                .context("Failed to attach project context source")?;
        }
        engine.decompile_context()
    }
}
