//! Vineflower packaged as a runnable jar, driven through `java`.
//!
//! Capabilities are detected from the jar's class entries. A child process
//! cannot call back into the host, so lazy context sources and the option
//! catalog are never offered; the legacy short keys work with every release.
//! Referenced classes come from library roots passed as `-e=<path>` instead.
//! The console decompiler writes only source text, so saved classes never
//! carry a line mapping, even when `bsm=1` is requested.

use anyhow::{Context, Result, bail};
use ignore::WalkBuilder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::api::{
    DecompilerContext, DecompilerLibrary, DecompilerLogger, Engine, EngineFactory, EngineParts,
    LanguageProbe, OptionMap, Severity,
};
use crate::classfile::references_descriptor;
use crate::error::BindingError;
use crate::vfs::JarArchive;

const CONSOLE_DECOMPILER: &str =
    "org/jetbrains/java/decompiler/main/decompiler/ConsoleDecompiler.class";
const BASE_DECOMPILER: &str = "org/jetbrains/java/decompiler/main/decompiler/BaseDecompiler.class";
const PLUGIN_CONTEXT: &str = "org/jetbrains/java/decompiler/main/plugins/PluginContext.class";
const LANGUAGE_SPEC: &str = "org/jetbrains/java/decompiler/api/plugin/LanguageSpec.class";
const KOTLIN_PLUGIN: &str = "org/vineflower/kotlin/KotlinPlugin.class";
const KOTLIN_METADATA: &str = "Lkotlin/Metadata;";

pub const JAVA_ENV: &str = "VINEFLOWER_BRIDGE_JAVA";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn java_command(java_bin: &str) -> Command {
    #[cfg(windows)]
    {
        let lower = java_bin.to_ascii_lowercase();
        if lower.ends_with(".cmd") || lower.ends_with(".bat") {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(java_bin);
            return command;
        }
    }

    Command::new(java_bin)
}

#[derive(Debug, Clone)]
pub struct VineflowerJar {
    jar: PathBuf,
    java: String,
    libraries: Vec<PathBuf>,
    archive: Result<Arc<JarArchive>, String>,
}

impl VineflowerJar {
    pub fn open(jar: PathBuf) -> Self {
        let archive = JarArchive::open(&jar).map_err(|err| format!("{err:#}"));
        let java = std::env::var(JAVA_ENV).unwrap_or_else(|_| "java".to_string());
        Self {
            jar,
            java,
            libraries: Vec::new(),
            archive,
        }
    }

    pub fn with_java(mut self, java: impl Into<String>) -> Self {
        self.java = java.into();
        self
    }

    /// Directories and jars the decompiler may consult for referenced classes.
    pub fn with_libraries(mut self, libraries: impl IntoIterator<Item = PathBuf>) -> Self {
        self.libraries.extend(libraries);
        self
    }

    pub fn libraries(&self) -> &[PathBuf] {
        &self.libraries
    }

    pub fn jar(&self) -> &Path {
        &self.jar
    }

    fn archive(&self) -> Result<&Arc<JarArchive>, BindingError> {
        self.archive
            .as_ref()
            .map_err(|reason| BindingError::inspect(self.describe(), reason))
    }

    fn require(&self, entries: &[&str]) -> Result<&Arc<JarArchive>, BindingError> {
        let archive = self.archive()?;
        for entry in entries {
            if !archive.contains(entry) {
                let symbol = entry.trim_end_matches(".class").replace('/', ".");
                return Err(BindingError::missing(self.describe(), symbol));
            }
        }
        Ok(archive)
    }
}

impl DecompilerLibrary for VineflowerJar {
    fn describe(&self) -> String {
        format!("vineflower jar {}", self.jar.display())
    }

    fn engine_factory(&self) -> Result<Arc<dyn EngineFactory>, BindingError> {
        self.require(&[CONSOLE_DECOMPILER, BASE_DECOMPILER])?;
        Ok(Arc::new(JarEngineFactory {
            jar: self.jar.clone(),
            java: self.java.clone(),
            libraries: self.libraries.clone(),
        }))
    }

    fn language_probe(&self) -> Result<Arc<dyn LanguageProbe>, BindingError> {
        let archive = self.require(&[PLUGIN_CONTEXT, LANGUAGE_SPEC])?;
        Ok(Arc::new(JarLanguageProbe {
            library: self.describe(),
            archive: Arc::clone(archive),
        }))
    }
}

struct JarLanguageProbe {
    library: String,
    archive: Arc<JarArchive>,
}

impl LanguageProbe for JarLanguageProbe {
    fn init_context(&self) -> Result<DecompilerContext> {
        let mut plugin_languages = Vec::new();
        if self.archive.contains(KOTLIN_PLUGIN) {
            plugin_languages.push("kotlin".to_string());
        }
        Ok(DecompilerContext {
            library: self.library.clone(),
            plugin_languages,
        })
    }

    fn language_of(&self, context: &DecompilerContext, bytes: &[u8]) -> Result<Option<String>> {
        if !context.plugin_languages.iter().any(|l| l == "kotlin") {
            return Ok(None);
        }
        Ok(references_descriptor(bytes, KOTLIN_METADATA)?.then(|| "kotlin".to_string()))
    }
}

struct JarEngineFactory {
    jar: PathBuf,
    java: String,
    libraries: Vec<PathBuf>,
}

impl EngineFactory for JarEngineFactory {
    fn create(&self, parts: EngineParts) -> Result<Box<dyn Engine>> {
        Ok(Box::new(JarEngine {
            jar: self.jar.clone(),
            java: self.java.clone(),
            libraries: self.libraries.clone(),
            parts,
            sources: Vec::new(),
        }))
    }
}

struct JarEngine {
    jar: PathBuf,
    java: String,
    libraries: Vec<PathBuf>,
    parts: EngineParts,
    sources: Vec<PathBuf>,
}

impl Engine for JarEngine {
    fn add_source(&mut self, path: &Path) -> Result<()> {
        self.sources.push(path.to_path_buf());
        Ok(())
    }

    fn decompile_context(&mut self) -> Result<()> {
        let logger = Arc::clone(&self.parts.logger);
        logger.check_canceled()?;
        let Some(primary) = self.sources.first() else {
            bail!("no sources added");
        };

        let scratch = Scratch::create()?;
        let input = scratch.path().join("in");
        let output = scratch.path().join("out");
        fs::create_dir_all(&input)?;
        fs::create_dir_all(&output)?;

        let mut staged = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let bytes = self.parts.provider.bytecode(source, None)?;
            let name = source
                .file_name()
                .with_context(|| format!("source has no file name: {}", source.display()))?;
            let target = input.join(name);
            fs::write(&target, bytes)
                .with_context(|| format!("Failed to stage {}", target.display()))?;
            staged.push(target);
        }

        let stdout_log = scratch.path().join("stdout.log");
        let stderr_log = scratch.path().join("stderr.log");
        let mut child = java_command(&self.java)
            .arg("-jar")
            .arg(&self.jar)
            .args(option_args(&self.parts.options))
            .args(library_args(&self.libraries))
            .args(&staged)
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(File::create(&stdout_log)?)
            .stderr(File::create(&stderr_log)?)
            .spawn()
            .context("Failed to execute java (ensure JRE/JDK is installed)")?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Err(canceled) = logger.check_canceled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(logger.fatal(canceled.into()));
            }
            thread::sleep(POLL_INTERVAL);
        };

        forward_log(logger.as_ref(), &stdout_log);
        if !status.success() {
            let stderr = fs::read_to_string(&stderr_log).unwrap_or_default();
            bail!("Vineflower decompilation failed: {}", stderr.trim());
        }

        let stem = primary
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let produced = find_source(&output, &stem)
            .with_context(|| format!("Vineflower produced no source for {stem}"))?;
        let content = fs::read_to_string(&produced)
            .with_context(|| format!("Failed to read {}", produced.display()))?;
        let entry = produced
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        self.parts.sink.save_class_file(
            &output.display().to_string(),
            &stem,
            &entry,
            &content,
            None,
        );
        Ok(())
    }
}

/// Three-letter keys use the legacy `-key=value` form, everything else the
/// long `--key=value` form.
fn option_args(options: &OptionMap) -> Vec<String> {
    options
        .iter()
        .map(|(key, value)| {
            if key.len() == 3 {
                format!("-{key}={value}")
            } else {
                format!("--{key}={value}")
            }
        })
        .collect()
}

fn library_args(libraries: &[PathBuf]) -> Vec<String> {
    libraries
        .iter()
        .map(|path| format!("-e={}", path.display()))
        .collect()
}

fn forward_log(logger: &dyn DecompilerLogger, path: &Path) {
    let Ok(text) = fs::read_to_string(path) else {
        return;
    };
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let severity = if line.starts_with("WARN") {
            Severity::Warn
        } else if line.starts_with("ERROR") {
            Severity::Error
        } else {
            Severity::Debug
        };
        logger.write(severity, line, None);
    }
}

/// Prefers `<stem>.java`, then any other produced source file.
fn find_source(output: &Path, stem: &str) -> Option<PathBuf> {
    let wanted = [format!("{stem}.java"), format!("{stem}.kt")];
    let mut produced: Vec<PathBuf> = WalkBuilder::new(output)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|e| e == "java" || e == "kt"))
        .collect();
    produced.sort();

    produced
        .iter()
        .find(|path| {
            path.file_name()
                .is_some_and(|name| wanted.iter().any(|w| name == w.as_str()))
        })
        .or_else(|| produced.first())
        .cloned()
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory removed on drop.
struct Scratch {
    path: PathBuf,
}

impl Scratch {
    fn create() -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "vineflower-bridge-{}-{}-{}",
            std::process::id(),
            nanos,
            n
        ));
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create scratch directory: {}", path.display()))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::tests::class_with_constants;
    use crate::vfs::tests::{temp_dir, write_jar};

    fn library_jar(base: &Path, entries: &[&str]) -> Result<PathBuf> {
        let jar = base.join("vineflower.jar");
        let files: Vec<(&str, &[u8])> = entries.iter().map(|e| (*e, &b""[..])).collect();
        write_jar(&jar, &files)?;
        Ok(jar)
    }

    #[test]
    fn capabilities_follow_jar_contents() -> Result<()> {
        let base = temp_dir("jar_caps");
        let jar = library_jar(&base, &[CONSOLE_DECOMPILER, BASE_DECOMPILER])?;
        let library = VineflowerJar::open(jar);
        assert!(library.engine_factory().is_ok());
        assert!(library.language_probe().is_err());
        assert!(library.context_sources().is_err());
        assert!(library.option_catalog().is_err());

        let old = library_jar(&base.join("old"), &[CONSOLE_DECOMPILER])?;
        let err = VineflowerJar::open(old).engine_factory().err().unwrap();
        assert!(matches!(err, BindingError::MissingSymbol { ref symbol, .. }
            if symbol == "org.jetbrains.java.decompiler.main.decompiler.BaseDecompiler"));

        let missing = VineflowerJar::open(base.join("absent.jar"));
        assert!(matches!(
            missing.engine_factory().err().unwrap(),
            BindingError::Inspect { .. }
        ));

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn kotlin_is_detected_only_with_the_plugin() -> Result<()> {
        let base = temp_dir("jar_kotlin");
        let kotlin = class_with_constants(&["demo/Foo", KOTLIN_METADATA]);
        let plain = class_with_constants(&["demo/Foo"]);

        let with_plugin = library_jar(
            &base.join("with"),
            &[CONSOLE_DECOMPILER, BASE_DECOMPILER, PLUGIN_CONTEXT, LANGUAGE_SPEC, KOTLIN_PLUGIN],
        )?;
        let probe = VineflowerJar::open(with_plugin).language_probe()?;
        let context = probe.init_context()?;
        assert_eq!(context.plugin_languages, vec!["kotlin"]);
        assert_eq!(probe.language_of(&context, &kotlin)?, Some("kotlin".to_string()));
        assert_eq!(probe.language_of(&context, &plain)?, None);

        let without_plugin = library_jar(
            &base.join("without"),
            &[CONSOLE_DECOMPILER, BASE_DECOMPILER, PLUGIN_CONTEXT, LANGUAGE_SPEC],
        )?;
        let probe = VineflowerJar::open(without_plugin).language_probe()?;
        let context = probe.init_context()?;
        assert_eq!(probe.language_of(&context, &kotlin)?, None);

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn option_args_pick_the_key_form() {
        let mut options = OptionMap::new();
        options.insert("ind".to_string(), "  ".to_string());
        options.insert("indent-string".to_string(), "  ".to_string());
        assert_eq!(
            option_args(&options),
            vec!["--indent-string=  ".to_string(), "-ind=  ".to_string()]
        );
    }

    #[test]
    fn library_roots_become_e_arguments() {
        let library = VineflowerJar::open(PathBuf::from("absent.jar"))
            .with_libraries([PathBuf::from("/deps/classes"), PathBuf::from("/deps/lib.jar")]);
        assert_eq!(
            library_args(library.libraries()),
            vec!["-e=/deps/classes".to_string(), "-e=/deps/lib.jar".to_string()]
        );
        assert!(library_args(&[]).is_empty());
    }

    #[test]
    fn find_source_prefers_the_primary_stem() -> Result<()> {
        let base = temp_dir("jar_find_source");
        fs::create_dir_all(base.join("demo"))?;
        fs::write(base.join("demo/Aaa.java"), "class Aaa {}")?;
        fs::write(base.join("demo/Outer.java"), "class Outer {}")?;
        assert_eq!(find_source(&base, "Outer"), Some(base.join("demo/Outer.java")));
        assert_eq!(find_source(&base, "Missing"), Some(base.join("demo/Aaa.java")));
        assert_eq!(find_source(&base.join("none"), "Outer"), None);
        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::api::ResultSink;
        use crate::config::BridgeSettings;
        use crate::error::find_canceled;
        use crate::host::{Host, Workspace};
        use crate::logger::TracingLogger;
        use crate::provider::{BytecodeProvider, ResultCollector};
        use crate::vfs::{LocalFile, VirtualFile};

        fn fake_java(base: &Path, script: &str) -> Result<PathBuf> {
            use std::os::unix::fs::PermissionsExt;
            let path = base.join("bin/java");
            fs::create_dir_all(base.join("bin"))?;
            fs::write(&path, script)?;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms)?;
            Ok(path)
        }

        struct Run {
            workspace: Arc<Workspace>,
            collector: Arc<ResultCollector>,
            engine: Box<dyn Engine>,
        }

        fn engine(base: &Path, script: &str) -> Result<Run> {
            let jar = library_jar(base, &[CONSOLE_DECOMPILER, BASE_DECOMPILER])?;
            let java = fake_java(base, script)?;
            fs::write(base.join("Demo.class"), b"demo")?;
            let file: Arc<dyn VirtualFile> = LocalFile::new(base.join("Demo.class"))?;

            let workspace = Arc::new(Workspace::new(BridgeSettings::default()));
            let collector = Arc::new(ResultCollector::new());
            let mut options = OptionMap::new();
            options.insert("ind".to_string(), "    ".to_string());

            let factory = VineflowerJar::open(jar)
                .with_java(java.to_string_lossy().to_string())
                .engine_factory()?;
            let mut engine = factory.create(EngineParts {
                provider: Arc::new(BytecodeProvider::from_files(&[Arc::clone(&file)])?),
                sink: Arc::clone(&collector) as Arc<dyn ResultSink>,
                options,
                logger: Arc::new(TracingLogger::new(
                    "Demo.class",
                    Arc::clone(&workspace) as Arc<dyn Host>,
                )),
            })?;
            engine.add_source(&file.path())?;
            Ok(Run {
                workspace,
                collector,
                engine,
            })
        }

        #[test]
        fn produced_source_lands_in_the_sink() -> Result<()> {
            let base = temp_dir("jar_engine_ok");
            fs::create_dir_all(&base)?;
            let mut run = engine(
                &base,
                r#"#!/bin/sh
set -e
for last; do :; done
[ "$3" = "-ind=    " ] || { echo "bad option: $3" >&2; exit 1; }
[ -f "$4" ] || { echo "missing input $4" >&2; exit 1; }
echo "INFO:  Decompiling class Demo"
cat > "$last/Demo.java" <<'EOF'
public class Demo {
}
EOF
"#,
            )?;

            run.engine.decompile_context()?;
            let saved = run.collector.take().unwrap();
            assert!(saved.content.contains("public class Demo"));
            assert_eq!(saved.qualified_name, "Demo");
            assert!(saved.mapping.is_none());

            let _ = fs::remove_dir_all(base);
            Ok(())
        }

        #[test]
        fn failures_report_stderr() -> Result<()> {
            let base = temp_dir("jar_engine_fail");
            fs::create_dir_all(&base)?;
            let mut run = engine(
                &base,
                "#!/bin/sh\necho \"boom from fake vineflower\" >&2\nexit 1\n",
            )?;

            let err = run.engine.decompile_context().unwrap_err().to_string();
            assert!(err.contains("Vineflower decompilation failed"));
            assert!(err.contains("boom from fake vineflower"));
            assert!(run.collector.take().is_none());

            let _ = fs::remove_dir_all(base);
            Ok(())
        }

        #[test]
        fn cancellation_kills_the_child() -> Result<()> {
            let base = temp_dir("jar_engine_cancel");
            fs::create_dir_all(&base)?;
            let mut run = engine(&base, "#!/bin/sh\nsleep 30\n")?;

            let token = run.workspace.cancellation();
            let canceller = thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                token.cancel();
            });

            let started = std::time::Instant::now();
            let err = run.engine.decompile_context().unwrap_err();
            canceller.join().unwrap();
            assert!(find_canceled(&err).is_some());
            assert!(started.elapsed() < Duration::from_secs(20));

            let _ = fs::remove_dir_all(base);
            Ok(())
        }
    }
}
