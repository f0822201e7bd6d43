use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use vineflower_bridge::api::OptionMap;
use vineflower_bridge::cli::{Cli, Commands, OutputFormat};
use vineflower_bridge::config::{load_settings, resolve_jar_path, resolve_settings_path};
use vineflower_bridge::host::{Host, Workspace};
use vineflower_bridge::index::ClasspathIndex;
use vineflower_bridge::invoker::Invoker;
use vineflower_bridge::jar::VineflowerJar;
use vineflower_bridge::language::source_extension;
use vineflower_bridge::options::{OptionGeneration, SettingsEntry};
use vineflower_bridge::provider::{LineNumbersMapping, hash_content};
use vineflower_bridge::vfs::{LocalFile, VirtualFile};

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let settings = load_settings(&resolve_settings_path(&cli)?)?;
    let workspace = Arc::new(Workspace::new(settings));
    let libraries = match &cli.command {
        Commands::Decompile { classpath, .. } => classpath.clone(),
        _ => Vec::new(),
    };
    let library = VineflowerJar::open(resolve_jar_path(&cli)?).with_libraries(libraries);
    let invoker = Invoker::new(&library, Arc::clone(&workspace) as Arc<dyn Host>)?;

    match cli.command {
        Commands::Decompile {
            file,
            classpath,
            format,
            output,
        } => {
            if !classpath.is_empty() {
                workspace.add_project(ClasspathIndex::build("classpath", &classpath)?);
            }
            let result = decompile(&invoker, &file)?;
            write_decompile_output(&result, format, output.as_deref())?;
        }
        Commands::Language { file } => {
            let file = LocalFile::new(&file)?;
            let language = invoker.language(file.as_ref());
            println!("{language}");
        }
        Commands::Options { format } => {
            let report = OptionsReport {
                generation: invoker.normalizer().generation(),
                options: invoker.options(),
                settings: invoker.settings_entries(),
            };
            write_options_output(&report, format)?;
        }
        Commands::Capabilities => {
            println!("{}", serde_json::to_string_pretty(&invoker.capabilities())?);
        }
    }

    Ok(())
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("vineflower_bridge=debug,vineflower=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .init();
}

#[derive(Debug, Serialize)]
struct DecompileResult {
    file: String,
    language: String,
    source_extension: &'static str,
    content_hash: String,
    line_mapping: Option<LineNumbersMapping>,
    duration_ms: u64,
    content: String,
}

#[derive(Debug, Serialize)]
struct OptionsReport {
    generation: OptionGeneration,
    options: OptionMap,
    settings: Vec<SettingsEntry>,
}

fn decompile(invoker: &Invoker, path: &Path) -> Result<DecompileResult> {
    let start = Instant::now();
    let file: Arc<dyn VirtualFile> = LocalFile::new(path)?;
    let language = invoker.language(file.as_ref());
    let content = invoker
        .decompile(&file)
        .with_context(|| format!("Failed to decompile {}", path.display()))?;
    debug!(file = %path.display(), %language, "decompile finished");

    Ok(DecompileResult {
        file: file.path().to_string_lossy().to_string(),
        source_extension: source_extension(&language),
        language,
        content_hash: hash_content(&content),
        line_mapping: file.user_data().line_mapping(),
        duration_ms: start.elapsed().as_millis() as u64,
        content,
    })
}

fn write_decompile_output(
    result: &DecompileResult,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!("file: {}\n", result.file));
            out.push_str(&format!("language: {}\n", result.language));
            out.push_str(&format!("content_hash: {}\n", result.content_hash));
            out.push_str(&format!("duration_ms: {}\n", result.duration_ms));
            if let Some(mapping) = &result.line_mapping {
                out.push_str(&format!("line_mapping: {:?}\n", mapping.as_slice()));
            }
            out
        }
        OutputFormat::Code => result.content.clone(),
    };

    write_output(&content, output)
}

fn write_options_output(report: &OptionsReport, format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Text | OutputFormat::Code => {
            let mut out = String::new();
            for (key, value) in &report.options {
                out.push_str(&format!("{key}={}\n", value.escape_debug()));
            }
            out
        }
    };

    write_output(&content, None)
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write output: {}", path.display()))?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
