use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "vineflower-bridge")]
#[command(about = "Decompile class files with Vineflower, resolving referenced classes from a classpath")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE")]
    pub jar: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Decompile a class file together with its nested classes
    Decompile {
        file: PathBuf,

        #[arg(short = 'c', long = "classpath", value_name = "PATH")]
        classpath: Vec<PathBuf>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Code)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Report the source language family of a class file
    Language { file: PathBuf },
    /// Show the options the next decompilation would use
    Options {
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Show which optional decompiler capabilities are available
    Capabilities,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
    Code,
}
