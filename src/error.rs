use std::fmt;

/// A required decompiler-library symbol could not be bound.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BindingError {
    #[error("{library}: required symbol `{symbol}` is not available")]
    MissingSymbol { library: String, symbol: String },

    #[error("{library}: failed to inspect decompiler library: {reason}")]
    Inspect { library: String, reason: String },
}

impl BindingError {
    pub fn missing(library: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::MissingSymbol {
            library: library.into(),
            symbol: symbol.into(),
        }
    }

    pub fn inspect(library: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Inspect {
            library: library.into(),
            reason: reason.to_string(),
        }
    }
}

/// Cooperative cancellation requested by the host or raised by the library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Canceled {
    pub reason: Option<String>,
}

impl Canceled {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "operation canceled: {reason}"),
            None => f.write_str("operation canceled"),
        }
    }
}

impl std::error::Error for Canceled {}

#[derive(Debug, thiserror::Error)]
pub enum DecompileError {
    #[error(transparent)]
    Canceled(#[from] Canceled),

    #[error("failed to decompile {file}: {cause:#}")]
    Failed { file: String, cause: anyhow::Error },

    #[error("decompiler produced no output for {file}")]
    NoOutput { file: String },

    #[error("read task queue closed before the decompiler finished")]
    Disconnected,

    #[error("failed to start decompiler thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read {path}: {cause:#}")]
    Io { path: String, cause: anyhow::Error },
}

impl DecompileError {
    /// Sorts an error raised inside a decompiler run into cancellation or failure.
    pub fn classify(file: impl Into<String>, cause: anyhow::Error) -> Self {
        if let Some(canceled) = find_canceled(&cause) {
            return Self::Canceled(canceled);
        }
        Self::Failed {
            file: file.into(),
            cause,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

pub fn find_canceled(err: &anyhow::Error) -> Option<Canceled> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Canceled>())
        .cloned()
}
