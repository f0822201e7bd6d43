use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::{DecompilerLogger, Severity};
use crate::error::Canceled;
use crate::host::Host;

/// Forwards decompiler diagnostics to `tracing` and relays host cancellation.
pub struct TracingLogger {
    file: String,
    host: Arc<dyn Host>,
}

impl TracingLogger {
    pub fn new(file: impl Into<String>, host: Arc<dyn Host>) -> Self {
        Self {
            file: file.into(),
            host,
        }
    }
}

impl DecompilerLogger for TracingLogger {
    fn write(&self, severity: Severity, message: &str, cause: Option<&anyhow::Error>) {
        let cause = cause.map(|c| format!("{c:#}"));
        let cause = cause.as_deref();
        match severity {
            Severity::Error => error!(target: "vineflower", file = %self.file, cause, "{message}"),
            Severity::Warn => warn!(target: "vineflower", file = %self.file, cause, "{message}"),
            Severity::Info => info!(target: "vineflower", file = %self.file, cause, "{message}"),
            Severity::Debug => debug!(target: "vineflower", file = %self.file, cause, "{message}"),
        }
    }

    fn check_canceled(&self) -> Result<(), Canceled> {
        self.host.check_canceled()
    }

    fn fatal(&self, cause: anyhow::Error) -> anyhow::Error {
        debug!(target: "vineflower", file = %self.file, "decompiler stopped on cancellation");
        match crate::error::find_canceled(&cause) {
            Some(_) => cause,
            None => anyhow::Error::new(Canceled::with_reason(format!("{cause:#}"))),
        }
    }
}
