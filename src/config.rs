use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::api::OptionMap;
use crate::cli::Cli;

pub const JAR_ENV: &str = "VINEFLOWER_JAR";
const VINEFLOWER_URL: &str =
    "https://github.com/Vineflower/vineflower/releases/download/1.10.1/vineflower-1.10.1.jar";

/// Persisted user settings for the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Decompiler options by key, as a user would set them.
    #[serde(default)]
    pub settings: OptionMap,

    /// Host registry flags such as `decompiler.use.line.mapping`.
    #[serde(default)]
    pub registry: BTreeMap<String, bool>,

    #[serde(default = "default_indent_size")]
    pub indent_size: usize,

    #[serde(default)]
    pub unit_test_mode: bool,
}

fn default_indent_size() -> usize {
    4
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            settings: OptionMap::new(),
            registry: BTreeMap::new(),
            indent_size: default_indent_size(),
            unit_test_mode: false,
        }
    }
}

pub fn load_settings(path: &Path) -> Result<BridgeSettings> {
    if !path.exists() {
        debug!(path = %path.display(), "no settings file, using defaults");
        return Ok(BridgeSettings::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid settings file: {}", path.display()))
}

pub fn resolve_settings_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.settings.clone() {
        return Ok(p);
    }
    Ok(bridge_home()?.join("settings.json"))
}

pub fn resolve_jar_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.jar.clone() {
        return Ok(p);
    }

    if let Ok(p) = env::var(JAR_ENV) {
        return Ok(PathBuf::from(p));
    }

    let default_path = bridge_home()?.join("tools").join("vineflower.jar");
    if default_path.exists() {
        return Ok(default_path);
    }

    install_vineflower_if_missing(&default_path)?;
    Ok(default_path)
}

fn bridge_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("vineflower-bridge"))
}

fn install_vineflower_if_missing(target_path: &Path) -> Result<()> {
    if target_path.exists() {
        return Ok(());
    }

    if let Some(parent) = target_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    info!(target = %target_path.display(), "Vineflower not found, downloading");
    let status = std::process::Command::new("curl")
        .args([
            "-L",
            "--fail",
            "--silent",
            "--show-error",
            "-o",
            target_path
                .to_str()
                .context("vineflower.jar target path is not valid UTF-8")?,
            VINEFLOWER_URL,
        ])
        .status()
        .context(
            "Failed to execute curl (ensure curl is installed, or use --jar to specify vineflower.jar)",
        )?;

    if !status.success() {
        if cfg!(windows) {
            let ps_status = std::process::Command::new("powershell")
                .args([
                    "-NoProfile",
                    "-ExecutionPolicy",
                    "Bypass",
                    "-Command",
                    &format!(
                        "Invoke-WebRequest -Uri '{VINEFLOWER_URL}' -OutFile '{}'",
                        target_path.display()
                    ),
                ])
                .status();

            if let Ok(s) = ps_status
                && s.success()
            {
                return Ok(());
            }
        }

        let _ = std::fs::remove_file(target_path);
        anyhow::bail!(
            "Failed to download Vineflower. You can use --jar to specify a local vineflower.jar"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::tests::temp_dir;

    #[test]
    fn missing_settings_file_yields_defaults() -> Result<()> {
        let settings = load_settings(&temp_dir("no_settings").join("settings.json"))?;
        assert_eq!(settings, BridgeSettings::default());
        assert_eq!(settings.indent_size, 4);
        Ok(())
    }

    #[test]
    fn partial_settings_fill_in_defaults() -> Result<()> {
        let base = temp_dir("settings");
        std::fs::create_dir_all(&base)?;
        let path = base.join("settings.json");
        std::fs::write(
            &path,
            r#"{"settings": {"dgs": "0", "ind": "2"}, "registry": {"decompiler.use.line.mapping": true}}"#,
        )?;

        let settings = load_settings(&path)?;
        assert_eq!(settings.settings.get("dgs").map(String::as_str), Some("0"));
        assert_eq!(settings.registry.get("decompiler.use.line.mapping"), Some(&true));
        assert_eq!(settings.indent_size, 4);
        assert!(!settings.unit_test_mode);

        std::fs::write(&path, "not json")?;
        assert!(load_settings(&path).is_err());

        let _ = std::fs::remove_dir_all(base);
        Ok(())
    }
}
