//! Option normalization for one decompiler run.
//!
//! Two key generations exist: the classic three-letter keys and the
//! descriptive keys published through the library's option catalog. The
//! generation is picked once from the bound capabilities; the legacy keys are
//! the fallback whenever the catalog is missing or unusable.

use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::api::{OptionCatalog, OptionKind, OptionMap, OptionSpec};

pub const BANNER: &str = "//\n// Source code recreated from a .class file by Vineflower\n//\n\n";
pub const LINE_MAPPING_FLAG: &str = "decompiler.use.line.mapping";
pub const DUMP_ORIGINAL_LINES_FLAG: &str = "decompiler.dump.original.lines";

const DUMP_ORIGINAL_LINES_KEY: &str = "__dump_original_lines__";
const UNIT_TEST_MODE_KEY: &str = "__unit_test_mode__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionGeneration {
    Legacy,
    Descriptive,
}

/// Host-side inputs that feed into the option map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOptions {
    pub indent_size: usize,
    pub unit_test_mode: bool,
    pub line_mapping: bool,
    pub dump_original_lines: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            indent_size: 4,
            unit_test_mode: false,
            line_mapping: false,
            dump_original_lines: false,
        }
    }
}

impl OptionGeneration {
    /// Keys that are internal, environment-controlled, or handled by the host.
    pub fn ignored(self) -> &'static [&'static str] {
        match self {
            Self::Legacy => &[
                "ban",
                "bsm",
                "nls",
                UNIT_TEST_MODE_KEY,
                "log",
                "urc",
                "thr",
                "mpm",
                "\r\n",
                "\n",
            ],
            Self::Descriptive => &[
                "banner",
                "bytecode-source-mapping",
                "new-line-separator",
                "log-level",
                "user-renamer-class",
                "thread-count",
                "max-time-per-method",
            ],
        }
    }

    pub fn indent_key(self) -> &'static str {
        match self {
            Self::Legacy => "ind",
            Self::Descriptive => "indent-string",
        }
    }

    pub fn mapping_key(self) -> &'static str {
        match self {
            Self::Legacy => "bsm",
            Self::Descriptive => "bytecode-source-mapping",
        }
    }

    pub fn overrides(self, host: &HostOptions) -> Vec<(&'static str, String)> {
        let unit_test_mode = flag(host.unit_test_mode);
        match self {
            Self::Legacy => vec![
                ("hdc", "0".to_string()),
                ("dgs", "1".to_string()),
                ("rsy", "1".to_string()),
                ("rbr", "1".to_string()),
                ("nls", "1".to_string()),
                ("ban", BANNER.to_string()),
                ("mpm", "0".to_string()),
                ("iib", "1".to_string()),
                ("vac", "1".to_string()),
                ("ind", host.indent_size.to_string()),
                (UNIT_TEST_MODE_KEY, unit_test_mode),
            ],
            Self::Descriptive => vec![
                ("hide-default-constructor", "0".to_string()),
                ("decompile-generics", "1".to_string()),
                ("remove-synthetic", "1".to_string()),
                ("remove-bridge", "1".to_string()),
                ("new-line-separator", "1".to_string()),
                ("banner", BANNER.to_string()),
                ("max-time-per-method", "0".to_string()),
                ("ignore-invalid-bytecode", "1".to_string()),
                ("verify-anonymous-classes", "1".to_string()),
                ("indent-string", " ".repeat(host.indent_size)),
                (UNIT_TEST_MODE_KEY, unit_test_mode),
            ],
        }
    }

    fn name_override(self, key: &str) -> Option<&'static str> {
        let table: &[(&str, &str)] = match self {
            Self::Legacy => &[
                ("dc4", "Decompile Class 1.4"),
                ("ind", "Indent Size"),
                ("lit", "Literals As-Is"),
            ],
            Self::Descriptive => &[
                ("keep-literals", "Literals As-Is"),
                ("decompiler-java4", "Resugar 1-4 Class Refs"),
            ],
        };
        table.iter().find(|(k, _)| *k == key).map(|(_, name)| *name)
    }
}

/// One row of a settings form, without the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsEntry {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub group: Option<String>,
    pub kind: OptionKind,
    pub value: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OptionNormalizer {
    generation: OptionGeneration,
    catalog: Vec<OptionSpec>,
}

impl OptionNormalizer {
    pub fn legacy() -> Self {
        Self {
            generation: OptionGeneration::Legacy,
            catalog: legacy_catalog(),
        }
    }

    pub fn descriptive(catalog: Vec<OptionSpec>) -> Self {
        Self {
            generation: OptionGeneration::Descriptive,
            catalog,
        }
    }

    pub fn discover(catalog: Option<&Arc<dyn OptionCatalog>>) -> Self {
        let Some(catalog) = catalog else {
            return Self::legacy();
        };
        match catalog.options() {
            Ok(options) if !options.is_empty() => Self::descriptive(options),
            Ok(_) => {
                warn!("option catalog is empty, falling back to legacy option keys");
                Self::legacy()
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "option discovery failed, falling back to legacy option keys");
                Self::legacy()
            }
        }
    }

    pub fn generation(&self) -> OptionGeneration {
        self.generation
    }

    pub fn catalog(&self) -> &[OptionSpec] {
        &self.catalog
    }

    /// Builds the option map handed to one decompiler instance.
    pub fn normalize(&self, settings: &OptionMap, host: &HostOptions) -> OptionMap {
        let generation = self.generation;
        let ignored = generation.ignored();

        let mut options: OptionMap = settings
            .iter()
            .filter(|(key, _)| !ignored.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        for (key, value) in generation.overrides(host) {
            options.entry(key.to_string()).or_insert(value);
        }

        if let Some(value) = options.get_mut(generation.indent_key()) {
            *value = indent_string(value, host.indent_size);
        }

        if host.line_mapping {
            options.insert(generation.mapping_key().to_string(), "1".to_string());
        }
        if host.dump_original_lines {
            options.insert(DUMP_ORIGINAL_LINES_KEY.to_string(), "1".to_string());
        }

        options
    }

    /// Describes every user-tunable option of the bound generation.
    pub fn settings_entries(&self, settings: &OptionMap, host: &HostOptions) -> Vec<SettingsEntry> {
        let generation = self.generation;
        let ignored = generation.ignored();
        let overrides = generation.overrides(host);
        let override_for = |key: &str| {
            overrides
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
        };

        let mut entries = Vec::new();
        for option in &self.catalog {
            let key = option.key.as_str();
            if ignored.contains(&key) {
                continue;
            }
            if generation == OptionGeneration::Descriptive && key == generation.indent_key() {
                continue;
            }

            let default = override_for(key).or_else(|| option.default_value.clone());
            let kind = match generation {
                OptionGeneration::Legacy => default.as_deref().map(infer_kind).unwrap_or(option.kind),
                OptionGeneration::Descriptive => option.kind,
            };
            let value = settings
                .get(key)
                .cloned()
                .or_else(|| default.clone())
                .unwrap_or_default();

            entries.push(SettingsEntry {
                key: option.key.clone(),
                name: generation
                    .name_override(key)
                    .map(str::to_string)
                    .unwrap_or_else(|| option.name.clone()),
                description: Some(option.description.clone()).filter(|d| !d.is_empty()),
                group: option.plugin.clone(),
                kind,
                value,
                default,
            });
        }

        if generation == OptionGeneration::Descriptive {
            let key = generation.indent_key();
            let width = settings
                .get(key)
                .map(|current| indent_string(current, host.indent_size).len())
                .unwrap_or(host.indent_size);
            entries.push(SettingsEntry {
                key: key.to_string(),
                name: "Indent Size".to_string(),
                description: Some("Number of spaces to use for each indentation level.".to_string()),
                group: None,
                kind: OptionKind::Int,
                value: width.to_string(),
                default: Some(host.indent_size.to_string()),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));
        entries
    }
}

fn flag(on: bool) -> String {
    if on { "1" } else { "0" }.to_string()
}

fn indent_string(raw: &str, fallback: usize) -> String {
    if let Ok(width) = raw.trim().parse::<usize>() {
        return " ".repeat(width);
    }
    if raw.chars().all(|c| c == ' ' || c == '\t') {
        return raw.to_string();
    }
    warn!(value = raw, "invalid indent option, using host indent size");
    " ".repeat(fallback)
}

fn infer_kind(default: &str) -> OptionKind {
    if default == "0" || default == "1" {
        OptionKind::Bool
    } else if default.parse::<i64>().is_ok() {
        OptionKind::Int
    } else {
        OptionKind::String
    }
}

/// Classic short keys: (key, constant name, default).
const LEGACY_OPTIONS: &[(&str, &str, &str)] = &[
    ("rbr", "REMOVE_BRIDGE", "1"),
    ("rsy", "REMOVE_SYNTHETIC", "0"),
    ("din", "DECOMPILE_INNER", "1"),
    ("dc4", "DECOMPILE_CLASS_1_4", "1"),
    ("das", "DECOMPILE_ASSERTIONS", "1"),
    ("hes", "HIDE_EMPTY_SUPER", "1"),
    ("hdc", "HIDE_DEFAULT_CONSTRUCTOR", "1"),
    ("dgs", "DECOMPILE_GENERIC_SIGNATURES", "0"),
    ("ner", "NO_EXCEPTIONS_RETURN", "1"),
    ("esm", "ENSURE_SYNCHRONIZED_MONITOR", "1"),
    ("den", "DECOMPILE_ENUM", "1"),
    ("rgn", "REMOVE_GET_CLASS_NEW", "1"),
    ("lit", "LITERALS_AS_IS", "0"),
    ("bto", "BOOLEAN_TRUE_ONE", "1"),
    ("asc", "ASCII_STRING_CHARACTERS", "0"),
    ("nns", "SYNTHETIC_NOT_SET", "0"),
    ("uto", "UNDEFINED_PARAM_TYPE_OBJECT", "1"),
    ("udv", "USE_DEBUG_VAR_NAMES", "1"),
    ("ump", "USE_METHOD_PARAMETERS", "1"),
    ("rer", "REMOVE_EMPTY_RANGES", "1"),
    ("fdi", "FINALLY_DEINLINE", "1"),
    ("inn", "IDEA_NOT_NULL_ANNOTATION", "1"),
    ("lac", "LAMBDA_TO_ANONYMOUS_CLASS", "0"),
    ("bsm", "BYTECODE_SOURCE_MAPPING", "0"),
    ("iib", "IGNORE_INVALID_BYTECODE", "0"),
    ("vac", "VERIFY_ANONYMOUS_CLASSES", "0"),
    ("pll", "PREFERRED_LINE_LENGTH", "160"),
    ("log", "LOG_LEVEL", "INFO"),
    ("mpm", "MAX_PROCESSING_METHOD", "0"),
    ("urc", "USER_RENAMER_CLASS", ""),
    ("nls", "NEW_LINE_SEPARATOR", "0"),
    ("ind", "INDENT_STRING", "   "),
    ("ban", "BANNER", ""),
];

fn legacy_catalog() -> Vec<OptionSpec> {
    LEGACY_OPTIONS
        .iter()
        .map(|(key, constant, default)| OptionSpec {
            key: (*key).to_string(),
            kind: infer_kind(default),
            name: title_case(constant),
            description: String::new(),
            plugin: None,
            default_value: Some((*default).to_string()),
        })
        .collect()
}

fn title_case(constant: &str) -> String {
    constant
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
