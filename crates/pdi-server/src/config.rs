//! Configuration management
//!
//! Daemon-level settings come from environment variables with defaults.
//! Importer instances are described in a JSON file referenced by
//! `PDI_INSTANCES_FILE`; per-module tunables, field maps, and boolean
//! maps live in named settings files under `PDI_SETTINGS_DIR`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pdi_common::{PdiError, Result};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default control-plane bind address.
pub const DEFAULT_CONTROL_BIND: &str = "127.0.0.1:7171";

/// Default instances file.
pub const DEFAULT_INSTANCES_FILE: &str = "./config/instances.json";

/// Default settings directory.
pub const DEFAULT_SETTINGS_DIR: &str = "./config/settings";

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub control: ControlConfig,
    pub instances_file: PathBuf,
    pub settings_dir: PathBuf,
    pub shutdown_timeout_secs: u64,
}

/// Control-plane listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub enabled: bool,
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            control: ControlConfig {
                enabled: std::env::var("PDI_CONTROL_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
                bind_addr: std::env::var("PDI_CONTROL_BIND")
                    .unwrap_or_else(|_| DEFAULT_CONTROL_BIND.to_string()),
            },
            instances_file: std::env::var("PDI_INSTANCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_INSTANCES_FILE)),
            settings_dir: std::env::var("PDI_SETTINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_DIR)),
            shutdown_timeout_secs: std::env::var("PDI_SHUTDOWN_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.control.enabled && self.control.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!(
                "PDI_CONTROL_BIND is not a valid socket address: {}",
                self.control.bind_addr
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control: ControlConfig {
                enabled: true,
                bind_addr: DEFAULT_CONTROL_BIND.to_string(),
            },
            instances_file: PathBuf::from(DEFAULT_INSTANCES_FILE),
            settings_dir: PathBuf::from(DEFAULT_SETTINGS_DIR),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// Importer Instances
// ============================================================================

/// One configured importer instance
///
/// Created once at startup from the instances file and immutable
/// thereafter, except for `force_update` which is runtime-toggleable
/// on the live module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterInstance {
    /// Stable identity; also the module registry key
    pub name: String,
    /// Human-readable display name
    #[serde(default)]
    pub display_name: String,
    /// Disabled instances are loaded but never started
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Named importer module implementation
    pub module: String,
    /// Named customer process implementation
    pub customer_process: String,
    /// Persist records even when the diff shows no change
    #[serde(default)]
    pub force_update: bool,
    /// Trigger-specific settings
    pub settings: TypeSettings,
}

fn default_true() -> bool {
    true
}

/// Trigger settings, dispatched on the `type` discriminator.
///
/// An unknown discriminator fails deserialization, which
/// [`load_instances`] reports as a configuration error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypeSettings {
    /// Watch or poll a directory for file drops
    FileMonitor(FileMonitorSettings),
    /// Run an outbound fetch on a schedule
    SchedulerService(SchedulerServiceSettings),
}

/// Settings for file-watch and file-poll triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMonitorSettings {
    pub target_path: PathBuf,
    pub poll_interval_ms: u64,
    /// Extensions accepted from the target directory, without dots
    pub allowed_extensions: Vec<String>,
    /// true = filesystem notifications, false = periodic scans
    #[serde(default = "default_true")]
    pub watch: bool,
    /// Credentials for a network share, applied only when establishing
    /// access to the watched path
    #[serde(default)]
    pub credentials: Option<ShareCredentials>,
}

/// Network-share credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareCredentials {
    pub domain: String,
    pub username: String,
    pub password: String,
}

/// Settings for scheduled-job triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerServiceSettings {
    pub schedule: ScheduleKind,
}

/// A job schedule, either a cron expression or a fixed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron { expression: String },
    Interval { secs: u64 },
}

/// Load and validate the importer instance descriptors.
///
/// Fails fast: any structural problem, unknown settings discriminator,
/// or duplicate instance name is a configuration error at load time,
/// never at steady state.
pub fn load_instances(path: &Path) -> Result<Vec<ImporterInstance>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PdiError::Configuration(format!(
            "cannot read instances file {}: {}",
            path.display(),
            e
        ))
    })?;

    let instances: Vec<ImporterInstance> = serde_json::from_str(&text)
        .map_err(|e| PdiError::Configuration(format!("invalid instances file: {}", e)))?;

    let mut seen = std::collections::HashSet::new();
    for instance in &instances {
        if instance.name.is_empty() {
            return Err(PdiError::Configuration(
                "instance with empty name".to_string(),
            ));
        }
        if !seen.insert(instance.name.clone()) {
            return Err(PdiError::Configuration(format!(
                "duplicate instance name: {}",
                instance.name
            )));
        }
        validate_settings(&instance.name, &instance.settings)?;
    }

    Ok(instances)
}

fn validate_settings(instance: &str, settings: &TypeSettings) -> Result<()> {
    match settings {
        TypeSettings::FileMonitor(fm) => {
            if fm.target_path.as_os_str().is_empty() {
                return Err(PdiError::Configuration(format!(
                    "instance '{}': target_path is required",
                    instance
                )));
            }
            if fm.poll_interval_ms == 0 {
                return Err(PdiError::Configuration(format!(
                    "instance '{}': poll_interval_ms must be greater than 0",
                    instance
                )));
            }
            Ok(())
        },
        TypeSettings::SchedulerService(ss) => match &ss.schedule {
            ScheduleKind::Cron { expression } => {
                cron::Schedule::from_str(expression).map_err(|e| {
                    PdiError::Configuration(format!(
                        "instance '{}': invalid cron expression '{}': {}",
                        instance, expression, e
                    ))
                })?;
                Ok(())
            },
            ScheduleKind::Interval { secs } => {
                if *secs == 0 {
                    return Err(PdiError::Configuration(format!(
                        "instance '{}': interval must be greater than 0",
                        instance
                    )));
                }
                Ok(())
            },
        },
    }
}

// ============================================================================
// Named Settings Files
// ============================================================================

/// A named settings file: a flat map of string keys to string values.
///
/// JSON numbers and booleans are accepted and stringified so a file
/// can say `"PollIntervalMs": 5000` without quoting.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Load `<dir>/<name>.json`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{}.json", name));
        let text = std::fs::read_to_string(&path).map_err(|e| {
            PdiError::Configuration(format!(
                "cannot read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text)
            .map_err(|e| PdiError::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Parse settings from a JSON object of scalar values.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut values = BTreeMap::new();
        for (key, value) in raw {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(PdiError::Configuration(format!(
                        "setting '{}' must be a scalar, got: {}",
                        key, other
                    )));
                },
            };
            values.insert(key, rendered);
        }
        Ok(Self { values })
    }

    /// Build settings directly from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Typed lookup with a default for missing or unparsable values.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Iterate all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
