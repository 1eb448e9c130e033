//! Configuration loading and the workspace layout.
//!
//! Precedence is strictly flag > env > `config.yaml` > built-in default,
//! resolved in one place ([`Config::resolve`]) rather than scattered
//! reads. Environment variables shadow config keys as `BD_`-prefixed
//! upper-underscore names, plus the `BEADS_DB` / `BEADS_FLUSH_DEBOUNCE` /
//! `BEADS_AUTO_START_DAEMON` aliases.

use crate::error::{BeadsError, Result};
use crate::storage::BackendKind;
use crate::util::id::is_valid_prefix;
use crate::util::time::parse_duration;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BEADS_DIR_NAME: &str = ".beads";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const JSONL_FILE_NAME: &str = "issues.jsonl";
pub const SOCKET_FILE_NAME: &str = "bd.sock";
pub const PID_FILE_NAME: &str = "daemon.pid";
pub const LOG_FILE_NAME: &str = "daemon.log";
pub const DAEMON_LOCK_FILE_NAME: &str = "daemon.lock";

pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_secs(5);

/// Recognized configuration keys, canonical (kebab-case) spellings.
const KNOWN_KEYS: &[&str] = &[
    "issue-prefix",
    "backend",
    "no-db",
    "json-output",
    "no-daemon",
    "no-auto-flush",
    "no-auto-import",
    "actor",
    "flush-debounce",
    "auto-start-daemon",
    "db",
];

/// One source of configuration values. Later layers win on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    values: HashMap<String, String>,
}

impl ConfigLayer {
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Merge `other` on top of this layer (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Load the workspace `config.yaml`. A missing file is an empty
    /// layer. The legacy `issue_prefix` spelling is migrated to the
    /// canonical `issue-prefix` key and the file rewritten once.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let raw: HashMap<String, serde_yaml::Value> = if contents.trim().is_empty() {
            HashMap::new()
        } else {
            serde_yaml::from_str(&contents)?
        };

        let mut layer = Self::default();
        let mut needs_rewrite = false;
        for (key, value) in raw {
            let canonical = if key == "issue_prefix" {
                needs_rewrite = true;
                "issue-prefix".to_string()
            } else {
                key
            };
            let value = yaml_scalar_to_string(&value);
            layer.values.insert(canonical, value);
        }

        if needs_rewrite {
            tracing::info!(path = %path.display(), "migrating legacy issue_prefix key");
            layer.write_yaml(path)?;
        }

        Ok(layer)
    }

    /// Persist this layer as `config.yaml`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_yaml(&self, path: &Path) -> Result<()> {
        let ordered: std::collections::BTreeMap<&String, &String> =
            self.values.iter().collect();
        fs::write(path, serde_yaml::to_string(&ordered)?)?;
        Ok(())
    }

    /// Build a layer from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mut layer = Self::default();

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("BD_") {
                let canonical = stripped.to_lowercase().replace('_', "-");
                if KNOWN_KEYS.contains(&canonical.as_str()) {
                    layer.set(&canonical, value);
                }
            }
        }

        if let Ok(value) = env::var("BEADS_DB") {
            if !value.trim().is_empty() {
                layer.set("db", value);
            }
        }
        if let Ok(value) = env::var("BEADS_FLUSH_DEBOUNCE") {
            if !value.trim().is_empty() {
                layer.set("flush-debounce", value);
            }
        }
        if let Ok(value) = env::var("BEADS_AUTO_START_DAEMON") {
            if !value.trim().is_empty() {
                layer.set("auto-start-daemon", value);
            }
        }

        layer
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

/// Caller-supplied (flag-level) overrides, the highest-precedence layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    pub actor: Option<String>,
    pub backend: Option<BackendKind>,
    pub json_output: Option<bool>,
    pub no_db: Option<bool>,
    pub no_daemon: Option<bool>,
    pub no_auto_flush: Option<bool>,
    pub no_auto_import: Option<bool>,
    pub flush_debounce: Option<Duration>,
    pub auto_start_daemon: Option<bool>,
}

/// Fully resolved configuration for one workspace.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: PathBuf,
    pub beads_dir: PathBuf,
    pub issue_prefix: String,
    pub backend: BackendKind,
    pub no_db: bool,
    pub json_output: bool,
    pub no_daemon: bool,
    pub no_auto_flush: bool,
    pub no_auto_import: bool,
    pub actor: String,
    pub flush_debounce: Duration,
    pub auto_start_daemon: bool,
    pub db_override: Option<PathBuf>,
}

impl Config {
    /// The single precedence resolver: flag > env > config.yaml >
    /// built-in default.
    ///
    /// # Errors
    ///
    /// Returns an error when `config.yaml` is unreadable, a value fails
    /// to parse, or the resolved `issue-prefix` is missing/invalid.
    pub fn resolve(workspace: &Path, overrides: &CliOverrides) -> Result<Self> {
        let beads_dir = workspace.join(BEADS_DIR_NAME);

        let mut merged = ConfigLayer::from_yaml(&beads_dir.join(CONFIG_FILE_NAME))?;
        merged.merge_from(&ConfigLayer::from_env());

        let issue_prefix = merged
            .get("issue-prefix")
            .map(str::trim)
            .map(ToString::to_string)
            .ok_or_else(|| {
                BeadsError::Config("issue-prefix is required in config.yaml".to_string())
            })?;
        if !is_valid_prefix(&issue_prefix) {
            return Err(BeadsError::Config(format!(
                "invalid issue-prefix: {issue_prefix}"
            )));
        }

        let backend = match overrides.backend {
            Some(b) => b,
            None => merged
                .get("backend")
                .map(|v| v.parse::<BackendKind>())
                .transpose()?
                .unwrap_or_default(),
        };

        let flush_debounce = match overrides.flush_debounce {
            Some(d) => d,
            None => merged
                .get("flush-debounce")
                .map(|v| parse_duration(v, "flush-debounce"))
                .transpose()?
                .unwrap_or(DEFAULT_FLUSH_DEBOUNCE),
        };

        let bool_key = |over: Option<bool>, key: &str, default: bool| -> Result<bool> {
            match over {
                Some(v) => Ok(v),
                None => merged
                    .get(key)
                    .map(|v| parse_bool(v, key))
                    .transpose()
                    .map(|v| v.unwrap_or(default)),
            }
        };

        let actor = overrides
            .actor
            .clone()
            .or_else(|| merged.get("actor").map(ToString::to_string))
            .unwrap_or_else(default_actor);

        let db_override = overrides
            .db
            .clone()
            .or_else(|| merged.get("db").map(PathBuf::from));

        Ok(Self {
            workspace: workspace.to_path_buf(),
            beads_dir,
            issue_prefix,
            backend,
            no_db: bool_key(overrides.no_db, "no-db", false)?,
            json_output: bool_key(overrides.json_output, "json-output", false)?,
            no_daemon: bool_key(overrides.no_daemon, "no-daemon", false)?,
            no_auto_flush: bool_key(overrides.no_auto_flush, "no-auto-flush", false)?,
            no_auto_import: bool_key(overrides.no_auto_import, "no-auto-import", false)?,
            actor,
            flush_debounce,
            auto_start_daemon: bool_key(overrides.auto_start_daemon, "auto-start-daemon", true)?,
            db_override,
        })
    }

    #[must_use]
    pub fn jsonl_path(&self) -> PathBuf {
        self.beads_dir.join(JSONL_FILE_NAME)
    }

    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.beads_dir.join(SOCKET_FILE_NAME)
    }

    #[must_use]
    pub fn pid_file_path(&self) -> PathBuf {
        self.beads_dir.join(PID_FILE_NAME)
    }

    #[must_use]
    pub fn log_file_path(&self) -> PathBuf {
        self.beads_dir.join(LOG_FILE_NAME)
    }

    #[must_use]
    pub fn daemon_lock_path(&self) -> PathBuf {
        self.beads_dir.join(DAEMON_LOCK_FILE_NAME)
    }
}

fn parse_bool(value: &str, key: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(BeadsError::Config(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}

/// Actor recorded on events when none is configured: the git user if
/// one is set, else the OS user, else "unknown".
#[must_use]
pub fn default_actor() -> String {
    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Walk up from `start` looking for a `.beads` directory.
///
/// # Errors
///
/// Returns `NotInitialized` when no workspace is found.
pub fn discover_workspace(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(BEADS_DIR_NAME).is_dir() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(BeadsError::NotInitialized);
        }
    }
}

/// Create the `.beads` layout for a workspace: the directory, a
/// `config.yaml` carrying the prefix, and a `.gitignore` covering the
/// daemon's runtime files.
///
/// # Errors
///
/// Returns an error if directories or files cannot be written, or the
/// prefix is invalid.
pub fn init_workspace(workspace: &Path, prefix: &str, backend: BackendKind) -> Result<PathBuf> {
    if !is_valid_prefix(prefix) {
        return Err(BeadsError::Config(format!("invalid issue-prefix: {prefix}")));
    }

    let beads_dir = workspace.join(BEADS_DIR_NAME);
    fs::create_dir_all(&beads_dir)?;

    let config_path = beads_dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        let mut layer = ConfigLayer::default();
        layer.set("issue-prefix", prefix);
        layer.set("backend", backend.as_str());
        layer.write_yaml(&config_path)?;
    }

    ensure_gitignore(&beads_dir)?;
    Ok(beads_dir)
}

/// Runtime files never belong in version control; the JSONL artifact and
/// config do.
fn ensure_gitignore(beads_dir: &Path) -> Result<()> {
    const ENTRIES: &[&str] = &[
        "beads.db",
        "beads.db-wal",
        "beads.db-shm",
        "bd.sock",
        "daemon.pid",
        "daemon.log",
        "daemon.lock",
        "*.tmp",
    ];

    let path = beads_dir.join(".gitignore");
    let existing = if path.exists() {
        fs::read_to_string(&path)?
    } else {
        String::new()
    };

    let mut lines: Vec<&str> = existing.lines().collect();
    let mut changed = false;
    for entry in ENTRIES {
        if !lines.contains(entry) {
            lines.push(entry);
            changed = true;
        }
    }

    if changed {
        fs::write(&path, format!("{}\n", lines.join("\n")))?;
    }
    Ok(())
}
