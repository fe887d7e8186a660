use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use coderoom_protocol::Language;
use libcoderoom::exec::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT};
use libcoderoom::{ExecConfig, RegistryConfig, Toolchains};
use serde::Deserialize;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:3001";
pub const DEFAULT_ALLOW_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_IDLE_TTL_SECS: u64 = 3600;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// `*` allows any origin.
    pub allow_origins: Vec<String>,
    pub session: SessionSection,
    pub execution: ExecutionSection,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SessionSection {
    pub event_capacity: usize,
    pub default_file_name: String,
    pub default_file_content: String,
    /// Sessions nobody joined within this many seconds are removed. 0 keeps
    /// them forever.
    pub idle_ttl_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExecutionSection {
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Defaults to the system temp directory.
    pub scratch_dir: Option<PathBuf>,
    /// Language id to interpreter or compiler program.
    pub programs: BTreeMap<String, String>,
}

impl ServerConfig {
    /// Load from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn config_path() -> PathBuf {
        dirs_path().join("config.toml")
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            event_capacity: self.session.event_capacity,
            default_file_name: self.session.default_file_name.clone(),
            default_file_content: self.session.default_file_content.clone(),
        }
    }

    /// `None` when the unjoined-session sweep is disabled.
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.session.idle_ttl_secs > 0).then(|| Duration::from_secs(self.session.idle_ttl_secs))
    }

    pub fn exec_config(&self) -> Result<ExecConfig> {
        let mut toolchains = Toolchains::default();
        for (id, program) in &self.execution.programs {
            let language: Language = id
                .parse()
                .with_context(|| format!("[execution.programs] names unknown language {id:?}"))?;
            if !toolchains.override_program(language, program.clone()) {
                bail!("[execution.programs] language {id:?} is not executable");
            }
        }
        if self.execution.timeout_secs == 0 {
            bail!("execution.timeout_secs must be > 0");
        }
        Ok(ExecConfig {
            timeout: Duration::from_secs(self.execution.timeout_secs),
            max_output_bytes: self.execution.max_output_bytes,
            scratch_dir: self
                .execution
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            toolchains,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3001)),
            allow_origins: vec![DEFAULT_ALLOW_ORIGIN.to_string()],
            session: SessionSection::default(),
            execution: ExecutionSection::default(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        let registry = RegistryConfig::default();
        Self {
            event_capacity: registry.event_capacity,
            default_file_name: registry.default_file_name,
            default_file_content: registry.default_file_content,
            idle_ttl_secs: DEFAULT_IDLE_TTL_SECS,
        }
    }
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            scratch_dir: None,
            programs: BTreeMap::new(),
        }
    }
}

fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("coderoom")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("coderoom")
    } else {
        PathBuf::from("/tmp/coderoom")
    }
}
