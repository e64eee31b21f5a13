//! Agent options and configuration
//!
//! This module contains the configuration for a `CommandAgent`, including a
//! builder pattern for easy configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CommandError, Result};

/// Default ServerWorker handshake / partial-frame timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time an agent shutdown waits for its worker to stop
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Extensions the child needs to cooperate with the output codec
pub const DEFAULT_EXTENSIONS: &[&str] = &["pipeui"];

// ============================================================================
// Worker selection
// ============================================================================

/// Which worker variant an agent drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WorkerKind {
    /// One subprocess per command
    Process,
    /// One persistent command server reused across commands
    #[default]
    Server,
}

// ============================================================================
// Configuration overrides
// ============================================================================

/// Where a configuration value came from in the caller's configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSource {
    /// An ad-hoc `--config` override; forwarded to child processes
    CommandLine,
    /// A configuration file; the child reads it on its own
    File,
}

/// One `section.name=value` configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigOverride {
    /// Section name
    pub section: String,
    /// Key inside the section
    pub name: String,
    /// Value
    pub value: String,
    /// Origin of the value
    pub source: ConfigSource,
}

impl ConfigOverride {
    /// Create a `--config` sourced override
    pub fn new(
        section: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            name: name.into(),
            value: value.into(),
            source: ConfigSource::CommandLine,
        }
    }

    /// Parse `section.name=value`
    ///
    /// # Errors
    /// Returns error if the section, name or `=` is missing
    pub fn parse(spec: &str) -> Result<Self> {
        let (key, value) = spec
            .split_once('=')
            .ok_or_else(|| CommandError::invalid_config(format!("malformed --config option: {spec}")))?;
        let (section, name) = key
            .split_once('.')
            .filter(|(s, n)| !s.is_empty() && !n.is_empty())
            .ok_or_else(|| CommandError::invalid_config(format!("malformed --config option: {spec}")))?;
        Ok(Self::new(section, name, value))
    }

    /// Render as the argument following `--config`
    #[must_use]
    pub fn to_arg(&self) -> String {
        format!("{}.{}={}", self.section, self.name, self.value)
    }
}

// ============================================================================
// Agent Options
// ============================================================================

/// Main options for a `CommandAgent`
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Version-control executable; discovered on PATH when `None`
    pub executable: Option<PathBuf>,
    /// Repository root the child processes run in
    pub cwd: Option<PathBuf>,
    /// Worker variant
    pub worker_kind: WorkerKind,
    /// Configuration values of the caller's active configuration
    pub config_overrides: Vec<ConfigOverride>,
    /// Protocol-cooperation extensions enabled in every child
    pub extensions: Vec<String>,
    /// Extra environment variables for the child
    pub env: HashMap<String, String>,
    /// Library root prepended to the child's module search path
    pub library_root: Option<PathBuf>,
    /// Running from a self-contained bundle (no search path tweaks)
    pub frozen: bool,
    /// Command server handshake / partial-frame timeout
    pub read_timeout: Duration,
    /// How long shutdown waits for the worker to stop
    pub shutdown_timeout: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            executable: None,
            cwd: None,
            worker_kind: WorkerKind::default(),
            config_overrides: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
            env: HashMap::new(),
            library_root: None,
            frozen: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl AgentOptions {
    /// Create a new builder for `AgentOptions`
    #[must_use]
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }

    /// Overrides that must be forwarded to child processes
    pub fn forwarded_overrides(&self) -> impl Iterator<Item = &ConfigOverride> {
        self.config_overrides
            .iter()
            .filter(|o| o.source == ConfigSource::CommandLine)
    }
}

// ============================================================================
// Builder for AgentOptions
// ============================================================================

/// Builder for `AgentOptions`
#[derive(Debug, Default)]
pub struct AgentOptionsBuilder {
    options: AgentOptions,
}

impl AgentOptionsBuilder {
    /// Set the executable
    #[must_use]
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.executable = Some(path.into());
        self
    }

    /// Set working directory
    #[must_use]
    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(path.into());
        self
    }

    /// Set worker kind
    #[must_use]
    pub const fn worker_kind(mut self, kind: WorkerKind) -> Self {
        self.options.worker_kind = kind;
        self
    }

    /// Add a configuration value
    #[must_use]
    pub fn config_override(mut self, entry: ConfigOverride) -> Self {
        self.options.config_overrides.push(entry);
        self
    }

    /// Replace the extension whitelist
    #[must_use]
    pub fn extensions(mut self, extensions: Vec<impl Into<String>>) -> Self {
        self.options.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.insert(key.into(), value.into());
        self
    }

    /// Set library root
    #[must_use]
    pub fn library_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.library_root = Some(path.into());
        self
    }

    /// Mark as running from a self-contained bundle
    #[must_use]
    pub const fn frozen(mut self, frozen: bool) -> Self {
        self.options.frozen = frozen;
        self
    }

    /// Set read timeout
    ///
    /// # Panics
    /// Panics if the timeout is zero
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "read_timeout must be non-zero");
        self.options.read_timeout = timeout;
        self
    }

    /// Set shutdown timeout
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options.shutdown_timeout = timeout;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> AgentOptions {
        self.options
    }
}
