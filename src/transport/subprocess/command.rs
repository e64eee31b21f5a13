//! Command line building for worker subprocesses

use std::path::{Path, PathBuf};

use crate::error::{CommandError, Result};
use crate::transport::Invocation;
use crate::types::{AgentOptions, CommandLine};

use super::config::{child_environment, fallback_locations};

/// Arguments turning the executable into a pipe command server
const SERVE_ARGS: &[&str] = &[
    "serve",
    "--cmdserver",
    "pipe",
    "--config",
    "ui.interactive=True",
];

/// Builds the invocations of both worker kinds from agent options
pub struct InvocationBuilder<'a> {
    program: &'a Path,
    options: &'a AgentOptions,
}

impl<'a> InvocationBuilder<'a> {
    /// Create a builder for `program`
    pub const fn new(program: &'a Path, options: &'a AgentOptions) -> Self {
        Self { program, options }
    }

    /// One subprocess running `cmdline`
    #[must_use]
    pub fn one_shot(&self, cmdline: &CommandLine) -> Invocation {
        let mut invocation = self.base();
        invocation.args.extend(cmdline.args().iter().cloned());
        invocation
    }

    /// The persistent command server
    #[must_use]
    pub fn command_server(&self) -> Invocation {
        let mut invocation = self.base();
        invocation
            .args
            .extend(SERVE_ARGS.iter().map(|a| (*a).to_string()));
        invocation
    }

    fn base(&self) -> Invocation {
        let mut args = Vec::new();
        self.add_config_args(&mut args);
        self.add_extension_args(&mut args);
        Invocation {
            program: self.program.to_path_buf(),
            args,
            env: child_environment(self.options),
            cwd: self.options.cwd.clone(),
        }
    }

    /// Forward the caller's ad-hoc `--config` overrides
    fn add_config_args(&self, args: &mut Vec<String>) {
        for entry in self.options.forwarded_overrides() {
            args.push("--config".to_string());
            args.push(entry.to_arg());
        }
    }

    fn add_extension_args(&self, args: &mut Vec<String>) {
        for ext in &self.options.extensions {
            args.push("--config".to_string());
            args.push(format!("extensions.{ext}="));
        }
    }
}

/// Locate the executable: explicit option, then `PATH`, then common places
///
/// # Errors
/// Returns [`CommandError::ExecutableNotFound`] if nothing was found
pub fn find_executable(options: &AgentOptions) -> Result<PathBuf> {
    if let Some(path) = &options.executable {
        return Ok(path.clone());
    }
    if let Ok(path) = which::which("hg") {
        return Ok(path);
    }
    fallback_locations()
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(CommandError::executable_not_found)
}
