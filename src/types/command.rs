//! Command-line values submitted to a worker

use serde::{Deserialize, Serialize};

/// Ordered argument vector for one version-control command
///
/// The executable itself is implicit: `["status", "-m"]` runs `hg status -m`.
/// A `CommandLine` is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    /// Create a command line from any sequence of string-like arguments
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Arguments as a slice
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.0
    }

    /// Name of the command (first argument), if any
    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Whether the argument vector is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Human-readable rendering, quoting arguments that contain whitespace
    #[must_use]
    pub fn display(&self) -> String {
        let mut out = String::from("hg");
        for arg in &self.0 {
            out.push(' ');
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"') {
                out.push('"');
                out.push_str(&arg.replace('"', "\\\""));
                out.push('"');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(args: Vec<String>) -> Self {
        Self(args)
    }
}

impl From<&[&str]> for CommandLine {
    fn from(args: &[&str]) -> Self {
        Self::new(args.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(args: [&str; N]) -> Self {
        Self::new(args)
    }
}
