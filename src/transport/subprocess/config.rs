//! Child environment sanitisation

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::types::AgentOptions;

/// Output features left enabled under plain mode
pub const PLAIN_EXCEPT: &str = "alias,i18n,revsetalias";

/// Variables the caller's `env` may not override
///
/// Changing any of these would alter the child's output in ways the record
/// parsers cannot cope with.
pub const RESERVED_ENV_VARS: &[&str] = &["HGPLAINEXCEPT", "HGENCODING"];

/// Variables to set on top of the inherited environment of a child
pub fn child_environment(options: &AgentOptions) -> HashMap<String, String> {
    let mut child_env = HashMap::new();

    for (key, value) in &options.env {
        if RESERVED_ENV_VARS.contains(&key.as_str()) {
            log::warn!("ignoring reserved environment variable {key}");
        } else {
            child_env.insert(key.clone(), value.clone());
        }
    }

    child_env.insert("HGPLAINEXCEPT".to_string(), PLAIN_EXCEPT.to_string());
    child_env.insert("HGENCODING".to_string(), "utf-8".to_string());

    if !options.frozen
        && let Some(root) = &options.library_root
    {
        let inherited = child_env
            .get("PYTHONPATH")
            .map(Into::into)
            .or_else(|| env::var_os("PYTHONPATH"));
        let mut paths = vec![root.clone()];
        if let Some(inherited) = inherited {
            paths.extend(env::split_paths(&inherited));
        }
        match env::join_paths(paths) {
            Ok(joined) => {
                child_env.insert("PYTHONPATH".to_string(), joined.to_string_lossy().into_owned());
            }
            Err(e) => log::warn!("cannot extend PYTHONPATH with {}: {e}", root.display()),
        }
    }

    child_env
}

/// Places checked after `PATH` when looking for the executable
pub(super) fn fallback_locations() -> Vec<PathBuf> {
    let mut locations = vec![
        PathBuf::from("/usr/local/bin/hg"),
        PathBuf::from("/usr/bin/hg"),
        PathBuf::from("/opt/homebrew/bin/hg"),
    ];
    if let Some(home) = env::var_os("HOME") {
        locations.push(PathBuf::from(home).join(".local/bin/hg"));
    }
    locations
}
