//! Command server hello block

use std::collections::BTreeMap;

use crate::error::{CommandError, Result};

/// Capability the client requires from every server
pub const REQUIRED_CAPABILITY: &str = "runcommand";

/// Parsed hello block
///
/// The server writes newline-separated `key: value` lines on its output
/// channel right after it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Advertised capabilities
    pub capabilities: Vec<String>,
    /// Server encoding, if advertised
    pub encoding: Option<String>,
    /// Every field of the block, including the ones above
    pub fields: BTreeMap<String, String>,
}

impl Hello {
    /// Parse and validate a hello payload
    ///
    /// # Errors
    /// Returns a protocol error if the payload is not `key: value` lines, the
    /// `capabilities` key is missing, or `runcommand` is not advertised
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| CommandError::protocol(format!("hello block is not UTF-8: {e}")))?;

        let mut fields = BTreeMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let (key, value) = line.split_once(':').ok_or_else(|| {
                CommandError::protocol(format!("invalid line in hello block: {line:?}"))
            })?;
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }

        let capabilities: Vec<String> = fields
            .get("capabilities")
            .ok_or_else(|| CommandError::protocol("no capabilities in hello block"))?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if !capabilities.iter().any(|c| c == REQUIRED_CAPABILITY) {
            return Err(CommandError::protocol(format!(
                "command server does not support '{REQUIRED_CAPABILITY}' (capabilities: {})",
                capabilities.join(" ")
            )));
        }

        Ok(Self {
            capabilities,
            encoding: fields.get("encoding").cloned(),
            fields,
        })
    }

    /// Whether a capability was advertised
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c == name)
    }
}
