//! Output and progress records emitted by workers

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Known tags of a whitespace-separated output label
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Labels: u16 {
        /// `ui.error`
        const ERROR = 1 << 0;
        /// `ui.warning`
        const WARNING = 1 << 1;
        /// `ui.progress`
        const PROGRESS = 1 << 2;
        /// `ui.prompt`
        const PROMPT = 1 << 3;
        /// `ui.getpass`
        const GETPASS = 1 << 4;
        /// `ui.promptchoice`
        const PROMPT_CHOICE = 1 << 5;
        /// `control` (session bookkeeping lines)
        const CONTROL = 1 << 6;
        /// `ui.status`
        const STATUS = 1 << 7;
        /// `ui.debug`
        const DEBUG = 1 << 8;
    }
}

/// Label of error output
pub const ERROR_LABEL: &str = "ui.error";

/// Label of session bookkeeping lines
pub const CONTROL_LABEL: &str = "control";

const LABEL_NAMES: &[(&str, Labels)] = &[
    (ERROR_LABEL, Labels::ERROR),
    ("ui.warning", Labels::WARNING),
    ("ui.progress", Labels::PROGRESS),
    ("ui.prompt", Labels::PROMPT),
    ("ui.getpass", Labels::GETPASS),
    ("ui.promptchoice", Labels::PROMPT_CHOICE),
    (CONTROL_LABEL, Labels::CONTROL),
    ("ui.status", Labels::STATUS),
    ("ui.debug", Labels::DEBUG),
];

impl Labels {
    /// Parse a label string; unknown tags are ignored
    #[must_use]
    pub fn parse(label: &str) -> Self {
        label
            .split_whitespace()
            .filter_map(|tag| {
                LABEL_NAMES
                    .iter()
                    .find(|(name, _)| *name == tag)
                    .map(|(_, flag)| *flag)
            })
            .fold(Self::empty(), |acc, flag| acc | flag)
    }
}

/// One decoded output record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Output text
    pub text: String,
    /// Whitespace-separated label tags; empty for plain data
    pub label: String,
}

impl OutputRecord {
    /// Create a record
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }

    /// Create a `ui.error` record
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, ERROR_LABEL)
    }

    /// Parsed label set
    #[must_use]
    pub fn labels(&self) -> Labels {
        Labels::parse(&self.label)
    }

    /// Whether the label is empty (plain data output)
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.label.trim().is_empty()
    }
}

/// One progress update; `pos == None` closes the topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Progress topic (e.g. "files")
    pub topic: String,
    /// Current position, or `None` once the topic is finished
    pub pos: Option<i64>,
    /// Item currently being processed
    pub item: String,
    /// Unit of `pos` and `total`
    pub unit: String,
    /// Expected total, if known
    pub total: Option<i64>,
}

impl ProgressRecord {
    /// Record that closes `topic`
    pub fn closing(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            pos: None,
            item: String::new(),
            unit: String::new(),
            total: None,
        }
    }

    /// Whether this record closes its topic
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.pos.is_none()
    }
}
