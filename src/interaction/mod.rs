//! Interaction handlers answering input requests from a running command
//!
//! A worker calls into the [`InteractionHandler`] bound to the current
//! command when the remote process shows a prompt (`set_prompt`), needs a
//! line of input (`get_line_input`) or produces plain data output that the
//! session may want to capture (`write_output`).
//!
//! Three handlers are provided:
//! - [`NullInteraction`]: answers every prompt with its default
//! - [`InteractiveHandler`]: forwards every prompt to a [`Prompter`]
//! - [`PasswordOnlyHandler`]: forwards password prompts only
//!
//! # Example
//!
//! ```
//! use hgcmd::interaction::{InteractionHandler, InteractiveHandler, PromptMode, PromptRequest};
//!
//! let mut handler = InteractiveHandler::new(|req: &PromptRequest| {
//!     (req.mode == PromptMode::Choice).then(|| "y".to_string())
//! });
//! handler.set_prompt("apply change? [Yn]", PromptMode::Choice, "y");
//! assert_eq!(handler.get_line_input().as_deref(), Some("y"));
//! ```

mod capture;
mod handlers;
mod prompter;

pub use capture::CaptureBuffer;
pub use handlers::{InteractiveHandler, NullInteraction, PasswordOnlyHandler};
pub use prompter::{Prompter, StdinPrompter};

use crate::types::Labels;

/// Kind of input a prompt expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PromptMode {
    /// No prompt is pending
    #[default]
    None,
    /// Free text
    Text,
    /// Password (do not echo)
    Password,
    /// One of a fixed set of choices
    Choice,
}

impl PromptMode {
    /// Select the mode from the label set of a `ui.prompt` record
    #[must_use]
    pub fn from_labels(labels: Labels) -> Self {
        if labels.contains(Labels::GETPASS) {
            Self::Password
        } else if labels.contains(Labels::PROMPT_CHOICE) {
            Self::Choice
        } else {
            Self::Text
        }
    }
}

/// A pending prompt as shown to a [`Prompter`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptRequest {
    /// Prompt text
    pub text: String,
    /// Expected input kind
    pub mode: PromptMode,
    /// Answer used when the user gives none
    pub default: String,
}

/// Callback capability invoked by workers for interactive input
pub trait InteractionHandler: Send {
    /// Remember the prompt shown by the remote process
    fn set_prompt(&mut self, text: &str, mode: PromptMode, default: &str);

    /// Produce one line of input; `None` aborts the input request
    fn get_line_input(&mut self) -> Option<String>;

    /// Attach or detach the sink for captured data output
    fn set_data_output(&mut self, sink: Option<CaptureBuffer>);

    /// Offer an output record; returns the number of bytes consumed, or
    /// `None` if the caller should emit it as a normal output event
    fn write_output(&mut self, text: &str, label: &str) -> Option<usize>;
}

/// Data-output plumbing shared by the provided handlers
#[derive(Debug, Default)]
pub(crate) struct DataOutput {
    sink: Option<CaptureBuffer>,
}

impl DataOutput {
    pub(crate) fn set(&mut self, sink: Option<CaptureBuffer>) {
        self.sink = sink;
    }

    /// Only unlabeled data is captured; labelled output stays visible
    pub(crate) fn write(&self, text: &str, label: &str) -> Option<usize> {
        match &self.sink {
            Some(sink) if label.trim().is_empty() => Some(sink.write(text.as_bytes())),
            _ => None,
        }
    }
}

