//! Provided interaction handlers

use super::{
    CaptureBuffer, DataOutput, InteractionHandler, PromptMode, PromptRequest, Prompter,
};

/// Handler for non-interactive use
///
/// Every input request is answered with the default of the last prompt
/// (empty when none was shown).
#[derive(Debug, Default)]
pub struct NullInteraction {
    default: String,
    output: DataOutput,
}

impl NullInteraction {
    /// Create a null handler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InteractionHandler for NullInteraction {
    fn set_prompt(&mut self, _text: &str, _mode: PromptMode, default: &str) {
        self.default = default.to_string();
    }

    fn get_line_input(&mut self) -> Option<String> {
        Some(std::mem::take(&mut self.default))
    }

    fn set_data_output(&mut self, sink: Option<CaptureBuffer>) {
        self.output.set(sink);
    }

    fn write_output(&mut self, text: &str, label: &str) -> Option<usize> {
        self.output.write(text, label)
    }
}

/// Handler forwarding every prompt to a [`Prompter`]
pub struct InteractiveHandler<P> {
    prompter: P,
    pending: PromptRequest,
    output: DataOutput,
}

impl<P: Prompter> InteractiveHandler<P> {
    /// Wrap a prompter
    pub fn new(prompter: P) -> Self {
        Self {
            prompter,
            pending: PromptRequest::default(),
            output: DataOutput::default(),
        }
    }
}

impl<P: Prompter> InteractionHandler for InteractiveHandler<P> {
    fn set_prompt(&mut self, text: &str, mode: PromptMode, default: &str) {
        self.pending = PromptRequest {
            text: text.to_string(),
            mode,
            default: default.to_string(),
        };
    }

    fn get_line_input(&mut self) -> Option<String> {
        let mut request = std::mem::take(&mut self.pending);
        // Raw line requests without a preceding prompt are free text
        if request.mode == PromptMode::None {
            request.mode = PromptMode::Text;
        }
        self.prompter.prompt(&request)
    }

    fn set_data_output(&mut self, sink: Option<CaptureBuffer>) {
        self.output.set(sink);
    }

    fn write_output(&mut self, text: &str, label: &str) -> Option<usize> {
        self.output.write(text, label)
    }
}

/// Handler that only asks for passwords
///
/// Text and choice prompts are answered with their default so that
/// background commands never stop for confirmation, while authentication
/// still reaches the user.
pub struct PasswordOnlyHandler<P> {
    inner: InteractiveHandler<P>,
}

impl<P: Prompter> PasswordOnlyHandler<P> {
    /// Wrap a prompter
    pub fn new(prompter: P) -> Self {
        Self {
            inner: InteractiveHandler::new(prompter),
        }
    }
}

impl<P: Prompter> InteractionHandler for PasswordOnlyHandler<P> {
    fn set_prompt(&mut self, text: &str, mode: PromptMode, default: &str) {
        self.inner.set_prompt(text, mode, default);
    }

    fn get_line_input(&mut self) -> Option<String> {
        if self.inner.pending.mode == PromptMode::Password {
            self.inner.get_line_input()
        } else {
            Some(std::mem::take(&mut self.inner.pending).default)
        }
    }

    fn set_data_output(&mut self, sink: Option<CaptureBuffer>) {
        self.inner.set_data_output(sink);
    }

    fn write_output(&mut self, text: &str, label: &str) -> Option<usize> {
        self.inner.write_output(text, label)
    }
}
