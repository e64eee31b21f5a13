//! Prompt front-ends used by the interactive handlers

use std::io::{BufRead, Write};

use super::{PromptMode, PromptRequest};

/// Something that can ask the user for an answer
///
/// Returning `None` means the user cancelled the prompt.
pub trait Prompter: Send {
    /// Ask for an answer to `request`
    fn prompt(&mut self, request: &PromptRequest) -> Option<String>;
}

impl<F> Prompter for F
where
    F: FnMut(&PromptRequest) -> Option<String> + Send,
{
    fn prompt(&mut self, request: &PromptRequest) -> Option<String> {
        self(request)
    }
}

/// Terminal prompter reading answers from standard input
///
/// On a multi-threaded runtime the read moves the worker thread out of the
/// scheduler, so pipe readers, reapers and other tasks keep running while
/// the user types. Password prompts are read with terminal echo off.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&mut self, request: &PromptRequest) -> Option<String> {
        let mut stderr = std::io::stderr();
        if !request.text.is_empty() {
            let _ = write!(stderr, "{}", request.text);
            if !request.text.ends_with(' ') {
                let _ = write!(stderr, " ");
            }
        }
        let _ = stderr.flush();

        off_runtime(|| {
            let _echo = (request.mode == PromptMode::Password)
                .then(EchoOff::new)
                .flatten();
            read_answer(&mut std::io::stdin().lock(), &request.default)
        })
    }
}

/// One answer line; an empty line picks `default`, EOF cancels
fn read_answer(input: &mut impl BufRead, default: &str) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let answer = line.trim_end_matches(['\r', '\n']);
            if answer.is_empty() {
                Some(default.to_string())
            } else {
                Some(answer.to_string())
            }
        }
    }
}

/// Run blocking terminal I/O without starving the runtime
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Terminal echo switched off until dropped
#[cfg(unix)]
struct EchoOff {
    original: libc::termios,
}

#[cfg(unix)]
impl EchoOff {
    /// `None` if stdin is not a terminal
    fn new() -> Option<Self> {
        let fd = libc::STDIN_FILENO;
        // SAFETY: isatty(3) only inspects the descriptor
        if unsafe { libc::isatty(fd) } != 1 {
            return None;
        }
        // SAFETY: termios is plain data; tcgetattr fills it before use
        let mut term: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut term) } != 0 {
            log::debug!("tcgetattr failed: {}", std::io::Error::last_os_error());
            return None;
        }
        let original = term;
        term.c_lflag &= !libc::ECHO;
        // Still move to the next line on enter
        term.c_lflag |= libc::ECHONL;
        // SAFETY: `term` is a valid termios read from the same descriptor
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &term) } != 0 {
            log::debug!("tcsetattr failed: {}", std::io::Error::last_os_error());
            return None;
        }
        Some(Self { original })
    }
}

#[cfg(not(unix))]
struct EchoOff;

#[cfg(not(unix))]
impl EchoOff {
    fn new() -> Option<Self> {
        log::debug!("password prompt is read with echo on");
        None
    }
}

#[cfg(unix)]
impl Drop for EchoOff {
    fn drop(&mut self) {
        // SAFETY: restores the settings read in `new`
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.original);
        }
    }
}
