//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use hgcmd::error::{CommandError, Result};
use hgcmd::interaction::{CaptureBuffer, InteractionHandler, PromptMode};
use hgcmd::protocol::encode_block;
use hgcmd::transport::{ChildHandle, Invocation, Launcher};
use tokio::sync::{mpsc, oneshot};

pub const HELLO: &[u8] = b"capabilities: getencoding runcommand\nencoding: UTF-8\npid: 4242\n";

/// Init logging once per test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One server frame: channel byte plus length-prefixed payload
pub fn frame(channel: u8, payload: &[u8]) -> Bytes {
    let mut out = vec![channel];
    out.extend(encode_block(payload));
    Bytes::from(out)
}

/// An input request frame
pub fn input_request(channel: u8, size: u32) -> Bytes {
    let mut out = vec![channel];
    out.extend_from_slice(&size.to_be_bytes());
    Bytes::from(out)
}

/// A result frame carrying `code`
pub fn result_frame(code: i32) -> Bytes {
    frame(b'r', &code.to_be_bytes())
}

/// Child processes started by a [`FakeLauncher`]
#[derive(Default)]
pub struct FakeChildren {
    pub invocations: Vec<Invocation>,
    inputs: Vec<mpsc::UnboundedReceiver<Bytes>>,
    kills: Vec<oneshot::Receiver<()>>,
    pub fail: bool,
}

/// Launcher handing out in-memory children
///
/// Children have no pid, so interrupting one fires its kill channel.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    children: Arc<Mutex<FakeChildren>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following launch fail
    pub fn fail_launches(&self) {
        self.children.lock().unwrap().fail = true;
    }

    pub fn launch_count(&self) -> usize {
        self.children.lock().unwrap().invocations.len()
    }

    pub fn invocation(&self, index: usize) -> Invocation {
        self.children.lock().unwrap().invocations[index].clone()
    }

    /// Everything written to the stdin of child `index` so far
    pub fn written(&self, index: usize) -> Vec<u8> {
        let mut children = self.children.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(chunk) = children.inputs[index].try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Whether child `index` was interrupted or killed
    pub fn was_signalled(&self, index: usize) -> bool {
        let mut children = self.children.lock().unwrap();
        matches!(
            children.kills[index].try_recv(),
            Ok(()) | Err(oneshot::error::TryRecvError::Closed)
        )
    }

    /// Generation of child `index`
    pub fn generation(&self, index: usize) -> u64 {
        index as u64 + 1
    }
}

impl Launcher for FakeLauncher {
    fn launch(&mut self, invocation: &Invocation) -> Result<ChildHandle> {
        let mut children = self.children.lock().unwrap();
        if children.fail {
            return Err(CommandError::spawn(format!(
                "cannot start {}",
                invocation.program.display()
            )));
        }
        let generation = children.invocations.len() as u64 + 1;
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        children.invocations.push(invocation.clone());
        children.inputs.push(input_rx);
        children.kills.push(kill_rx);
        Ok(ChildHandle::new(generation, None, input_tx, Some(kill_tx)))
    }
}

/// Handler answering line input from a script and recording prompts
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    pub answers: Vec<Option<String>>,
    pub prompts: Vec<(String, PromptMode)>,
    pub offered: Vec<(String, String)>,
    sink: Option<CaptureBuffer>,
}

impl ScriptedHandler {
    pub fn answering(answers: &[Option<&str>]) -> Self {
        Self {
            answers: answers.iter().rev().map(|a| a.map(str::to_string)).collect(),
            ..Self::default()
        }
    }
}

impl InteractionHandler for ScriptedHandler {
    fn set_prompt(&mut self, text: &str, mode: PromptMode, _default: &str) {
        self.prompts.push((text.to_string(), mode));
    }

    fn get_line_input(&mut self) -> Option<String> {
        self.answers.pop().flatten()
    }

    fn set_data_output(&mut self, sink: Option<CaptureBuffer>) {
        self.sink = sink;
    }

    fn write_output(&mut self, text: &str, label: &str) -> Option<usize> {
        self.offered.push((text.to_string(), label.to_string()));
        match &self.sink {
            Some(sink) if label.is_empty() => Some(sink.write(text.as_bytes())),
            _ => None,
        }
    }
}
