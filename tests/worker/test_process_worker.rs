//! End-to-end test of both workers behind a real agent
//!
//! A shell script stands in for the executable. Everything runs in one test
//! so no other thread forks while the script is still open for writing.
#![cfg(unix)]

#[path = "../common/mod.rs"]
mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use hgcmd::{
    AgentEvent, AgentOptions, CommandAgent, CommandLine, CommandSession, Interaction,
    ServiceState, WorkerKind,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

const SCRIPT: &str = r#"#!/bin/sh
while [ "$1" = "--config" ]; do shift 2; done
case "$1" in
  status) printf 'M a.txt\n' ;;
  fail) printf 'abort: nope\n' >&2; exit 1 ;;
  warn) printf '\001ui.warning\002careful\n\003'; printf 'done\n' ;;
  env) printf '%s\n' "$HGPLAINEXCEPT" ;;
  cat) printf 'a\nb\n' ;;
  sleep) exec sleep 30 ;;
  detach) sleep 5 & printf 'hi\n' ;;
  serve) trap '' INT; exec sleep 30 ;;
  *) printf 'hg: unknown command %s\n' "$1" >&2; exit 255 ;;
esac
"#;

fn write_script(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("hg");
    std::fs::write(&path, SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn wait(session: &CommandSession) {
    timeout(Duration::from_secs(10), session.wait())
        .await
        .expect("session did not finish");
}

fn drain(events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn output_texts(events: &[AgentEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::OutputReceived { text, label } if label != "control" => {
                Some((text.clone(), label.clone()))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn process_worker_end_to_end() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());

    let options = AgentOptions::builder()
        .executable(&script)
        .cwd(dir.path())
        .worker_kind(WorkerKind::Process)
        .build();
    let agent = CommandAgent::new(options).unwrap();
    assert_eq!(agent.service_state(), ServiceState::NoService);
    assert!(!agent.is_service_running());
    let mut events = agent.subscribe();

    // Plain output and a zero exit
    let status = agent.run_command(["status"]);
    wait(&status).await;
    assert_eq!(status.exit_code(), 0);
    assert_eq!(status.error_string(), "");
    let seen = drain(&mut events);
    assert_eq!(output_texts(&seen), vec![("M a.txt\n".to_string(), String::new())]);

    // Stderr counts as error output and stops the sequence
    let sequence = agent.run_command_sequence(
        vec![CommandLine::from(["fail"]), CommandLine::from(["status"])],
        Interaction::None,
    );
    wait(&sequence).await;
    assert_eq!(sequence.exit_code(), 1);
    assert_eq!(sequence.error_string(), "abort: nope");
    let seen = drain(&mut events);
    assert!(!seen.contains(&AgentEvent::ControlMessage("% hg status".into())));

    // Labelled records
    let warn = agent.run_command(["warn"]);
    wait(&warn).await;
    assert_eq!(warn.warning_string(), "careful");
    let seen = drain(&mut events);
    assert_eq!(
        output_texts(&seen),
        vec![
            ("careful\n".to_string(), "ui.warning".to_string()),
            ("done\n".to_string(), String::new()),
        ]
    );

    // Child environment
    let env = agent.run_command(["env"]);
    env.set_capture_output(true).unwrap();
    wait(&env).await;
    assert_eq!(env.read_line(), b"alias,i18n,revsetalias\n".to_vec());

    // Capture
    let cat = agent.run_command(["cat"]);
    cat.set_capture_output(true).unwrap();
    wait(&cat).await;
    assert!(cat.can_read_line());
    assert_eq!(cat.bytes_available(), 4);
    assert_eq!(cat.read_all(), b"a\nb\n".to_vec());
    let seen = drain(&mut events);
    assert!(output_texts(&seen).is_empty());

    // Interrupting a running command
    let sleep = agent.run_command(["sleep"]);
    loop {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        if event == AgentEvent::ControlMessage("% hg sleep".into()) {
            break;
        }
    }
    sleep.abort();
    wait(&sleep).await;
    assert!(sleep.is_aborted());
    assert_ne!(sleep.exit_code(), 0);

    // A background process keeping stdout open does not hold the result
    let started = Instant::now();
    let detach = agent.run_command(["detach"]);
    wait(&detach).await;
    assert_eq!(detach.exit_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());

    agent.shutdown().await;
    assert!(!agent.is_busy());

    // A command server that never says hello and ignores the interrupt
    let options = AgentOptions::builder()
        .executable(&script)
        .cwd(dir.path())
        .worker_kind(WorkerKind::Server)
        .read_timeout(Duration::from_millis(200))
        .build();
    let agent = CommandAgent::new(options).unwrap();
    let status = agent.run_command(["status"]);
    wait(&status).await;
    assert_eq!(status.exit_code(), -1);
    assert!(status.error_string().contains("no hello"), "{}", status.error_string());
    assert_eq!(agent.service_state(), ServiceState::NotRunning);
    agent.shutdown().await;
}
