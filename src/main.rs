//! `hgcmd`: run Mercurial commands through a command agent
//!
//! ```text
//! hgcmd [-R DIR] [--process] [--config SECTION.NAME=VALUE]... [--json] CMD ARGS... [then CMD ARGS...]
//! ```
//!
//! Commands separated by `then` run as one session and stop at the first
//! failure. Prompts are answered on the terminal.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use hgcmd::interaction::StdinPrompter;
use hgcmd::{
    AgentEvent, AgentOptions, CommandAgent, CommandLine, ConfigOverride, Interaction, WorkerKind,
};
use hgcmd::types::Labels;

/// Separator between the commands of a sequence
const SEQUENCE_SEPARATOR: &str = "then";

/// Run Mercurial commands through a command agent
#[derive(Parser, Debug)]
#[command(name = "hgcmd", version, about)]
struct Cli {
    /// Repository root to run in
    #[arg(short = 'R', long = "repository")]
    repository: Option<PathBuf>,

    /// Spawn one process per command instead of a command server
    #[arg(long)]
    process: bool,

    /// Configuration override forwarded to every command
    #[arg(long = "config", value_name = "SECTION.NAME=VALUE")]
    config: Vec<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Mercurial executable (defaults to `hg` on PATH)
    #[arg(long)]
    hg: Option<PathBuf>,

    /// Commands and arguments, separated by `then`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

/// Split `pull then update -C` into `[pull] [update -C]`
fn split_sequence(words: &[String]) -> Vec<CommandLine> {
    words
        .split(|w| w == SEQUENCE_SEPARATOR)
        .map(|part| part.iter().filter(|w| *w != "--").cloned().collect::<Vec<_>>())
        .filter(|part| !part.is_empty())
        .map(CommandLine::from)
        .collect()
}

fn build_options(cli: &Cli) -> Result<AgentOptions> {
    let mut builder = AgentOptions::builder().worker_kind(if cli.process {
        WorkerKind::Process
    } else {
        WorkerKind::Server
    });
    if let Some(repo) = &cli.repository {
        builder = builder.cwd(repo);
    }
    if let Some(hg) = &cli.hg {
        builder = builder.executable(hg);
    }
    for entry in &cli.config {
        let entry = ConfigOverride::parse(entry).with_context(|| format!("bad --config {entry}"))?;
        builder = builder.config_override(entry);
    }
    Ok(builder.build())
}

fn print_event(event: &AgentEvent, json: bool) -> Result<()> {
    if json {
        let value = match event {
            AgentEvent::OutputReceived { text, label } => {
                serde_json::json!({ "type": "output", "label": label, "text": text })
            }
            AgentEvent::ProgressReceived(progress) => {
                serde_json::json!({ "type": "progress", "progress": progress })
            }
            AgentEvent::CommandFinished(session) => serde_json::json!({
                "type": "finished",
                "session": session.id(),
                "exit_code": session.exit_code(),
                "aborted": session.is_aborted(),
            }),
            AgentEvent::ServiceStateChanged(state) => {
                serde_json::json!({ "type": "service", "state": state })
            }
            AgentEvent::ControlMessage(_)
            | AgentEvent::ServiceStopped
            | AgentEvent::BusyChanged(_) => return Ok(()),
        };
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    match event {
        AgentEvent::OutputReceived { text, label } => {
            let labels = Labels::parse(label);
            if labels.intersects(Labels::ERROR | Labels::WARNING | Labels::CONTROL) {
                eprint!("{text}");
            } else {
                print!("{text}");
                std::io::stdout().flush()?;
            }
        }
        AgentEvent::ProgressReceived(progress) => log::debug!("progress: {progress:?}"),
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let cmdlines = split_sequence(&cli.command);
    anyhow::ensure!(!cmdlines.is_empty(), "no command given");

    let agent = CommandAgent::new(build_options(&cli)?)?;
    let mut events = agent.subscribe();
    let session =
        agent.run_command_sequence(cmdlines, Interaction::prompter(StdinPrompter));

    while let Some(event) = events.recv().await {
        print_event(&event, cli.json)?;
        if matches!(&event, AgentEvent::CommandFinished(finished) if *finished == session) {
            break;
        }
    }

    agent.shutdown().await;

    let code = session.exit_code();
    if code != 0 && !cli.json {
        let error = session.error_string();
        if !error.is_empty() {
            log::info!("{error}");
        }
    }
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(255)))
}
