//! workbench - headless driver.
//!
//! Runs one task against `WORKSPACE_PATH`: progress goes to stderr, command approvals are
//! read from stdin, the final answer is printed to stdout.
//!
//! Other modes:
//! - `workbench --list-models` prints the models installed on the local Ollama server
//! - `workbench --graph` prints the workspace import graph as JSON

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workbench::agents::{self, ProgressEvent};
use workbench::graph::CodeGraph;
use workbench::llm::{HttpBackend, ProviderConfig};
use workbench::tools::{ApprovalGate, StderrTerminal, TerminalSink};
use workbench::{Agent, AgentSession, Config, Workspace};

/// Ask on the controlling terminal; anything but `y`/`yes` denies.
fn ask_approval(summary: &str) -> bool {
    eprint!("[approval] {} [y/N] ", summary);
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn print_event(event: &ProgressEvent) {
    let iteration = event
        .iteration
        .map(|i| format!("#{} ", i))
        .unwrap_or_default();
    eprintln!(
        "[{}{}] {:?}: {}",
        iteration, event.tool, event.status, event.summary
    );
}

async fn list_models() -> anyhow::Result<()> {
    let config = ProviderConfig {
        base_url: std::env::var("OLLAMA_URL").ok(),
        ..Default::default()
    };
    let models = HttpBackend::new()
        .list_local_models(&config)
        .await
        .context("listing Ollama models")?;
    if models.is_empty() {
        eprintln!("No local models installed.");
    }
    for model in models {
        println!("{}", model);
    }
    Ok(())
}

async fn print_graph(config: &Config) -> anyhow::Result<()> {
    let graph = CodeGraph::build(config.workspace_path.clone()).await;
    let json = serde_json::to_string_pretty(&graph.summary()).context("rendering graph")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workbench=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--list-models") {
        return list_models().await;
    }

    let config = Config::from_env()?;
    if args.first().map(String::as_str) == Some("--graph") {
        return print_graph(&config).await;
    }

    let task = args.join(" ");
    if task.trim().is_empty() {
        anyhow::bail!("usage: workbench \"<task>\" | --graph | --list-models");
    }

    info!(
        "Loaded configuration: provider={}, workspace={}",
        config.provider.as_str(),
        config.workspace_path.display()
    );

    let workspace = Workspace::open(config.workspace_path.clone(), &config.index)
        .await
        .context("opening workspace")?;
    let workspace = Arc::new(workspace);

    let approvals = Arc::new(ApprovalGate::new());
    let (events, rx) = agents::events::channel();
    let terminal: Arc<dyn TerminalSink> = Arc::new(StderrTerminal);

    let presenter = tokio::spawn(agents::run_presenter(
        rx,
        Arc::clone(&approvals),
        print_event,
        |command| async move {
            let summary = format!("Execute: {}", command);
            tokio::task::spawn_blocking(move || ask_approval(&summary))
                .await
                .unwrap_or(false)
        },
    ));

    let agent = Agent::new(
        Arc::new(HttpBackend::new()),
        config,
        Arc::clone(&workspace),
        approvals,
        events,
        Some(terminal),
    );

    let mut session = AgentSession::new();
    let outcome = agent.run_task(&mut session, &task, None).await?;
    if !outcome.completed {
        eprintln!(
            "[agent] stopped after {} iterations without a final answer",
            outcome.iterations
        );
    }
    println!("{}", outcome.answer);

    workspace.stop_watching().await;
    drop(agent);
    presenter.abort();
    Ok(())
}
