//! Line-oriented chat with the planning agent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use plan_agent::adapters::AdapterOracle;
use plan_agent::adapters::openai::{OpenAiAdapter, OpenAiConfig};
use plan_agent::config::AgentConfig;
use plan_agent::kernel::Agent;
use plan_agent::primitives::OwnerId;
use plan_agent::telemetry::init_tracing;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

const HISTORY_LIMIT: usize = 5;

#[derive(Debug, Parser)]
#[command(name = "plan-agent", version, about = "Ask questions; the agent plans and calls tools")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Owner on whose behalf questions are answered.
    #[arg(long, default_value_t = OwnerId::new(1))]
    owner: OwnerId,
    /// Label stored with chat records instead of the adapter's.
    #[arg(long)]
    model_label: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => AgentConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    init_tracing(&config.logging).context("failed to initialise logging")?;

    let adapter = OpenAiAdapter::new(OpenAiConfig::from_settings(&config.oracle)?)?;
    let oracle = Arc::new(AdapterOracle::new(Arc::new(adapter)));
    let mut builder = Agent::builder(oracle);
    if let Some(label) = &cli.model_label {
        builder = builder.model_label(label.clone());
    }
    let agent = builder
        .open(&config)
        .await
        .context("failed to start the agent")?;
    info!(owner = %cli.owner, model = agent.model_label(), "plan-agent ready");

    repl(&agent, cli.owner).await
}

async fn repl(agent: &Agent, owner: OwnerId) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    stdout.write_all(b"> ").await?;
    stdout.flush().await?;
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        let output = match question {
            "" => String::new(),
            ":quit" | ":exit" => break,
            ":tools" => list_tools(agent, owner).await?,
            ":history" => list_history(agent, owner).await?,
            _ => format!("{}\n", agent.respond(owner, question).await),
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn list_tools(agent: &Agent, owner: OwnerId) -> anyhow::Result<String> {
    let mut text = String::new();
    for tool in agent.tools(owner).await? {
        let parameters: Vec<&str> = tool.parameters().iter().map(|param| param.name()).collect();
        text.push_str(&format!(
            "{}({}): {}\n",
            tool.name(),
            parameters.join(", "),
            tool.description()
        ));
    }
    Ok(text)
}

async fn list_history(agent: &Agent, owner: OwnerId) -> anyhow::Result<String> {
    let stats = agent.statistics(owner).await?;
    let mut text = format!(
        "{} executions ({} succeeded, {} failed)\n",
        stats.total, stats.succeeded, stats.failed
    );
    for record in agent.execution_history(owner, HISTORY_LIMIT).await? {
        text.push_str(&format!(
            "{} {} [{}] {}ms: {}\n",
            record.start_time().format("%Y-%m-%d %H:%M:%S"),
            record.tool_name(),
            record.status().as_str(),
            record.elapsed_ms(),
            record.result()
        ));
    }
    Ok(text)
}
