//! Reference two-line agent for the conversation orchestrator.
//!
//! Connects to the orchestrator's RPC endpoint, joins one conversation, and
//! on every claimed turn replies with a fixed acknowledgement, closing the
//! conversation once the other participant has spoken `max_turns` times.
//!
//! Usage:
//!   echo-agent --url ws://localhost:8787/rpc --conversation c1 --agent-id B

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use orc_domain::event::{Finality, MessagePayloadInput};
use orc_domain::Result;
use orc_runtime::{Agent, AgentContext};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "ws://localhost:8787/rpc")]
    url: String,
    #[arg(long)]
    conversation: String,
    #[arg(long, default_value = "B")]
    agent_id: String,
    #[arg(long, default_value_t = 3)]
    max_turns: u32,
}

struct EchoAgent {
    turns_taken: AtomicU32,
    max_turns: u32,
}

#[async_trait]
impl Agent for EchoAgent {
    async fn handle_turn(&self, ctx: AgentContext) -> Result<()> {
        let turn = self.turns_taken.fetch_add(1, Ordering::SeqCst) + 1;
        let finality = if turn >= self.max_turns { Finality::Conversation } else { Finality::Turn };

        ctx.client
            .post_message(
                &ctx.conversation,
                &ctx.agent_id,
                MessagePayloadInput {
                    text: format!("ack #{turn}"),
                    ..Default::default()
                },
                finality,
                None,
            )
            .await?;

        tracing::info!(turn, "replied");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let client = orc_agent_sdk::AgentClientBuilder::new().url(args.url.clone()).build()?;
    let agent = Arc::new(EchoAgent { turns_taken: AtomicU32::new(0), max_turns: args.max_turns });

    orc_runtime::run_agent_loop(client, agent, args.conversation, args.agent_id, 30_000, None).await?;
    Ok(())
}
