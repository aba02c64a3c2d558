mod agent;
mod auth;
mod cli;
mod config;
mod embed_client;
mod embed_index;
mod fast_path;
mod graph;
mod llm;
mod memory_store;
mod router;
mod server;
mod task_client;
mod tool_args;
mod tool_defs;
mod tool_exec;
mod types;
mod util;

pub(crate) use agent::*;
pub(crate) use auth::*;
pub(crate) use cli::*;
pub(crate) use config::*;
pub(crate) use embed_client::*;
pub(crate) use embed_index::*;
pub(crate) use fast_path::*;
pub(crate) use graph::*;
pub(crate) use llm::*;
pub(crate) use memory_store::*;
pub(crate) use router::*;
pub(crate) use server::*;
pub(crate) use task_client::*;
pub(crate) use tool_args::*;
pub(crate) use tool_defs::*;
pub(crate) use tool_exec::*;
pub(crate) use types::*;
pub(crate) use util::*;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Serve { bind, port } => {
            let config = load_config();
            let memory = Arc::new(MemoryStore::open_or_create(Path::new(&config.db_path))?);
            let tasks: Arc<dyn TaskApi> = Arc::new(HttpTaskClient::new(&config));
            let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config));
            let index = Arc::new(SimilarityIndex::new(embedder));
            let model: Option<Arc<dyn ModelHook>> = match AnthropicModel::from_config(&config) {
                Some(model) => Some(Arc::new(model)),
                None => {
                    eprintln!("[main] no model configured; agent path will be unavailable");
                    None
                }
            };
            let harness = Arc::new(Harness {
                tasks,
                index,
                memory,
                model,
                relay: CredentialRelay::new(),
                config,
            });
            run_server(harness, &bind, port)
        }
        Command::Route { message } => {
            let config = load_config();
            let model = AnthropicModel::from_config(&config);
            let decision = classify(
                model.as_ref().map(|m| m as &dyn ModelHook),
                config.router_confidence,
                &message,
                &[],
            );
            println!(
                "path={} source={} confidence={:.2}",
                decision.path.as_str(),
                decision.source,
                decision.confidence
            );
            Ok(())
        }
        Command::History {
            user_id,
            session_id,
            limit,
        } => {
            let config = load_config();
            let memory = MemoryStore::open_or_create(Path::new(&config.db_path))?;
            let turns = memory.recent_turns(&user_id, &session_id, limit)?;
            if turns.is_empty() {
                println!("no turns stored for {user_id}/{session_id}");
            }
            for turn in turns {
                println!("[{}] {:>9}: {}", turn.seq, turn.role, turn.content);
            }
            Ok(())
        }
    }
}
