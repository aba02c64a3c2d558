use clap::{Parser, Subcommand};

use crate::{DEFAULT_BIND, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "taskpilot", about = "Chat front end for a task store", version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the HTTP chat server
    Serve {
        #[arg(long, default_value = DEFAULT_BIND)]
        bind: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Show how a message would be routed, without executing it
    Route {
        message: String,
    },
    /// Print stored conversation turns for a session
    History {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        session_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}
