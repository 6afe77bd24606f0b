use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "garden-presence.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Host the presence document store
    Serve {
        /// Listening Websocket address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        address: String,
    },
    /// Enter a shared space with a friend
    Join {
        /// Presence server to connect to
        #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
        server: String,
        /// Your participant id
        #[arg(long)]
        me: String,
        /// Your friend's participant id
        #[arg(long)]
        friend: String,
        /// Name shown while waiting for the friend
        #[arg(long)]
        friend_name: Option<String>,
        #[arg(long, default_value = "#A1C181")]
        my_color: String,
        #[arg(long, default_value = "#FFCBA4")]
        friend_color: String,
    },
}
