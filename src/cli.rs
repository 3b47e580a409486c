use clap::{Parser, Subcommand};

/// maskgate: PII masking API with credential-gated access
#[derive(Parser)]
#[command(name = "maskgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind (defaults to MASKGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage API keys directly in the store
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Issue a new API key
    Issue {
        /// Plan tier: free, pro or ultra
        #[arg(long, default_value = "free")]
        plan: String,
    },
    /// Revoke an API key
    Revoke { key: String },
    /// Show an API key's metadata, usage and TTL
    Describe { key: String },
}
