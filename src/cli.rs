use clap::{Parser, Subcommand};

/// `mailbear` - bridge new Gmail messages into Bear notes.
#[derive(Parser, Debug)]
#[command(name = "mailbear")]
#[command(version)]
#[command(about = "Watch Gmail senders and turn new mail into Bear notes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bridge service in the foreground
    Run,

    /// Run a single poll cycle and exit
    Once,

    /// Store Gmail OAuth credentials for the service to use
    Auth {
        /// OAuth refresh token issued for the configured client
        #[arg(long)]
        refresh_token: String,

        /// Current access token, if one is at hand
        #[arg(long)]
        access_token: Option<String>,

        /// Access token lifetime in seconds, when known
        #[arg(long)]
        expires_in: Option<i64>,
    },

    /// Show service and ledger status
    Status,

    /// Forget every processed message id so all matching mail is re-bridged
    ResetState {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Pause a running service
    Pause,

    /// Resume a paused service
    Resume,

    /// Reload configuration in a running service
    Reload,

    /// Wake a sleeping service so it polls immediately
    Poke,
}
