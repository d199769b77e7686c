//! seeshell CLI
//!
//! Lists the sessions a relay is carrying and attaches to one from a terminal.

mod sessions;
mod watch;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "seeshell-cli", version, about = "Inspect and watch seeshell sessions")]
struct Cli {
    /// Base URL of the seeshell HTTP listener
    #[arg(long, env = "SEESHELL_URL", default_value = "http://localhost:8080", global = true)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List live sessions and attached viewers
    Sessions {
        /// Secret listing path configured on the server
        #[arg(long, env = "SEESHELL_SECRET_PATH")]
        secret_path: String,
    },
    /// Stream a session's output to stdout
    Watch {
        /// Session key (the TCP source's ip:port)
        key: String,
        /// Forward stdin to the session and receive local echo
        #[arg(short, long)]
        interactive: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sessions { secret_path } => sessions::run(&cli.url, &secret_path).await,
        Commands::Watch { key, interactive } => watch::run(&cli.url, &key, interactive).await,
    }
}
