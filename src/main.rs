use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use medlit::cli::{self, Cli};

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medlit=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let parsed = Cli::parse();
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling in-flight requests");
            signal_token.cancel();
        }
    });

    match cli::run(parsed, cancel).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            let envelope = err.to_envelope();
            if let Some(suggestion) = envelope.get("suggestion").and_then(|v| v.as_str()) {
                eprintln!("{suggestion}");
            }
            std::process::exit(2);
        }
    }
}
