use clap::Parser;
use eyre::Result;
use neuron_sync_worker::WorkerArgs;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = WorkerArgs::parse();
    neuron_sync_worker::serve(args, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;

    // stdin reads block a runtime thread; exit instead of waiting for them on shutdown
    std::process::exit(0);
}
