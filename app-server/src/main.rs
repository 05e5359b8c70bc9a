use clap::Parser;
use nospace_app_server::ServeArgs;
use nospace_app_server::run_main;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "WebSocket server for running nospace programs")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run_main(cli.serve).await
}
