use clap::Parser;
use clap::Subcommand;
use nospace_app_server::ServeArgs;
use nospace_cli::CompileArgs;
use nospace_cli::RunArgs;
use nospace_cli::compile_program;
use nospace_cli::run_program;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Run, compile and serve nospace programs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the WebSocket server.
    Serve(ServeArgs),
    /// Run a program and exit with its exit code.
    Run(RunArgs),
    /// Compile a program with the built-in toolchain.
    Compile(CompileArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = match cli.command {
        Command::Serve(_) => "info",
        Command::Run(_) | Command::Compile(_) => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Command::Serve(args) => {
            nospace_app_server::run_main(args).await?;
            0
        }
        Command::Run(args) => run_program(args).await?,
        Command::Compile(args) => compile_program(args).await?,
    };
    std::process::exit(exit_code);
}
