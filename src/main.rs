// Symex: Symbolic Execution Engine
//
// Command-line entry point. Reads a program file, explores one method and
// prints the concrete executions found.

use anyhow::Result;
use clap::Parser;

use symex_engine::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    run_command(cli)?;

    Ok(())
}

fn run_command(cli: Cli) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cli::cmds::run(args, &cli)?,
        Commands::Cfg(args) => cli::cmds::cfg(args, &cli)?,
        Commands::Methods(args) => cli::cmds::methods(args, &cli)?,
    }
    Ok(())
}
