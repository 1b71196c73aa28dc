use clap::Parser;
use pmp_learning_optimizer::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Plan(args) => cli::plan::run(args).await,
        Command::Simulate(args) => cli::simulate::run(args).await,
    }
}
