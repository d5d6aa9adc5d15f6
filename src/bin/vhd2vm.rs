use clap::Parser;
use vhd2vm::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vhd2vm::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init(args) => commands::execute_init(args)?,
        Commands::Create(args) => commands::execute_create(args).await?,
        Commands::Plan(args) => commands::execute_plan(args)?,
        Commands::Rollback(args) => commands::execute_rollback(args).await?,
    }

    Ok(())
}
