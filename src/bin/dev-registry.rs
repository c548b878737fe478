use clap::Parser;
use dev_registry::cli::{commands, Cli, Commands};
use dev_registry::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let registry = cli.registry.as_deref();
    match cli.command {
        Commands::List(args) => commands::execute_list(registry, args).await?,
        Commands::Resolve(args) => commands::execute_resolve(registry, args).await?,
        Commands::Fetch(args) => commands::execute_fetch(registry, args).await?,
        Commands::Tail(args) => commands::execute_tail(registry, args).await?,
        Commands::Serve(args) => commands::execute_serve(registry, args).await?,
    }

    Ok(())
}
