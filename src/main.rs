use clap::Parser;
use ragserve::app::RagApp;
use ragserve::cli::CacheCommands;
use ragserve::cli::Cli;
use ragserve::cli::Commands;
use ragserve::cli::{self};
use ragserve::config::AppConfig;
use ragserve::logging;
use ragserve::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.config.as_deref())?;

    // The server logs to file as well; one-shot commands stay quiet on stderr
    if matches!(cli.command, Commands::Serve { .. }) {
        logging::init_logging_with_config(Some(&config.logging), cli.verbose.then_some("debug"))?;
    } else if cli.verbose {
        logging::init_simple_logging(tracing::Level::DEBUG)?;
    } else {
        logging::init_simple_logging(tracing::Level::WARN)?;
    }
    info!("Configuration loaded");

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_cors,
        } => cli::handle_serve(config, host, port, no_cors).await,
        Commands::Config => cli::handle_config(&config),
        command => {
            let app = RagApp::from_config(config).await?;
            run_command(&app, command).await
        }
    }
}

async fn run_command(app: &RagApp, command: Commands) -> Result<()> {
    match command {
        Commands::Ask {
            question,
            workspace,
            k,
            model,
            temperature,
            max_tokens,
            stream,
            no_cache,
            no_rerank,
            json,
        } => {
            let args = cli::AskArgs {
                workspace,
                k,
                model,
                temperature,
                max_tokens,
                stream,
                no_cache,
                no_rerank,
                json,
            };
            cli::handle_ask(app, question, args).await
        }
        Commands::Search { query, k, method } => cli::handle_search(app, query, k, method).await,
        Commands::Reload => cli::handle_reload(app).await,
        Commands::Cache(CacheCommands::Stats { workspace }) => {
            cli::handle_cache_stats(app, workspace).await
        }
        Commands::Cache(CacheCommands::Invalidate { workspace, query }) => {
            cli::handle_cache_invalidate(app, workspace, query).await
        }
        Commands::Health => cli::handle_health(app).await,
        Commands::Serve { .. } | Commands::Config => Ok(()),
    }
}
