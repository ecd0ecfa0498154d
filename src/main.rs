use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pagewatch::app::AppContext;
use pagewatch::cli::commands::{self, SettingsUpdate};
use pagewatch::cli::{Cli, Commands, DaemonAction};
use pagewatch::config::Config;
use pagewatch::daemon::{self, Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // These don't need a store
    if let Commands::Daemon { action } = &cli.command {
        match action {
            DaemonAction::Stop => {
                daemon::stop_daemon().map_err(anyhow::Error::msg)?;
                println!("Daemon stopped");
                return Ok(());
            }
            DaemonAction::Status => {
                println!("{}", daemon::daemon_status());
                return Ok(());
            }
            DaemonAction::Start { .. } => {}
        }
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(workers) = cli.workers {
        config.scheduler.workers = workers.max(1);
    }

    let ctx = AppContext::new(config, cli.db)?;

    match cli.command {
        Commands::Track {
            user,
            url,
            name,
            night_mode,
        } => {
            commands::track(&ctx, user, &url, name, night_mode).await?;
        }
        Commands::Untrack { user, url, purge } => {
            commands::untrack(&ctx, user, &url, purge)?;
        }
        Commands::List { user } => {
            commands::list(&ctx, user)?;
        }
        Commands::Resources { user, url } => {
            commands::resources(&ctx, user, &url)?;
        }
        Commands::NightMode { user, url, state } => {
            commands::set_night_mode(&ctx, user, &url, state.enabled())?;
        }
        Commands::Check => {
            commands::check(&ctx).await?;
        }
        Commands::Stats { user } => {
            commands::stats(&ctx, user)?;
        }
        Commands::Archives { user, url, limit } => {
            commands::archives(&ctx, user, &url, limit)?;
        }
        Commands::Sweep => {
            commands::sweep(&ctx)?;
        }
        Commands::Download { user, url } => {
            commands::download(&ctx, user, &url).await?;
        }
        Commands::Export {
            user,
            format,
            output,
        } => {
            commands::export(&ctx, user, &format, output.as_deref())?;
        }
        Commands::Settings {
            user,
            format,
            allow,
            deny,
            kind,
            keyword,
            max_size,
            clear,
        } => {
            let update = SettingsUpdate {
                format,
                allow,
                deny,
                kinds: kind,
                keywords: keyword,
                max_size,
                clear,
            };
            commands::settings(&ctx, user, update)?;
        }
        Commands::Daemon { action } => {
            if let DaemonAction::Start {
                interval,
                no_initial_check,
            } = action
            {
                let mut daemon_config = DaemonConfig::from(&ctx.config.scheduler);
                if let Some(interval) = interval {
                    daemon_config.interval_secs =
                        DaemonConfig::parse_interval(&interval).map_err(anyhow::Error::msg)?;
                }
                if no_initial_check {
                    daemon_config.check_on_start = false;
                }
                Daemon::new(&ctx, daemon_config).run().await?;
            }
        }
    }

    Ok(())
}
