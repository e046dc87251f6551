use clap::Parser;
use color_eyre::Result;
use ttysrv::{cli, config::Config, logging, server};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(cli.verbosity, cli.trace_dir.clone()).await;

    let config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    let config = cli.apply(config);

    #[cfg(unix)]
    let hangup = async {
        match signal(SignalKind::hangup()) {
            Ok(mut hangup) => {
                hangup.recv().await;
            }
            Err(e) => {
                debug!(?e, "No hangup signal handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup => {
            info!("Told to hang up, quitting")
        }
        logged = server::run(config) => {
            let logged = logged?;
            info!(%logged, "Source ended, quitting");
        }
    }

    Ok(())
}
