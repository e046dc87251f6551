use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

/// The name prefix of the files written when logging diagnostics to a directory.
pub const DIAGNOSTICS_FILE_PREFIX: &str = "ttysrv-diagnostics.log";

fn do_init(level: Level, file_logging: Option<PathBuf>) {
    let mut message = String::from("Logging with:");

    // stdout carries the echoed stream, so diagnostics go to stderr.
    message += " stderr";

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let maybe_file_layer = if let Some(output_dir) = file_logging {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, output_dir, DIAGNOSTICS_FILE_PREFIX);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        Some(file_layer)
    } else {
        None
    };

    registry.with(maybe_file_layer).init();

    debug!(message);
}

/// Initialize tracing.
///
/// `RUST_LOG` takes precedence over the given level for stderr.
/// If a directory is given, diagnostics are also written to a daily rotated file there.
///
/// Will only initialize once, so tests may call this.
pub async fn init(level: Level, file_logging: Option<PathBuf>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        do_init(level, file_logging);

        *initialized = true;
    }

    info!("Logging initialized");
}
