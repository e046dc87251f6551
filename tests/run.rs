use std::time::Duration;

use color_eyre::Result;
use pretty_assertions::assert_eq;
use tokio::time::timeout;
use tracing::Level;
use ttysrv::{
    config::{Config, LogConfig, Source},
    error::Error,
    server,
};

fn config_for(dir: &tempfile::TempDir, source: Source) -> Config {
    Config {
        source,
        log: LogConfig {
            path: dir.path().join("ttysrv.log"),
            append: false,
            echo: false,
        },
        port: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn replayed_file_ends_up_in_log() -> Result<()> {
    ttysrv::logging::init(Level::DEBUG, None).await;

    let dir = tempfile::tempdir()?;
    let capture = dir.path().join("capture.txt");
    let text = lipsum::lipsum(500);
    std::fs::write(&capture, &text)?;

    let config = config_for(&dir, Source::File(capture));
    let log_path = config.log.path.clone();

    let logged = timeout(Duration::from_secs(10), server::run(config)).await??;

    assert_eq!(logged, text.len() as u64);
    assert_eq!(std::fs::read_to_string(log_path)?, text);

    Ok(())
}

#[tokio::test]
async fn missing_device_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(
        &dir,
        Source::Serial {
            device: "/dev/ttyDoesNotExist1234".into(),
            baud: 115_200,
        },
    );

    let result = server::run(config).await;

    assert!(matches!(result, Err(Error::OpenDevice { .. })));

    Ok(())
}

#[tokio::test]
async fn bad_log_path_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let capture = dir.path().join("capture.txt");
    std::fs::write(&capture, "data")?;

    let mut config = config_for(&dir, Source::File(capture));
    config.log.path = dir.path().join("missing/dir/ttysrv.log");

    let result = server::run(config).await;

    assert!(matches!(result, Err(Error::OpenLog(..))));

    Ok(())
}

#[tokio::test]
async fn invalid_config_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config_for(&dir, Source::File(dir.path().join("whatever")));
    config.hub.capacity = 0;

    let result = server::run(config).await;

    assert!(matches!(result, Err(Error::BadConfig(_))));

    Ok(())
}
