use std::{path::PathBuf, time::Duration};

use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    config::LogConfig,
    error::Error,
    frame::Frame,
    hub::{HubHandle, Subscription},
};

/// How many frames may wait for the echo before they are skipped.
const ECHO_CAPACITY: usize = 1024;

/// How long the echo gets to catch up once the log is done.
const ECHO_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Writes the stream into a file, optionally echoing it.
///
/// Unlike the network consumers a failing log is not something we can live with,
/// so write errors are returned to whoever runs this.
///
/// The echo runs on its own and never holds back the file.
/// If it falls behind frames are skipped for the echo only,
/// and if it fails the echo is turned off.
pub struct LogSink<E = tokio::io::Stdout> {
    path: PathBuf,
    file: File,
    echo: Option<E>,
}

impl LogSink {
    /// Open (or create) the log file.
    /// The echo goes to stdout.
    pub async fn open(config: &LogConfig) -> Result<Self, Error> {
        let echo = config.echo.then(tokio::io::stdout);

        Self::open_with_echo(config, echo).await
    }
}

async fn echo_frames<E>(mut echo: E, mut frames: mpsc::Receiver<Frame>)
where
    E: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let result = async {
            echo.write_all(frame.as_bytes()).await?;
            echo.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(?e, "Echo failed, no longer echoing");
            return;
        }
    }
}

/// The log's side of the echo task.
struct Echo {
    frames: mpsc::Sender<Frame>,
    task: JoinHandle<()>,
    skipped: u64,
}

impl Echo {
    fn spawn<E>(echo: E) -> Self
    where
        E: AsyncWrite + Unpin + Send + 'static,
    {
        let (frames, rx) = mpsc::channel(ECHO_CAPACITY);
        let task = tokio::spawn(echo_frames(echo, rx).instrument(info_span!("echo")));

        Self {
            frames,
            task,
            skipped: 0,
        }
    }

    /// False once the echo has given up.
    fn send(&mut self, frame: Frame) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.skipped += 1;
                if self.skipped.is_power_of_two() {
                    warn!(skipped = self.skipped, "Echo is behind, skipping frames for it");
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    async fn finish(self) {
        drop(self.frames);

        let abort = self.task.abort_handle();
        if tokio::time::timeout(ECHO_DRAIN_TIMEOUT, self.task)
            .await
            .is_err()
        {
            warn!("Echo did not catch up, leaving it behind");
            abort.abort();
        }
    }
}

impl<E> LogSink<E>
where
    E: AsyncWrite + Unpin + Send + 'static,
{
    /// Open (or create) the log file, echoing into the given writer.
    pub async fn open_with_echo(config: &LogConfig, echo: Option<E>) -> Result<Self, Error> {
        let mut options = OpenOptions::new();
        options.create(true);

        if config.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let file = options
            .open(&config.path)
            .await
            .map_err(|e| Error::OpenLog(config.path.clone(), e))?;

        info!(path = ?config.path, append = config.append, echo = echo.is_some(), "Log file open");

        Ok(Self {
            path: config.path.clone(),
            file,
            echo,
        })
    }

    /// Log frames until the subscription closes.
    ///
    /// The subscription should never drop frames (see [`crate::hub::OverflowPolicy::Block`]),
    /// otherwise the log has holes.
    ///
    /// Returns how many bytes were logged.
    pub async fn run(mut self, hub: HubHandle, mut subscription: Subscription) -> Result<u64, Error> {
        let mut echo = self.echo.take().map(Echo::spawn);
        let mut written = 0u64;

        while let Some(frame) = subscription.recv().await {
            let result = async {
                self.file.write_all(frame.as_bytes()).await?;
                self.file.flush().await
            }
            .await;

            if let Err(e) = result {
                error!(?e, path = ?self.path, "Log write failed");
                hub.unsubscribe(&subscription);

                return Err(Error::LogWrite(self.path, e));
            }

            written += frame.len() as u64;

            if let Some(running) = &mut echo {
                if !running.send(frame) {
                    debug!("Echo has stopped");
                    echo = None;
                }
            }
        }

        debug!(%written, path = ?self.path, "Log subscription closed");

        if let Some(echo) = echo {
            echo.finish().await;
        }

        Ok(written)
    }
}
