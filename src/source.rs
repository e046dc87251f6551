use std::path::Path;

use futures::{future, stream::BoxStream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::{error::Error, frame::Frame};

/// The serial port structure.
pub mod serial_port;

/// How many bytes a single read from the source may yield at most.
pub const DEFAULT_MAX_FRAME: usize = 64;

/// A source of frames.
///
/// Ends when the underlying device fails or closes.
/// Once ended it stays ended, there is no reconnecting.
pub type FrameSource = BoxStream<'static, Frame>;

/// Turn anything readable into a [`FrameSource`].
///
/// Each successful read becomes one frame of at most `max_frame` bytes.
/// A read error is logged and then ends the stream like an EOF would.
pub fn from_reader<R>(reader: R, max_frame: usize) -> FrameSource
where
    R: AsyncRead + Send + 'static,
{
    ReaderStream::with_capacity(reader, max_frame.max(1))
        .take_while(|read| {
            if let Err(e) = read {
                error!(?e, "Source read error, ending stream");
            }
            future::ready(read.is_ok())
        })
        .filter_map(|read| future::ready(read.ok().map(Frame::new)))
        .boxed()
}

/// Replay the contents of a file as if they came from a device.
pub async fn file<P: AsRef<Path>>(path: P, max_frame: usize) -> Result<FrameSource, Error> {
    let path = path.as_ref();
    debug!(?path, "Opening source file");

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::OpenSource(path.into(), e))?;

    info!(?path, "Replaying file as frame source");

    Ok(from_reader(file, max_frame))
}
