use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{
    error::Error,
    hub::{HubHandle, Subscription},
};

/// The consumer writing the stream to a log file.
pub mod log_file;

/// Write every frame of a subscription into `writer`, as it arrives.
///
/// Returns how many bytes were written once the subscription closes.
/// If a write fails the subscription is unsubscribed and the error returned,
/// nothing else is affected.
pub async fn forward<W>(
    hub: &HubHandle,
    mut subscription: Subscription,
    mut writer: W,
) -> Result<u64, Error>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    while let Some(frame) = subscription.recv().await {
        trace!(%frame, "Forwarding");

        let result = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            debug!(?e, subscription = %subscription.id(), "Write failed, unsubscribing");
            hub.unsubscribe(&subscription);

            return Err(Error::Write(e));
        }

        written += frame.len() as u64;
    }

    debug!(%written, "Subscription closed");

    Ok(written)
}
