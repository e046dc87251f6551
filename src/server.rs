use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedReadHalf, TcpListener, TcpStream},
    sync::oneshot,
    task::JoinSet,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::{Config, Source},
    error::Error,
    hub::{HubHandle, OverflowPolicy},
    sink::{self, log_file::LogSink},
    source::{self, serial_port::SerialPortBuilder},
};

/// How long to wait before accepting again after accepting a client failed.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long clients get to receive what is buffered for them once the stream has ended.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Completes when the client hangs up.
/// Clients are not expected to send anything, what they do send is ignored.
async fn hangup(mut reader: OwnedReadHalf) {
    let mut buf = [0u8; 256];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => debug!("Ignoring {n} byte(s) from client"),
            Err(e) => {
                debug!(?e, "Client read error");
                return;
            }
        }
    }
}

async fn handle_client(hub: HubHandle, stream: TcpStream) {
    let subscription = match hub.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            info!(%e, "Not serving client");
            let mut stream = stream;
            let _ = stream.shutdown().await;
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(?e, "Could not disable Nagle's algorithm");
    }

    info!(subscription = %subscription.id(), "Client connected");

    let (reader, writer) = stream.into_split();

    tokio::select! {
        forwarded = sink::forward(&hub, subscription, writer) => match forwarded {
            Ok(written) => info!(%written, "Stream ended, closing client"),
            Err(e) => info!(%e, "Client write failed, closing client"),
        },
        _ = hangup(reader) => info!("Client hung up"),
    }
}

/// Accept clients on the listener, giving each a live copy of the stream.
///
/// Returns when the hub stops and the clients have been sent what was left for them,
/// or after a few seconds if some client is too slow for that.
/// Dropping the future disconnects every client.
pub async fn serve(listener: TcpListener, hub: HubHandle) {
    let mut clients = JoinSet::new();

    loop {
        // Reap the clients which are done.
        while clients.try_join_next().is_some() {}

        tokio::select! {
            _ = hub.stopped() => {
                info!(clients = clients.len(), "Hub stopped, no longer accepting clients");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    clients.spawn(
                        handle_client(hub.clone(), stream).instrument(info_span!("client", %addr)),
                    );
                }
                Err(e) => {
                    // Only this client is affected, so keep going.
                    warn!(?e, "Could not accept client");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    let drained = tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while clients.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(clients = clients.len(), "Clients did not drain in time, disconnecting them");
    }
}

async fn bind(port: u16) -> Result<TcpListener, Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Bind(port, e))
}

async fn run_listener(
    hub: HubHandle,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    let requested = port.unwrap_or(0);
    let listener = bind(requested).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Bind(requested, e))?;

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            debug!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    serve(listener, hub).await;

    Ok(())
}

/// Serve clients of the hub on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(hub: HubHandle, allocated_port: oneshot::Sender<u16>) -> Result<(), Error> {
    run_listener(hub, None, Some(allocated_port)).await
}

/// Serve clients of the hub on the given port.
pub async fn run_on_port(hub: HubHandle, port: u16) -> Result<(), Error> {
    run_listener(hub, Some(port), None).await
}

/// Run everything the configuration asks for.
///
/// Opens the source, the log and the listener, in that order.
/// Any of those failing is an error.
/// Afterwards runs until the source ends, everything has been logged
/// and connected clients have been sent the rest of the stream,
/// or until writing the log fails.
///
/// Returns the number of bytes logged.
pub async fn run(config: Config) -> Result<u64, Error> {
    config.validate()?;

    let source = match &config.source {
        Source::Serial { device, baud } => SerialPortBuilder::new(device)
            .set_baud(*baud)
            .set_max_frame(config.max_frame)
            .build()?,
        Source::File(path) => source::file(path, config.max_frame).await?,
    };

    let log = LogSink::open(&config.log).await?;

    let listener = bind(config.port).await?;
    if let Ok(addr) = listener.local_addr() {
        info!("listening on {}", addr);
    }

    // The log subscribes before anything is read, so it sees the whole stream.
    // It never skips frames: the hub waits for it whatever the clients' policy is.
    let (hub, log_subscription) =
        HubHandle::new_subscribed(source, config.hub, OverflowPolicy::Block);

    let server = tokio::spawn(serve(listener, hub.clone()).instrument(info_span!("server")));

    let logged = log
        .run(hub, log_subscription)
        .instrument(info_span!("log"))
        .await;

    match logged {
        Ok(_) => {
            // The stream has ended, let the clients get the rest of it.
            if let Err(e) = server.await {
                warn!(?e, "Server task failed");
            }
        }
        Err(_) => server.abort(),
    }

    logged
}
