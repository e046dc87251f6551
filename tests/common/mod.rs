#![allow(dead_code)]

use std::time::Duration;

use color_eyre::Result;
use futures::StreamExt;
use tokio::{
    io::AsyncReadExt,
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, Level};
use ttysrv::{
    frame::Frame,
    hub::{HubConfig, HubHandle},
};

/// A server fed by frames the test sends.
pub struct TestServer {
    pub port: u16,
    pub source: mpsc::Sender<Frame>,
    pub hub: HubHandle,
}

impl TestServer {
    pub async fn send(&self, frame: &'static str) -> Result<()> {
        self.source.send(Frame::from(frame)).await?;
        Ok(())
    }
}

pub async fn start_server() -> TestServer {
    start_server_with_config(HubConfig::default()).await
}

pub async fn start_server_with_config(config: HubConfig) -> TestServer {
    ttysrv::logging::init(Level::DEBUG, None).await;

    let (source, source_rx) = mpsc::channel(64);
    let hub = HubHandle::new(ReceiverStream::new(source_rx).boxed(), config);

    let (port_tx, port_rx) = oneshot::channel();
    let server_hub = hub.clone();

    tokio::spawn(async move { ttysrv::server::run_any_port(server_hub, port_tx).await });
    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    TestServer { port, source, hub }
}

pub async fn connect(port: u16) -> Result<TcpStream> {
    info!("Connecting to server on port {port}");
    let stream = TcpStream::connect(("127.0.0.1", port)).await?;

    Ok(stream)
}

/// Connect, and wait until the server has subscribed on behalf of the client.
/// Only then is the client sure to get what is sent next.
pub async fn connect_subscribed(server: &TestServer) -> Result<TcpStream> {
    let before = server.hub.subscriber_count().await?;
    let stream = connect(server.port).await?;

    wait_for_subscribers(&server.hub, before + 1).await?;

    Ok(stream)
}

pub async fn wait_for_subscribers(hub: &HubHandle, count: usize) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while hub.subscriber_count().await? != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok::<_, color_eyre::Report>(())
    })
    .await?
}

pub async fn receive_exactly(client: &mut TcpStream, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    timeout(Duration::from_secs(5), client.read_exact(&mut buf)).await??;

    Ok(buf)
}

pub async fn receive_to_end(client: &mut TcpStream) -> Result<Vec<u8>> {
    let mut buf = vec![];
    timeout(Duration::from_secs(5), client.read_to_end(&mut buf)).await??;

    Ok(buf)
}
