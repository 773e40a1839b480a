//! Common test utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley_dispatch::testing::MockSupervisor;
use parley_dispatch::{ClientMessage, ServerMessage};
use parley_server::{Server, ServerConfig};
use parley_store::ChatStore;

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// The auth token for the server.
    pub token: String,
    /// Handle to the server task.
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with a default mock agent reply.
    pub async fn start() -> Result<Self> {
        Self::start_with_reply("mock agent reply").await
    }

    /// Start a new test server whose agent streams the given reply.
    pub async fn start_with_reply(reply: &str) -> Result<Self> {
        let token = "test-token".to_string();
        let addr = find_available_port().await?;

        let store = Arc::new(ChatStore::open_in_memory()?);
        let config = ServerConfig::new(Some(token.clone())).with_bind_address(addr);
        let server = Server::new(config, store, Arc::new(MockSupervisor::with_reply(reply)));

        let handle = tokio::spawn(async move {
            let _ = server.run_on(addr).await;
        });

        wait_for_server(addr).await?;

        Ok(Self {
            addr,
            token,
            _handle: handle,
        })
    }

    /// Open a WebSocket connection to the server.
    pub async fn connect(&self) -> Result<WsClient> {
        let (stream, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/ws", self.addr)).await?;
        Ok(WsClient { stream })
    }

    /// Open a connection and authenticate as the given user.
    pub async fn connect_as(&self, user: &str) -> Result<WsClient> {
        let mut client = self.connect().await?;
        client
            .send(&ClientMessage::Auth {
                token: self.token.clone(),
                user: Some(user.to_string()),
            })
            .await?;
        let msg = client.recv().await?;
        anyhow::ensure!(
            matches!(msg, ServerMessage::AuthResult { success: true, .. }),
            "authentication failed: {msg:?}"
        );
        Ok(client)
    }
}

/// A WebSocket client speaking the JSON protocol.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Send a client message.
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.stream.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await?;
        Ok(())
    }

    /// Receive the next server message, with a timeout.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        let deadline = Duration::from_secs(5);
        loop {
            let frame = timeout(deadline, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for message"))?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => anyhow::bail!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Receive messages until one matches the predicate, skipping the rest.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> Result<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        for _ in 0..50 {
            let msg = self.recv().await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
        anyhow::bail!("no matching message within 50 frames")
    }
}

/// Find an available port for the test server.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to accept connections.
async fn wait_for_server(addr: SocketAddr) -> Result<()> {
    let result = timeout(Duration::from_secs(5), async {
        loop {
            if TcpStream::connect(addr).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
