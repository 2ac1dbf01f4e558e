//! WebSocket client for the slot delegator server

use anyhow::{anyhow, bail, Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use slot_delegator::delegation::{Call, CallOutput, DelegatorEvent};
use slot_delegator::vault::PermitSignature;
use slot_delegator::websocket::{ClientMessage, ServerMessage};
use slot_delegator::Address;

pub struct DelegatorClient {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<ServerMessage>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

impl DelegatorClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let url = url::Url::parse(url).with_context(|| format!("Invalid server URL {}", url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("Server URL must use ws:// or wss://, got {}", url);
        }
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        // Channel for outgoing messages
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);

        // Channel for incoming parsed messages
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(32);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = out_rx.recv() => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(result) = read.next() => {
                        match result {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(msg) => {
                                        if in_tx.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse message: {} - {}", e, text);
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
        });

        Ok(Self {
            tx: out_tx,
            rx: in_rx,
            handle,
        })
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.tx
            .send(Message::Text(json))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    /// Receive a message from the server
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Send `msg` and wait for its reply, skipping pushed events
    pub async fn request(&mut self, msg: ClientMessage) -> Result<ServerMessage> {
        self.send(msg).await?;
        while let Some(reply) = self.recv().await {
            match reply {
                ServerMessage::Event { .. } => continue,
                ServerMessage::Error { code, message } => {
                    bail!("Server error ({}): {}", code, message)
                }
                reply => return Ok(reply),
            }
        }
        Err(anyhow!("Connection closed"))
    }

    /// Prove control of `key`'s address for the rest of the connection
    pub async fn login(&mut self, key: &SigningKey) -> Result<Address> {
        let address = Address::from(key.verifying_key());
        let message = match self.request(ClientMessage::Hello { address }).await? {
            ServerMessage::Challenge { message, .. } => message,
            other => bail!("Unexpected reply to hello: {:?}", other),
        };
        let signature = key.sign(message.as_bytes()).to_bytes();
        match self.request(ClientMessage::Authenticate { signature }).await? {
            ServerMessage::Authenticated { address } => Ok(address),
            other => bail!("Unexpected reply to authenticate: {:?}", other),
        }
    }

    pub async fn call(&mut self, call: Call) -> Result<CallOutput> {
        match self.request(ClientMessage::Call { call }).await? {
            ServerMessage::CallResult { output } => Ok(output),
            other => bail!("Unexpected reply to call: {:?}", other),
        }
    }

    pub async fn permit_and_multicall(
        &mut self,
        amount: u128,
        permit: PermitSignature,
        calls: Vec<Call>,
    ) -> Result<Vec<CallOutput>> {
        let msg = ClientMessage::PermitAndMulticall {
            amount,
            permit,
            calls,
        };
        match self.request(msg).await? {
            ServerMessage::MulticallResult { outputs } => Ok(outputs),
            other => bail!("Unexpected reply to permit_and_multicall: {:?}", other),
        }
    }

    /// Subscribe, then yield events until the connection closes
    pub async fn watch(&mut self, mut on_event: impl FnMut(DelegatorEvent)) -> Result<()> {
        self.request(ClientMessage::Subscribe).await?;
        while let Some(msg) = self.recv().await {
            if let ServerMessage::Event { event } = msg {
                on_event(event);
            }
        }
        Ok(())
    }
}
