//! WebSocket server handler
//!
//! Reads are open to any connection. Mutations act as the address the
//! connection logged in as, which is always the `caller` of the engine
//! operation.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::address::{hex_signature, Address};
use crate::delegation::{Call, CallOutput, DelegationView, DelegatorEvent, EngineInfo};
use crate::error::{AppError, Result};
use crate::vault::{PermitSignature, VaultToken};
use crate::AppState;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection login state
#[derive(Debug, Default)]
struct Session {
    pending: Option<Uuid>,
    address: Option<Address>,
}

impl Session {
    fn caller(&self) -> Result<Address> {
        self.address.ok_or(AppError::NotAuthenticated)
    }
}

type Sender = SplitSink<WebSocket, Message>;

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::default();
    let mut events: Option<broadcast::Receiver<DelegatorEvent>> = None;

    loop {
        let msg = tokio::select! {
            msg = receiver.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
            event = next_event(&mut events) => {
                match event {
                    Ok(event) => {
                        if send(&mut sender, &ServerMessage::Event { event }).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagged behind engine events");
                    }
                    Err(broadcast::error::RecvError::Closed) => events = None,
                }
                continue;
            }
        };

        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
        };

        // Parse client message
        let reply = match serde_json::from_str::<ClientMessage>(&msg) {
            Ok(ClientMessage::Subscribe) => {
                events = Some(state.engine.subscribe());
                Ok(ServerMessage::Subscribed)
            }
            Ok(client_msg) => handle_message(&state, &mut session, client_msg).await,
            Err(e) => Err(AppError::BadRequest(format!("Invalid message: {}", e))),
        };

        let reply = reply.unwrap_or_else(|e| ServerMessage::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        });
        if send(&mut sender, &reply).await.is_err() {
            break;
        }
    }
}

/// Wait for the next event, or forever when not subscribed
async fn next_event(
    events: &mut Option<broadcast::Receiver<DelegatorEvent>>,
) -> std::result::Result<DelegatorEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send(sender: &mut Sender, msg: &ServerMessage) -> Result<()> {
    let text = serde_json::to_string(msg)
        .map_err(|e| AppError::Internal(format!("Failed to encode message: {}", e)))?;
    sender.send(Message::Text(text)).await.map_err(|e| {
        tracing::error!("Failed to send message: {}", e);
        AppError::Internal(e.to_string())
    })
}

async fn handle_message(
    state: &AppState,
    session: &mut Session,
    msg: ClientMessage,
) -> Result<ServerMessage> {
    let engine = &state.engine;
    let reply = match msg {
        ClientMessage::Hello { address } => {
            let challenge = state.challenges.issue(address, engine.now()).await?;
            session.pending = Some(challenge.nonce);
            ServerMessage::Challenge {
                nonce: challenge.nonce,
                message: challenge.message,
            }
        }
        ClientMessage::Authenticate { signature } => {
            let nonce = session
                .pending
                .take()
                .ok_or_else(|| AppError::BadRequest("Send hello first".to_string()))?;
            let address = state
                .challenges
                .redeem(&nonce, &signature, engine.now())
                .await?;
            tracing::info!(%address, "Connection authenticated");
            session.address = Some(address);
            ServerMessage::Authenticated { address }
        }

        ClientMessage::Deposit { amount } => {
            let caller = session.caller()?;
            let balance = engine
                .with_vault_mut(|v| {
                    v.deposit(caller, amount)?;
                    Ok::<_, crate::error::VaultError>(v.balance_of(&caller))
                })
                .await
                .map_err(crate::error::DelegatorError::from)?;
            ServerMessage::Deposited {
                address: caller,
                amount,
                balance,
            }
        }
        ClientMessage::Approve { spender, amount } => {
            let caller = session.caller()?;
            let spender = spender.unwrap_or_else(|| engine.address());
            engine
                .with_vault_mut(|v| v.approve(caller, spender, amount))
                .await
                .map_err(crate::error::DelegatorError::from)?;
            ServerMessage::Approved {
                owner: caller,
                spender,
                amount,
            }
        }
        ClientMessage::Call { call } => {
            let caller = session.caller()?;
            let output = engine.execute(caller, call).await?;
            ServerMessage::CallResult { output }
        }
        ClientMessage::Multicall { calls } => {
            let caller = session.caller()?;
            let outputs = engine.multicall(caller, calls).await?;
            ServerMessage::MulticallResult { outputs }
        }
        ClientMessage::PermitAndMulticall {
            amount,
            permit,
            calls,
        } => {
            let caller = session.caller()?;
            let outputs = engine
                .permit_and_multicall(caller, amount, permit, calls)
                .await?;
            ServerMessage::MulticallResult { outputs }
        }

        ClientMessage::GetDelegation { delegator, slot } => ServerMessage::Delegation {
            delegator,
            slot,
            delegation: engine.get_delegation(&delegator, slot).await,
        },
        ClientMessage::ComputeDelegationAddress { delegator, slot } => {
            ServerMessage::DelegationAddress {
                delegator,
                slot,
                account: engine.compute_delegation_address(&delegator, slot).await,
            }
        }
        ClientMessage::StakeBalance { address } => ServerMessage::StakeBalance {
            address,
            balance: engine.balance_of(&address).await,
        },
        ClientMessage::VaultBalance { address } => ServerMessage::VaultBalance {
            address,
            balance: engine.with_vault(|v| v.balance_of(&address)).await,
        },
        ClientMessage::IsRepresentative {
            delegator,
            representative,
        } => ServerMessage::IsRepresentative {
            delegator,
            representative,
            enabled: engine
                .is_representative_of(&delegator, &representative)
                .await,
        },
        ClientMessage::PermitNonce { address } => {
            let (nonce, domain_separator) = engine
                .with_vault(|v| (v.nonces(&address), v.domain_separator()))
                .await;
            ServerMessage::PermitNonce {
                address,
                nonce,
                spender: engine.address(),
                domain_separator: hex::encode(domain_separator),
            }
        }
        ClientMessage::EngineInfo => ServerMessage::EngineInfo {
            info: engine.info().await,
        },
        ClientMessage::Subscribe => ServerMessage::Subscribed,
    };
    Ok(reply)
}

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for a login challenge for `address`
    Hello { address: Address },
    /// Answer the last challenge
    Authenticate {
        #[serde(with = "hex_signature")]
        signature: [u8; 64],
    },

    /// Mint vault shares to the caller
    Deposit {
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    /// Set the caller's vault allowance; `spender` defaults to the engine
    Approve {
        #[serde(default)]
        spender: Option<Address>,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    Call { call: Call },
    Multicall { calls: Vec<Call> },
    PermitAndMulticall {
        #[serde(with = "crate::amount")]
        amount: u128,
        permit: PermitSignature,
        calls: Vec<Call>,
    },

    GetDelegation { delegator: Address, slot: u64 },
    ComputeDelegationAddress { delegator: Address, slot: u64 },
    StakeBalance { address: Address },
    VaultBalance { address: Address },
    IsRepresentative {
        delegator: Address,
        representative: Address,
    },
    /// Permit nonce and signing domain for `address`
    PermitNonce { address: Address },
    EngineInfo,
    /// Receive every committed event from now on
    Subscribe,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Challenge { nonce: Uuid, message: String },
    Authenticated { address: Address },
    Deposited {
        address: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
        #[serde(with = "crate::amount")]
        balance: u128,
    },
    Approved {
        owner: Address,
        spender: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    CallResult { output: CallOutput },
    MulticallResult { outputs: Vec<CallOutput> },
    Delegation {
        delegator: Address,
        slot: u64,
        delegation: DelegationView,
    },
    DelegationAddress {
        delegator: Address,
        slot: u64,
        account: Address,
    },
    StakeBalance {
        address: Address,
        #[serde(with = "crate::amount")]
        balance: u128,
    },
    VaultBalance {
        address: Address,
        #[serde(with = "crate::amount")]
        balance: u128,
    },
    IsRepresentative {
        delegator: Address,
        representative: Address,
        enabled: bool,
    },
    PermitNonce {
        address: Address,
        nonce: u64,
        /// The engine, which permits must name as spender
        spender: Address,
        domain_separator: String,
    },
    EngineInfo { info: EngineInfo },
    Subscribed,
    /// A committed engine event
    Event { event: DelegatorEvent },
    /// Error occurred
    Error { code: String, message: String },
}
