//! WebSocket integration tests

use std::net::SocketAddr;
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use futures::{SinkExt, StreamExt};
use slot_delegator::clock::ManualClock;
use slot_delegator::config::EngineConfig;
use slot_delegator::delegation::{Call, CallOutput, DelegationEngine, DelegatorEvent};
use slot_delegator::vault::{sign_permit, PrizeVault};
use slot_delegator::websocket::{ClientMessage, ServerMessage};
use slot_delegator::{Address, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_tungstenite::tungstenite::Message;

const START: u64 = 1_700_000_000;

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn setup_server() -> (SocketAddr, Arc<AppState>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let engine = Arc::new(DelegationEngine::new(
        PrizeVault::new(Address::derive(&[b"prize-vault"]), 18),
        EngineConfig::default(),
        Arc::new(ManualClock::new(START)),
    ));
    let state = AppState::new(pool, engine);
    state.store.migrate().await.expect("Failed to run migrations");

    let app = slot_delegator::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Ws {
    let url = format!("ws://{}/ws", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws_stream
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    ws.send(Message::Text(serde_json::to_string(msg).unwrap()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("Expected text message, got {:?}", other),
        }
    }
}

async fn request(ws: &mut Ws, msg: ClientMessage) -> ServerMessage {
    send(ws, &msg).await;
    recv(ws).await
}

fn expect_error(reply: ServerMessage, expected: &str) {
    match reply {
        ServerMessage::Error { code, .. } => assert_eq!(code, expected),
        other => panic!("Expected {} error, got {:?}", expected, other),
    }
}

async fn login(ws: &mut Ws, key: &SigningKey) -> Address {
    let address = Address::from(key.verifying_key());
    let message = match request(ws, ClientMessage::Hello { address }).await {
        ServerMessage::Challenge { message, .. } => message,
        other => panic!("Expected challenge, got {:?}", other),
    };
    let signature = key.sign(message.as_bytes()).to_bytes();
    match request(ws, ClientMessage::Authenticate { signature }).await {
        ServerMessage::Authenticated { address: who } => assert_eq!(who, address),
        other => panic!("Expected authenticated, got {:?}", other),
    }
    address
}

fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

#[tokio::test]
async fn test_engine_info() {
    let (addr, state) = setup_server().await;
    let mut ws = connect(addr).await;

    match request(&mut ws, ClientMessage::EngineInfo).await {
        ServerMessage::EngineInfo { info } => {
            assert_eq!(info.address, state.engine.address());
            assert_eq!(info.decimals, 18);
            assert_eq!(info.total_supply, 0);
        }
        other => panic!("Expected engine_info, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_message_keeps_socket_open() {
    let (addr, _state) = setup_server().await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text("not json".to_string())).await.unwrap();
    expect_error(recv(&mut ws).await, "bad_request");

    ws.send(Message::Text(r#"{"type":"launch_rockets"}"#.to_string()))
        .await
        .unwrap();
    expect_error(recv(&mut ws).await, "bad_request");

    assert!(matches!(
        request(&mut ws, ClientMessage::EngineInfo).await,
        ServerMessage::EngineInfo { .. }
    ));
}

#[tokio::test]
async fn test_mutations_require_login() {
    let (addr, _state) = setup_server().await;
    let mut ws = connect(addr).await;

    expect_error(
        request(&mut ws, ClientMessage::Deposit { amount: 10 }).await,
        "not_authenticated",
    );
    let call = Call::SetRepresentative {
        representative: Address::derive(&[b"rep"]),
        enabled: true,
    };
    expect_error(
        request(&mut ws, ClientMessage::Call { call }).await,
        "not_authenticated",
    );
    expect_error(
        request(&mut ws, ClientMessage::Multicall { calls: vec![] }).await,
        "not_authenticated",
    );
}

#[tokio::test]
async fn test_zero_address_cannot_log_in() {
    let (addr, _state) = setup_server().await;
    let mut ws = connect(addr).await;

    let reply = request(
        &mut ws,
        ClientMessage::Hello {
            address: Address::ZERO,
        },
    )
    .await;
    expect_error(reply, "bad_request");

    let mut forged = [0u8; 64];
    forged[0] = 1;
    let reply = request(&mut ws, ClientMessage::Authenticate { signature: forged }).await;
    expect_error(reply, "bad_request");
    let call = Call::SetRepresentative {
        representative: Address::derive(&[b"rep"]),
        enabled: true,
    };
    expect_error(
        request(&mut ws, ClientMessage::Call { call }).await,
        "not_authenticated",
    );
}

#[tokio::test]
async fn test_login_rejects_wrong_signature() {
    let (addr, _state) = setup_server().await;
    let mut ws = connect(addr).await;
    let victim = Address::from(key(1).verifying_key());

    let message = match request(&mut ws, ClientMessage::Hello { address: victim }).await {
        ServerMessage::Challenge { message, .. } => message,
        other => panic!("Expected challenge, got {:?}", other),
    };
    let signature = key(2).sign(message.as_bytes()).to_bytes();
    expect_error(
        request(&mut ws, ClientMessage::Authenticate { signature }).await,
        "not_authenticated",
    );

    // The challenge is spent; a correct signature now needs a new hello
    let signature = key(1).sign(message.as_bytes()).to_bytes();
    expect_error(
        request(&mut ws, ClientMessage::Authenticate { signature }).await,
        "bad_request",
    );
    expect_error(
        request(&mut ws, ClientMessage::Deposit { amount: 10 }).await,
        "not_authenticated",
    );
}

#[tokio::test]
async fn test_stake_and_delegate_over_websocket() {
    let (addr, state) = setup_server().await;
    let mut ws = connect(addr).await;
    let me = login(&mut ws, &key(1)).await;
    let delegatee = Address::derive(&[b"delegatee"]);

    match request(&mut ws, ClientMessage::Deposit { amount: 1000 }).await {
        ServerMessage::Deposited { balance, .. } => assert_eq!(balance, 1000),
        other => panic!("Expected deposited, got {:?}", other),
    }
    match request(
        &mut ws,
        ClientMessage::Approve {
            spender: None,
            amount: 1000,
        },
    )
    .await
    {
        ServerMessage::Approved { spender, .. } => assert_eq!(spender, state.engine.address()),
        other => panic!("Expected approved, got {:?}", other),
    }

    let calls = vec![
        Call::Stake { to: me, amount: 1000 },
        Call::CreateDelegation {
            delegator: me,
            slot: 0,
            delegatee,
            lock_duration: 3600,
        },
        Call::FundDelegationFromStake {
            delegator: me,
            slot: 0,
            amount: 600,
        },
    ];
    let account = match request(&mut ws, ClientMessage::Multicall { calls }).await {
        ServerMessage::MulticallResult { outputs } => match outputs[1] {
            CallOutput::Account { account } => account,
            ref other => panic!("Expected account output, got {:?}", other),
        },
        other => panic!("Expected multicall_result, got {:?}", other),
    };

    match request(&mut ws, ClientMessage::GetDelegation { delegator: me, slot: 0 }).await {
        ServerMessage::Delegation { delegation, .. } => {
            assert_eq!(delegation.account, account);
            assert_eq!(delegation.delegatee, delegatee);
            assert_eq!(delegation.balance, 600);
            assert_eq!(delegation.lock_until, START + 3600);
            assert!(delegation.was_created);
        }
        other => panic!("Expected delegation, got {:?}", other),
    }
    match request(&mut ws, ClientMessage::StakeBalance { address: me }).await {
        ServerMessage::StakeBalance { balance, .. } => assert_eq!(balance, 400),
        other => panic!("Expected stake_balance, got {:?}", other),
    }

    // Locked: the engine error code reaches the client verbatim
    let call = Call::WithdrawDelegationToStake {
        delegator: me,
        slot: 0,
        amount: 1,
    };
    expect_error(
        request(&mut ws, ClientMessage::Call { call }).await,
        "delegation_locked",
    );
}

#[tokio::test]
async fn test_failed_multicall_rolls_back_over_websocket() {
    let (addr, _state) = setup_server().await;
    let mut ws = connect(addr).await;
    let me = login(&mut ws, &key(1)).await;
    request(&mut ws, ClientMessage::Deposit { amount: 1000 }).await;
    request(
        &mut ws,
        ClientMessage::Approve {
            spender: None,
            amount: 1000,
        },
    )
    .await;

    let calls = vec![
        Call::Stake { to: me, amount: 1000 },
        Call::Unstake {
            to: Address::ZERO,
            amount: 1000,
        },
    ];
    expect_error(
        request(&mut ws, ClientMessage::Multicall { calls }).await,
        "recipient_required",
    );
    match request(&mut ws, ClientMessage::VaultBalance { address: me }).await {
        ServerMessage::VaultBalance { balance, .. } => assert_eq!(balance, 1000),
        other => panic!("Expected vault_balance, got {:?}", other),
    }
}

#[tokio::test]
async fn test_permit_and_multicall_over_websocket() {
    let (addr, state) = setup_server().await;
    let mut ws = connect(addr).await;
    let signer = key(5);
    let me = login(&mut ws, &signer).await;
    request(&mut ws, ClientMessage::Deposit { amount: 500 }).await;

    let (nonce, spender, domain) =
        match request(&mut ws, ClientMessage::PermitNonce { address: me }).await {
            ServerMessage::PermitNonce {
                nonce,
                spender,
                domain_separator,
                ..
            } => {
                let domain: [u8; 32] = hex::decode(domain_separator).unwrap().try_into().unwrap();
                (nonce, spender, domain)
            }
            other => panic!("Expected permit_nonce, got {:?}", other),
        };
    assert_eq!(nonce, 0);
    assert_eq!(spender, state.engine.address());

    let permit = sign_permit(&signer, &domain, &spender, 500, nonce, START + 60);
    let msg = ClientMessage::PermitAndMulticall {
        amount: 500,
        permit,
        calls: vec![Call::Stake { to: me, amount: 500 }],
    };
    assert!(matches!(
        request(&mut ws, msg.clone()).await,
        ServerMessage::MulticallResult { .. }
    ));
    assert_eq!(state.engine.balance_of(&me).await, 500);

    expect_error(request(&mut ws, msg).await, "invalid_authorization");
}

#[tokio::test]
async fn test_subscribe_receives_committed_events() {
    let (addr, _state) = setup_server().await;
    let mut watcher = connect(addr).await;
    assert!(matches!(
        request(&mut watcher, ClientMessage::Subscribe).await,
        ServerMessage::Subscribed
    ));

    let mut ws = connect(addr).await;
    let me = login(&mut ws, &key(1)).await;
    let rep = Address::derive(&[b"rep"]);
    let call = Call::SetRepresentative {
        representative: rep,
        enabled: true,
    };
    assert!(matches!(
        request(&mut ws, ClientMessage::Call { call }).await,
        ServerMessage::CallResult {
            output: CallOutput::Done
        }
    ));

    match recv(&mut watcher).await {
        ServerMessage::Event {
            event:
                DelegatorEvent::RepresentativeSet {
                    delegator,
                    representative,
                    enabled,
                },
        } => {
            assert_eq!(delegator, me);
            assert_eq!(representative, rep);
            assert!(enabled);
        }
        other => panic!("Expected representative_set event, got {:?}", other),
    }

    match request(
        &mut ws,
        ClientMessage::IsRepresentative {
            delegator: me,
            representative: rep,
        },
    )
    .await
    {
        ServerMessage::IsRepresentative { enabled, .. } => assert!(enabled),
        other => panic!("Expected is_representative, got {:?}", other),
    }
}

#[tokio::test]
async fn test_compute_delegation_address_matches_engine() {
    let (addr, state) = setup_server().await;
    let mut ws = connect(addr).await;
    let delegator = Address::derive(&[b"alice"]);

    match request(
        &mut ws,
        ClientMessage::ComputeDelegationAddress { delegator, slot: 7 },
    )
    .await
    {
        ServerMessage::DelegationAddress { account, .. } => assert_eq!(
            account,
            state.engine.compute_delegation_address(&delegator, 7).await
        ),
        other => panic!("Expected delegation_address, got {:?}", other),
    }
}
