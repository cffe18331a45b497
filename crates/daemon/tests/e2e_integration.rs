//! End-to-end integration tests for ttybridge.
//!
//! These tests verify complete flows work correctly:
//! - Session lifecycle through the registry
//! - Event routing
//! - The WebSocket event channel against a live server

use std::sync::Arc;
use std::time::Duration;

use daemon::config::{Config, TerminalConfig};
use daemon::router::EventRouter;
use daemon::server::EventServer;
use daemon::session::{OutputSender, SessionRegistry};
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientEvent, ServerEvent, TerminalInput, TerminalResize};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Terminal settings pinned for test determinism.
fn test_terminal_config() -> TerminalConfig {
    TerminalConfig {
        shell: "/bin/sh".to_string(),
        ..TerminalConfig::default()
    }
}

fn test_registry() -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new(test_terminal_config()))
}

// =============================================================================
// Registry Flow Tests
// =============================================================================

#[tokio::test]
async fn test_full_session_flow_through_registry() {
    let registry = test_registry();
    let conn = "conn-e2e".to_string();
    let (output, mut rx) = OutputSender::channel(conn.clone());

    // create_terminal
    let session_id = registry.get_or_create(&conn, output).await.unwrap();
    assert!(registry.contains(&conn));

    // terminal_input
    registry.dispatch_input(&conn, "echo hi\n").await;

    // terminal_output eventually contains the echoed text
    let mut collected = String::new();
    let mut found = false;
    for _ in 0..50 {
        match timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(ServerEvent::TerminalOutput(out))) => {
                assert_eq!(out.session_id, session_id);
                collected.push_str(&out.data);
                if collected.contains("hi") {
                    found = true;
                    break;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {}
        }
    }
    assert!(found, "Echo output never arrived: {collected:?}");

    // disconnect
    registry.remove(&conn).await;
    assert!(!registry.contains(&conn));
    assert_eq!(registry.count(), 0);
}

#[tokio::test]
async fn test_resize_applies_to_live_terminal() {
    let registry = test_registry();
    let conn = "conn-resize".to_string();
    let (output, mut rx) = OutputSender::channel(conn.clone());

    registry.get_or_create(&conn, output).await.unwrap();
    registry.dispatch_resize(&conn, 40, 120).await;

    // The shell itself observes the new size
    registry.dispatch_input(&conn, "stty size\n").await;

    let mut collected = String::new();
    let mut found = false;
    for _ in 0..50 {
        match timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(ServerEvent::TerminalOutput(out))) => {
                collected.push_str(&out.data);
                if collected.contains("40 120") {
                    found = true;
                    break;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {}
        }
    }
    assert!(found, "stty did not report the new size: {collected:?}");

    registry.remove(&conn).await;
}

#[tokio::test]
async fn test_router_ack_then_output() {
    let registry = test_registry();
    let router = EventRouter::new(Arc::clone(&registry));
    let conn = "conn-router".to_string();
    let (output, mut rx) = OutputSender::channel(conn.clone());

    let ack = router
        .route(&conn, ClientEvent::CreateTerminal, &output)
        .await
        .unwrap()
        .expect("create_terminal must be acknowledged");
    let ServerEvent::TerminalCreated(created) = ack else {
        panic!("expected terminal_created, got {ack:?}");
    };

    router
        .route(
            &conn,
            ClientEvent::TerminalInput(TerminalInput {
                input: "echo routed_marker\n".to_string(),
            }),
            &output,
        )
        .await
        .unwrap();

    let mut found = false;
    for _ in 0..50 {
        match timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(ServerEvent::TerminalOutput(out))) => {
                assert_eq!(out.session_id, created.session_id);
                if out.data.contains("routed_marker") {
                    found = true;
                    break;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {}
        }
    }
    assert!(found, "Routed output never arrived");

    registry.remove(&conn).await;
}

// =============================================================================
// WebSocket Channel Tests
// =============================================================================

/// Starts a server on an ephemeral port and returns its registry and URL.
async fn start_server() -> (Arc<SessionRegistry>, String, tokio_util::sync::CancellationToken) {
    let registry = test_registry();
    let server = EventServer::bind("127.0.0.1:0", Arc::clone(&registry))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let token = server.shutdown_token();
    tokio::spawn(server.run());
    (registry, format!("ws://{addr}"), token)
}

/// Reads server events off the socket until `predicate` accepts one.
async fn wait_for_event<S, F>(ws: &mut S, mut predicate: F) -> Option<ServerEvent>
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
    F: FnMut(&ServerEvent) -> bool,
{
    for _ in 0..100 {
        let Ok(Some(Ok(msg))) = timeout(Duration::from_millis(100), ws.next()).await else {
            continue;
        };
        if let WsMessage::Text(text) = msg {
            if let Ok(event) = ServerEvent::from_json(&text) {
                if predicate(&event) {
                    return Some(event);
                }
            }
        }
    }
    None
}

#[tokio::test]
async fn test_websocket_end_to_end() {
    let (registry, url, token) = start_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    // create_terminal -> terminal_created{session_id}
    ws.send(WsMessage::Text(
        ClientEvent::CreateTerminal.to_json().unwrap(),
    ))
    .await
    .unwrap();

    let created = wait_for_event(&mut ws, |e| matches!(e, ServerEvent::TerminalCreated(_)))
        .await
        .expect("no terminal_created ack");
    let ServerEvent::TerminalCreated(created) = created else {
        unreachable!()
    };
    assert_eq!(registry.count(), 1);

    // terminal_input -> terminal_output containing "hi"
    ws.send(WsMessage::Text(
        ClientEvent::TerminalInput(TerminalInput {
            input: "echo hi\n".to_string(),
        })
        .to_json()
        .unwrap(),
    ))
    .await
    .unwrap();

    let mut collected = String::new();
    let found = wait_for_event(&mut ws, |e| {
        if let ServerEvent::TerminalOutput(out) = e {
            assert_eq!(out.session_id, created.session_id);
            collected.push_str(&out.data);
            collected.contains("hi")
        } else {
            false
        }
    })
    .await;
    assert!(found.is_some(), "Echo output never arrived: {collected:?}");

    // terminal_resize is accepted silently
    ws.send(WsMessage::Text(
        ClientEvent::TerminalResize(TerminalResize {
            rows: 40,
            cols: 120,
        })
        .to_json()
        .unwrap(),
    ))
    .await
    .unwrap();

    // disconnect -> registry entry removed within a bounded time
    ws.close(None).await.unwrap();
    drop(ws);

    let mut drained = false;
    for _ in 0..100 {
        if registry.count() == 0 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(drained, "Registry still holds the session after disconnect");

    token.cancel();
}

#[tokio::test]
async fn test_websocket_repeat_create_same_session() {
    let (registry, url, token) = start_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..2 {
        ws.send(WsMessage::Text(
            ClientEvent::CreateTerminal.to_json().unwrap(),
        ))
        .await
        .unwrap();
        let event = wait_for_event(&mut ws, |e| matches!(e, ServerEvent::TerminalCreated(_)))
            .await
            .expect("no terminal_created ack");
        if let ServerEvent::TerminalCreated(created) = event {
            ids.push(created.session_id);
        }
    }

    assert_eq!(ids[0], ids[1], "Repeat create produced a new session");
    assert_eq!(registry.count(), 1);

    ws.close(None).await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn test_websocket_sessions_are_isolated() {
    let (registry, url, token) = start_server().await;

    let (mut ws1, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut ws2, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    for ws in [&mut ws1, &mut ws2] {
        ws.send(WsMessage::Text(
            ClientEvent::CreateTerminal.to_json().unwrap(),
        ))
        .await
        .unwrap();
    }

    let e1 = wait_for_event(&mut ws1, |e| matches!(e, ServerEvent::TerminalCreated(_)))
        .await
        .expect("client 1 got no ack");
    let e2 = wait_for_event(&mut ws2, |e| matches!(e, ServerEvent::TerminalCreated(_)))
        .await
        .expect("client 2 got no ack");

    let (ServerEvent::TerminalCreated(c1), ServerEvent::TerminalCreated(c2)) = (e1, e2) else {
        unreachable!()
    };
    assert_ne!(c1.session_id, c2.session_id);
    assert_eq!(registry.count(), 2);

    // Client 1's marker shows up only on client 1's channel
    ws1.send(WsMessage::Text(
        ClientEvent::TerminalInput(TerminalInput {
            input: "echo isolated_marker_one\n".to_string(),
        })
        .to_json()
        .unwrap(),
    ))
    .await
    .unwrap();

    let mut collected = String::new();
    let found = wait_for_event(&mut ws1, |e| {
        if let ServerEvent::TerminalOutput(out) = e {
            assert_eq!(out.session_id, c1.session_id);
            collected.push_str(&out.data);
            collected.contains("isolated_marker_one")
        } else {
            false
        }
    })
    .await;
    assert!(found.is_some(), "Client 1 never saw its own output");

    ws1.close(None).await.unwrap();
    ws2.close(None).await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn test_websocket_malformed_event_gets_error() {
    let (_registry, url, token) = start_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    ws.send(WsMessage::Text("{\"event\": \"no_such_event\"}".to_string()))
        .await
        .unwrap();

    let event = wait_for_event(&mut ws, |e| matches!(e, ServerEvent::Error(_))).await;
    assert!(event.is_some(), "Malformed event produced no error reply");

    ws.close(None).await.unwrap();
    token.cancel();
}

// =============================================================================
// Configuration Integration
// =============================================================================

#[tokio::test]
async fn test_config_drives_initial_terminal_size() {
    let mut terminal = test_terminal_config();
    terminal.rows = 30;
    terminal.cols = 100;
    let registry = Arc::new(SessionRegistry::new(terminal));

    let conn = "conn-size".to_string();
    let (output, mut rx) = OutputSender::channel(conn.clone());
    registry.get_or_create(&conn, output).await.unwrap();

    registry.dispatch_input(&conn, "stty size\n").await;

    let mut collected = String::new();
    let mut found = false;
    for _ in 0..50 {
        match timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(ServerEvent::TerminalOutput(out))) => {
                collected.push_str(&out.data);
                if collected.contains("30 100") {
                    found = true;
                    break;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {}
        }
    }
    assert!(found, "Initial size not applied: {collected:?}");

    registry.remove(&conn).await;
}

#[test]
fn test_default_config_is_valid() {
    let mut config = Config::default();
    config.terminal.shell = "/bin/sh".to_string();
    assert!(config.validate().is_ok());
}
