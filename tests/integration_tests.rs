//! End-to-end integration tests — polling and WebSocket sessions, transport
//! upgrade, and message echo through the running server.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eio_protocol::{
    HandshakeParams, MessageKind, Packet, PacketType, PayloadEncoder, PayloadFormat,
    decode_packet, decode_payload,
};
use eio_server::{ConnectionHandler, EngineConfig, EngineServer, ServerConfig, Session};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Echo;

impl ConnectionHandler for Echo {
    async fn on_connect(&self, session: Arc<Session>) {
        while let Ok(reader) = session.next_reader().await {
            let kind = reader.kind();
            let data = reader.into_bytes();
            loop {
                match session.next_writer(kind).await {
                    Ok(mut writer) => {
                        writer.write_all(&data).unwrap();
                        let _ = writer.close();
                        break;
                    }
                    Err(e) if e.is_retryable() => {
                        tokio::time::sleep(Duration::from_millis(5)).await
                    }
                    Err(_) => return,
                }
            }
        }
    }
}

/// Start an echo server on a random port.
async fn start_test_server() -> u16 {
    let config = ServerConfig {
        port: 0, // OS-assigned
        hostname: "127.0.0.1".into(),
        engine: EngineConfig::default(),
    };
    let server = EngineServer::start(config, Echo).await.unwrap();
    let port = server.port();

    // Leak the server to keep it running for the test
    Box::leak(Box::new(server));
    port
}

fn engine_url(port: u16, query: &str) -> String {
    format!("http://127.0.0.1:{port}/engine.io/?EIO=3&{query}")
}

/// Polling handshake in text framing; returns the session id.
async fn polling_handshake(client: &reqwest::Client, port: u16) -> String {
    let body = client
        .get(engine_url(port, "transport=polling&b64=1"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let packets = decode_payload(body).unwrap();
    HandshakeParams::from_packet(&packets[0]).unwrap().sid
}

async fn next_packet(ws: &mut Ws) -> Packet {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timeout waiting for frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => {
                return decode_packet(MessageKind::Text, Bytes::copy_from_slice(text.as_bytes()))
                    .unwrap();
            }
            Message::Binary(data) => return decode_packet(MessageKind::Binary, data).unwrap(),
            _ => continue,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_polling_handshake() {
    let port = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(engine_url(port, "transport=polling&b64=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let packets = decode_payload(resp.bytes().await.unwrap()).unwrap();
    assert_eq!(packets.len(), 1);
    let params = HandshakeParams::from_packet(&packets[0]).unwrap();
    assert!(cookie.starts_with(&format!("io={}", params.sid)));
    assert_eq!(params.upgrades, vec!["websocket".to_string()]);
    assert_eq!(params.ping_interval, 25_000);
    assert_eq!(params.ping_timeout, 60_000);
}

#[tokio::test]
async fn test_polling_text_echo() {
    let port = start_test_server().await;
    let client = reqwest::Client::new();
    let sid = polling_handshake(&client, port).await;
    let url = engine_url(port, &format!("transport=polling&b64=1&sid={sid}"));

    let resp = client.post(&url).body("3:4hi").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    let body = client.get(&url).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "3:4hi");
}

#[tokio::test]
async fn test_polling_binary_echo() {
    let port = start_test_server().await;
    let client = reqwest::Client::new();
    let sid = polling_handshake(&client, port).await;

    let mut encoder = PayloadEncoder::new(PayloadFormat::Binary);
    encoder.push(&Packet::message(MessageKind::Binary, vec![0u8, 1, 255]));
    let url = engine_url(port, &format!("transport=polling&sid={sid}"));
    client.post(&url).body(encoder.take()).send().await.unwrap();

    // The session was opened with b64, so the reply is text framed.
    let body = client.get(&url).send().await.unwrap().bytes().await.unwrap();
    let packets = decode_payload(body).unwrap();
    assert_eq!(
        packets,
        vec![Packet::message(MessageKind::Binary, vec![0u8, 1, 255])]
    );
}

#[tokio::test]
async fn test_polling_errors() {
    let port = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(engine_url(port, "transport=polling&sid=missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "Session ID unknown");

    let resp = client
        .get(engine_url(port, "transport=carrier-pigeon"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 0);
}

#[tokio::test]
async fn test_health() {
    let port = start_test_server().await;
    let client = reqwest::Client::new();
    polling_handshake(&client, port).await;

    let body: Value = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_websocket_session() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}/engine.io/?EIO=3&transport=websocket");
    let (mut ws, _) = connect_async(&url).await.unwrap();

    let open = next_packet(&mut ws).await;
    let params = HandshakeParams::from_packet(&open).unwrap();
    assert!(params.upgrades.is_empty());

    ws.send(Message::Text("4hello".into())).await.unwrap();
    assert_eq!(
        next_packet(&mut ws).await,
        Packet::message(MessageKind::Text, "hello")
    );

    ws.send(Message::Binary(Bytes::from_static(&[4, 1, 2, 3])))
        .await
        .unwrap();
    assert_eq!(
        next_packet(&mut ws).await,
        Packet::message(MessageKind::Binary, vec![1u8, 2, 3])
    );

    ws.send(Message::Text("2ping".into())).await.unwrap();
    assert_eq!(next_packet(&mut ws).await, Packet::pong("ping"));
}

#[tokio::test]
async fn test_websocket_close_packet() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}/engine.io/?EIO=3&transport=websocket");
    let (mut ws, _) = connect_async(&url).await.unwrap();
    next_packet(&mut ws).await;

    ws.send(Message::Text("1".into())).await.unwrap();
    let ended = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "server should close the socket");
}

// ─────────────────────────────────────────────────────────────────────────────
// Upgrade
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upgrade_polling_to_websocket() {
    let port = start_test_server().await;
    let client = reqwest::Client::new();
    let sid = polling_handshake(&client, port).await;
    let poll_url = engine_url(port, &format!("transport=polling&b64=1&sid={sid}"));

    let ws_url = format!("ws://127.0.0.1:{port}/engine.io/?EIO=3&transport=websocket&sid={sid}");
    let (mut ws, _) = connect_async(&ws_url).await.unwrap();

    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_packet(&mut ws).await, Packet::pong("probe"));

    // The pending or next poll is flushed with a NOOP.
    let body = client.get(&poll_url).send().await.unwrap().bytes().await.unwrap();
    let packets = decode_payload(body).unwrap();
    assert!(packets.iter().all(|p| p.packet_type == PacketType::Noop));

    ws.send(Message::Text("5".into())).await.unwrap();
    ws.send(Message::Text("4upgraded".into())).await.unwrap();
    assert_eq!(
        next_packet(&mut ws).await,
        Packet::message(MessageKind::Text, "upgraded")
    );

    // The polling transport is gone.
    let resp = client.get(&poll_url).send().await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_upgrade_keeps_unflushed_messages() {
    let port = start_test_server().await;
    let client = reqwest::Client::new();
    let sid = polling_handshake(&client, port).await;
    let poll_url = engine_url(port, &format!("transport=polling&b64=1&sid={sid}"));

    // The echo is queued on polling and never picked up by a GET.
    let resp = client.post(&poll_url).body("3:4m1").send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let ws_url = format!("ws://127.0.0.1:{port}/engine.io/?EIO=3&transport=websocket&sid={sid}");
    let (mut ws, _) = connect_async(&ws_url).await.unwrap();
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_packet(&mut ws).await, Packet::pong("probe"));
    ws.send(Message::Text("5".into())).await.unwrap();

    assert_eq!(
        next_packet(&mut ws).await,
        Packet::message(MessageKind::Text, "m1")
    );
}

#[tokio::test]
async fn test_stray_websocket_request_keeps_session() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}/engine.io/?EIO=3&transport=websocket");
    let (mut ws, _) = connect_async(&url).await.unwrap();
    let sid = HandshakeParams::from_packet(&next_packet(&mut ws).await)
        .unwrap()
        .sid;

    let client = reqwest::Client::new();
    let resp = client
        .get(engine_url(port, &format!("transport=websocket&sid={sid}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    ws.send(Message::Text("4still here".into())).await.unwrap();
    assert_eq!(
        next_packet(&mut ws).await,
        Packet::message(MessageKind::Text, "still here")
    );
}
