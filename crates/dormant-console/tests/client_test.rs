// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Console client tests against in-process fake console servers.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use dormant_console::packet::{LENGTH_FIELD_SIZE, Packet, PacketCodec, PacketType};
use dormant_console::{ConsoleClient, ConsoleClientConfig, ConsoleError};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

const PASSWORD: &str = "hunter2";

/// Receive buffer size of the vanilla Minecraft RCON thread.
const VANILLA_READ_BUFFER: usize = 1460;

fn response(id: i32, body: &str) -> Packet {
    Packet {
        id,
        packet_type: PacketType::ResponseValue,
        body: Bytes::copy_from_slice(body.as_bytes()),
    }
}

fn auth_response(id: i32) -> Packet {
    Packet {
        id,
        packet_type: PacketType::AUTH_RESPONSE,
        body: Bytes::new(),
    }
}

fn fast_config() -> ConsoleClientConfig {
    ConsoleClientConfig {
        connect_timeout: Duration::from_secs(2),
        command_timeout: Duration::from_millis(300),
        ..ConsoleClientConfig::default()
    }
}

/// Read one packet the way the vanilla server does: a single `read()` per
/// packet, hanging up unless the bytes read are exactly one packet.
async fn read_single(stream: &mut TcpStream) -> Option<Packet> {
    // Give back-to-back client writes time to coalesce
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut buf = [0u8; VANILLA_READ_BUFFER];
    let n = stream.read(&mut buf).await.ok()?;
    if n < LENGTH_FIELD_SIZE {
        return None;
    }
    let length = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if length as usize != n - LENGTH_FIELD_SIZE {
        return None;
    }
    Packet::decode_from_bytes(Bytes::copy_from_slice(&buf[..n])).ok()
}

async fn write(stream: &mut TcpStream, packet: &Packet) {
    stream.write_all(&packet.encode()).await.unwrap();
}

/// Start a Minecraft-style console server that accepts a single connection.
///
/// Commands are answered by `respond` with one packet. Some commands are
/// special: `hang` never answers, `stop` drops the connection without a
/// reply and `slow` sends the first few bytes of its reply, stalls, then
/// sends the rest.
async fn spawn_server(respond: fn(&str) -> String) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let Some(auth) = read_single(&mut stream).await else {
            return;
        };
        assert_eq!(auth.packet_type, PacketType::Auth);
        let auth_id = if auth.body_text() == PASSWORD { auth.id } else { -1 };
        write(&mut stream, &auth_response(auth_id)).await;

        while let Some(packet) = read_single(&mut stream).await {
            if packet.packet_type != PacketType::Command {
                return;
            }
            match packet.body_text().as_str() {
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    return;
                }
                "stop" => return,
                "slow" => {
                    let encoded = response(packet.id, "slow reply").encode();
                    stream.write_all(&encoded[..6]).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    stream.write_all(&encoded[6..]).await.unwrap();
                }
                command => write(&mut stream, &response(packet.id, &respond(command))).await,
            }
        }
    });

    addr
}

/// Start a Source-style console server that frames the stream, sends an
/// empty response value ahead of the auth response and echoes sentinel
/// packets. Each command is answered with every chunk from `respond`.
async fn spawn_source_server(respond: fn(&str) -> Vec<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, PacketCodec);

        let auth = framed.next().await.unwrap().unwrap();
        framed.send(response(auth.id, "")).await.unwrap();
        framed.send(auth_response(auth.id)).await.unwrap();

        while let Some(Ok(packet)) = framed.next().await {
            match packet.packet_type {
                PacketType::Command => {
                    for chunk in respond(&packet.body_text()) {
                        framed.send(response(packet.id, &chunk)).await.unwrap();
                    }
                }
                PacketType::ResponseValue => {
                    framed.send(response(packet.id, "")).await.unwrap();
                }
                PacketType::Auth => return,
            }
        }
    });

    addr
}

fn players_online(command: &str) -> String {
    match command {
        "list" => "There are 0 of a max of 20 players online: ".to_string(),
        _ => format!("Unknown command: {}", command),
    }
}

fn fragmented(_command: &str) -> Vec<String> {
    vec!["a".repeat(4096), "tail".to_string()]
}

#[tokio::test]
async fn test_connect_and_run_command() {
    let addr = spawn_server(players_online).await;

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();
    assert_eq!(client.addr(), addr);

    let reply = client.command("list").await.unwrap();
    assert_eq!(reply, "There are 0 of a max of 20 players online: ");

    // A second round trip on the same connection keeps ids in step.
    let reply = client.command("seed").await.unwrap();
    assert_eq!(reply, "Unknown command: seed");

    client.close().await;
}

#[tokio::test]
async fn test_each_command_is_a_single_packet() {
    let addr = spawn_server(players_online).await;

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();

    // The server hangs up as soon as one read holds more than one packet
    for _ in 0..5 {
        let reply = client.command("list").await.unwrap();
        assert!(reply.starts_with("There are 0 of a max of 20"));
    }
}

#[tokio::test]
async fn test_pre_auth_packet_is_skipped() {
    let addr = spawn_source_server(|_| vec!["ok".to_string()]).await;

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();
    let reply = client.command("status").await.unwrap();
    assert_eq!(reply, "ok");
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let addr = spawn_server(players_online).await;

    let result = ConsoleClient::connect(addr, "wrong", fast_config()).await;
    assert!(matches!(result, Err(ConsoleError::AuthRejected)));
}

#[tokio::test]
async fn test_fragmented_response_is_reassembled_with_sentinel() {
    let addr = spawn_source_server(fragmented).await;
    let config = ConsoleClientConfig {
        sentinel_reassembly: true,
        ..fast_config()
    };

    let mut client = ConsoleClient::connect(addr, PASSWORD, config)
        .await
        .unwrap();
    let reply = client.command("banlist").await.unwrap();

    assert_eq!(reply.len(), 4096 + 4);
    assert!(reply.ends_with("tail"));

    // The sentinel echo of the first round trip does not leak into the next
    let reply = client.command("banlist").await.unwrap();
    assert_eq!(reply.len(), 4096 + 4);
}

#[tokio::test]
async fn test_command_timeout() {
    let addr = spawn_server(players_online).await;

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();
    let err = client.command("hang").await.unwrap_err();

    assert!(matches!(err, ConsoleError::Timeout(300)));
    assert!(!err.is_connection_lost());
}

#[tokio::test]
async fn test_timeout_mid_packet_keeps_connection_usable() {
    let addr = spawn_server(players_online).await;

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();
    let err = client.command("slow").await.unwrap_err();
    assert!(matches!(err, ConsoleError::Timeout(300)));
    assert!(!err.is_connection_lost());

    // Let the rest of the late reply arrive
    tokio::time::sleep(Duration::from_millis(300)).await;

    for _ in 0..3 {
        let reply = client.command("list").await.unwrap();
        assert_eq!(reply, "There are 0 of a max of 20 players online: ");
    }
}

#[tokio::test]
async fn test_server_dropping_connection_is_connection_lost() {
    let addr = spawn_server(players_online).await;

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();
    let err = client.command("stop").await.unwrap_err();
    assert!(err.is_connection_lost(), "unexpected error: {err:?}");

    let err = client.command("list").await.unwrap_err();
    assert!(matches!(err, ConsoleError::Closed));
}

#[tokio::test]
async fn test_unframeable_stream_is_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let auth = read_single(&mut stream).await.unwrap();
        write(&mut stream, &auth_response(auth.id)).await;
        read_single(&mut stream).await.unwrap();
        // A length field no console packet can have
        stream.write_all(&i32::MAX.to_le_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();
    let err = client.command("list").await.unwrap_err();

    assert!(err.is_connection_lost(), "unexpected error: {err:?}");
    assert!(matches!(
        client.command("list").await,
        Err(ConsoleError::Closed)
    ));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let addr = spawn_server(players_online).await;

    let mut client = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap();
    client.close().await;
    client.close().await;

    assert!(client.is_closed());
    assert!(matches!(
        client.command("list").await,
        Err(ConsoleError::Closed)
    ));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = ConsoleClient::connect(addr, PASSWORD, fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::Connect(_)));
}
