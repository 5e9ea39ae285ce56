//! Persistent stream transport over a Unix socket
#![cfg(unix)]

mod common;

use common::UnixServer;
use muxrpc_client::{Client, Error};
use serde_json::{json, Value};

fn socket_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("muxrpc-test-{}-{}.ipc", tag, std::process::id()))
}

#[tokio::test]
async fn echo_over_unix_socket() {
    let server = UnixServer::spawn(socket_path("echo")).await;
    let client = Client::dial(server.path.to_str().unwrap()).await.unwrap();

    let v: Value = client.call("test_echo", ("ipc", 1)).await.unwrap();
    assert_eq!(v, json!(["ipc", 1]));

    let err = client
        .call::<_, Value>("test_returnError", ())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rpc(_)));

    server.stop().await;
}

#[tokio::test]
async fn server_going_away_fails_the_next_call() {
    let server = UnixServer::spawn(socket_path("loss")).await;
    let client = Client::dial(server.path.to_str().unwrap()).await.unwrap();

    let v: Value = client.call("test_echo", (1,)).await.unwrap();
    assert_eq!(v, json!([1]));

    server.stop().await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let res = client.call::<_, Value>("test_echo", (2,)).await;
    assert!(res.is_err(), "call succeeded after the socket was removed");
}
