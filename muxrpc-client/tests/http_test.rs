//! Request-per-call HTTP transport tests

mod common;

use common::{spawn_http_server, ERROR_CODE};
use muxrpc_client::{CancellationToken, Client, Error};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn hundred_concurrent_calls() {
    let server = spawn_http_server().await;
    let client = Client::dial(&server.url).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..100 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let v: Value = client.call("test_echo", ("a", i)).await.unwrap();
            assert_eq!(v, json!(["a", i]));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn remote_error_over_http() {
    let server = spawn_http_server().await;
    let client = Client::dial(&server.url).await.unwrap();

    match client.call::<_, Value>("test_returnError", ()).await {
        Err(Error::Rpc(e)) => {
            assert_eq!(e.code(), ERROR_CODE);
            assert_eq!(e.data(), Some(&json!("lost block")));
        }
        other => panic!("expected a remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn notify_over_http() {
    let server = spawn_http_server().await;
    let client = Client::dial(&server.url).await.unwrap();
    client.notify("test_echo", ("fire",)).await.unwrap();
}

#[tokio::test]
async fn cancellation_over_http() {
    let server = spawn_http_server().await;
    let client = Client::dial(&server.url).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let res = client
        .call_with_cancel::<_, Value>(&cancel, "test_sleep", (1_000,))
        .await;
    assert!(matches!(res, Err(Error::Cancelled)));
}

#[tokio::test]
async fn calls_after_close_fail() {
    let server = spawn_http_server().await;
    let client = Client::dial(&server.url).await.unwrap();
    client.close();

    let res = client.call::<_, Value>("test_echo", (1,)).await;
    assert!(matches!(res, Err(Error::ClientClosed)));
}

#[tokio::test]
async fn dial_failure_is_a_transport_error() {
    // nothing listens here; request-per-call surfaces the failure on use
    let client = Client::dial("http://127.0.0.1:1").await.unwrap();
    let res = client.call::<_, Value>("test_echo", (1,)).await;
    assert!(matches!(res, Err(Error::Transport(_))));
}
