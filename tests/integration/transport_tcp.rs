//! Broker served over a TCP socket

use crate::integration::test_utils::{contract_names, start_broker, FakeLoader, VERSION};
use serde_json::{json, Value};
use solc_broker::client::ClientHandle;
use solc_broker::protocol::Version;
use solc_broker::transport;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn serve_on_ephemeral_port() -> std::net::SocketAddr {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(transport::serve(listener, broker));
    addr
}

#[tokio::test]
async fn test_client_compiles_over_tcp() {
    let addr = serve_on_ephemeral_port().await;
    let client = ClientHandle::new(transport::connect(addr).await.unwrap(), VERSION);

    client.wait_ready(&Version::from(VERSION)).await.unwrap();
    let output = client.compile_contract("contract Remote {}").await.unwrap();
    assert_eq!(contract_names(&output), vec!["Remote"]);
}

#[tokio::test]
async fn test_raw_socket_speaks_line_delimited_json() {
    let addr = serve_on_ephemeral_port().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // malformed traffic is skipped without closing the connection
    writer.write_all(b"not json\n").await.unwrap();
    writer
        .write_all(b"{\"action\":\"compile\",\"version\":\"0.8.20\"}\n")
        .await
        .unwrap();

    let compile = json!({
        "action": "compile",
        "version": VERSION,
        "requestId": 7,
        "input": {
            "language": "Solidity",
            "sources": {"Raw.sol": {"content": "contract Raw {}"}}
        }
    });
    writer
        .write_all(format!("{}\n", compile).as_bytes())
        .await
        .unwrap();

    loop {
        let line = lines.next_line().await.unwrap().unwrap();
        let event: Value = serde_json::from_str(&line).unwrap();
        match event["action"].as_str() {
            Some("ready") => assert_eq!(event["version"], VERSION),
            Some("out") => {
                assert_eq!(event["requestId"], 7);
                assert!(event["output"]["contracts"]["Raw.sol"]["Raw"].is_object());
                break;
            }
            other => panic!("unexpected event {:?}: {}", other, line),
        }
    }
}
