#![allow(clippy::unwrap_used)]
// Runs the full controller against an in-process websocket server that
// plays the coordination server's side of the bootstrap.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use ncontrol_api::{Frame, FrameKind, events};
use ncontrol_core::{AgentConfig, CommunicatorRegistry, Controller, EntityId, builtin_packages};

/// Reply to a `get-data` request the way the server would.
fn get_data_reply(data: &Value) -> Value {
    match data["table"].as_str().unwrap() {
        "endpoints" => json!({ "add": { "endpoints": { "E1": {
            "_id": "E1", "endpointType_id": "T1", "enabled": true, "ip": "10.0.0.5", "port": 23
        } } } }),
        "endpoint_types" => json!({ "add": { "endpoint_types": { "T1": {
            "_id": "T1", "communicatorClass": "StubCommunicator"
        } } } }),
        _ => json!({ "add": { "controls": {} } }),
    }
}

#[tokio::test]
async fn test_controller_bootstraps_stub_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut seen = Vec::new();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let frame = Frame::decode(&text).unwrap();
            match frame.kind() {
                FrameKind::Request { event, ack } => {
                    seen.push(event.to_owned());
                    let reply = if event == events::GET_DATA {
                        get_data_reply(&frame.data)
                    } else {
                        json!({})
                    };
                    let done = event == events::UPDATE_DATA;
                    let status = frame.data["set"]["epStatus"].clone();
                    ws.send(Message::text(Frame::ack(ack, reply).encode().unwrap()))
                        .await
                        .unwrap();
                    if done {
                        return (seen, status);
                    }
                }
                FrameKind::Event(event) => seen.push(event.to_owned()),
                _ => {}
            }
        }
        panic!("client went away before reporting status");
    });

    let mut config = AgentConfig::new(
        server_url,
        EntityId::from("E1"),
        SecretString::from("agent".to_owned()),
    );
    config.io_path = "/socket.io".into();
    config.request_timeout = Duration::from_secs(5);

    let registry = CommunicatorRegistry::discover(&builtin_packages());
    let controller = Controller::new(config, registry);
    let store = controller.store();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(controller.run(cancel.clone()));

    let (seen, status) = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("bootstrap did not finish")
        .unwrap();

    assert_eq!(
        seen,
        vec![
            events::GET_DATA,
            events::REGISTER_ENDPOINT,
            events::GET_DATA,
            events::GET_DATA,
            events::UPDATE_DATA,
        ]
    );
    assert_eq!(status["connected"], json!(true));
    assert!(store.endpoint(&EntityId::from("E1")).is_some());

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok(), "controller failed: {result:?}");
}
