//! End-to-end tests: real WebSocket clients against the multiplexer, with either
//! the real generation worker thread or a hand-driven stand-in for it.

use futures::{SinkExt, StreamExt};
use quill_common::config::{CoordinatorConfig, SamplingConfig};
use quill_common::Result;
use quill_coordinator::{ConnectionRegistry, Multiplexer, ResultRouter};
use quill_proto::{ConnectionId, GenerationRequest, GenerationResponse, ServerMessage};
use quill_worker::{GenerationSettings, Generator, LanguageModel, Sampler, SamplingPolicies, TokenId, Vocabulary, WorkerService};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const UNKNOWN: &str = "\u{e083}";
const TIMEOUT: Duration = Duration::from_secs(5);

/// Predicts the last token of the window again
struct RepeatModel;

impl LanguageModel for RepeatModel {
    fn vocab_size(&self) -> usize {
        5
    }

    fn next_token_logits(&mut self, window: &[TokenId]) -> Result<Vec<f32>> {
        let mut logits = vec![f32::NEG_INFINITY; 5];
        logits[*window.last().unwrap() as usize] = 0.0;
        Ok(logits)
    }
}

fn repeat_generator(tokens_per_request: usize) -> Generator<RepeatModel> {
    let vocab = Vocabulary::from_pairs(vec![(0, "\n"), (1, "a"), (2, "b"), (3, "c"), (4, UNKNOWN)], UNKNOWN).unwrap();
    let settings = GenerationSettings {
        context_window: 8,
        tokens_per_request,
        policies: SamplingPolicies::from(&SamplingConfig::default()),
    };
    Generator::new(RepeatModel, vocab, settings, Sampler::new(Some(1))).unwrap()
}

async fn spawn_multiplexer(
    registry: ConnectionRegistry,
    requests: mpsc::UnboundedSender<GenerationRequest>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let multiplexer = Multiplexer::new(registry, requests, &CoordinatorConfig::default());
    tokio::spawn(multiplexer.serve(listener));
    addr
}

/// Multiplexer wired to a real worker thread
async fn spawn_server(tokens_per_request: usize) -> (SocketAddr, ConnectionRegistry) {
    let registry = ConnectionRegistry::new();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    WorkerService::spawn(repeat_generator(tokens_per_request), request_rx, response_tx).unwrap();
    ResultRouter::new(registry.clone(), response_rx).spawn();

    let addr = spawn_multiplexer(registry.clone(), request_tx).await;
    (addr, registry)
}

async fn connect(addr: SocketAddr) -> (Client, ConnectionId) {
    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let greeting = next_text(&mut client).await;
    let hex = greeting.strip_prefix("id_").expect("assigned id message");
    assert_eq!(hex.len(), 20);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    (client, hex.parse().unwrap())
}

async fn next_text(client: &mut Client) -> String {
    let message = tokio::time::timeout(TIMEOUT, client.next())
        .await
        .expect("no message within timeout")
        .expect("stream ended")
        .expect("transport error");
    message.into_text().unwrap()
}

async fn send(client: &mut Client, text: &str) {
    client.send(Message::Text(text.to_string())).await.unwrap();
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

#[tokio::test]
async fn test_single_client_gets_one_result() {
    let tokens_per_request = 4;
    let (addr, registry) = spawn_server(tokens_per_request).await;
    let (mut client, id) = connect(addr).await;
    assert!(registry.contains(&id));

    send(&mut client, r#"{"op":"get","txt":"abc"}"#).await;

    let reply: ServerMessage = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(reply.op, "TXT");
    assert_eq!(reply.txt.chars().count(), tokens_per_request);
    assert_eq!(reply.txt, "cccc");

    // Exactly one result per request
    let extra = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(extra.is_err(), "unexpected second message: {:?}", extra);
}

#[tokio::test]
async fn test_noise_is_ignored_and_connection_stays_open() {
    let (addr, _registry) = spawn_server(3).await;
    let (mut client, _) = connect(addr).await;

    send(&mut client, "[PONG]").await;
    send(&mut client, "{not json").await;
    send(&mut client, r#"{"txt":"missing op"}"#).await;
    send(&mut client, r#"{"op":"stats"}"#).await;
    client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    send(&mut client, r#"{"op":"GET","txt":"b"}"#).await;

    assert_eq!(next_text(&mut client).await, r#"{"op":"TXT","txt":"bbb"}"#);
}

#[tokio::test]
async fn test_concurrent_clients_receive_their_own_results() {
    let (addr, _registry) = spawn_server(5).await;
    let (mut first, _) = connect(addr).await;
    let (mut second, _) = connect(addr).await;

    send(&mut first, r#"{"op":"get","txt":"a"}"#).await;
    send(&mut second, r#"{"op":"get","txt":"b"}"#).await;
    send(&mut first, r#"{"op":"get","txt":"xa"}"#).await;

    assert_eq!(next_text(&mut second).await, r#"{"op":"TXT","txt":"bbbbb"}"#);
    assert_eq!(next_text(&mut first).await, r#"{"op":"TXT","txt":"aaaaa"}"#);
    assert_eq!(next_text(&mut first).await, r#"{"op":"TXT","txt":"aaaaa"}"#);
}

#[tokio::test]
async fn test_result_for_disconnected_client_is_dropped() {
    let registry = ConnectionRegistry::new();
    let (request_tx, mut request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    ResultRouter::new(registry.clone(), response_rx).spawn();
    let addr = spawn_multiplexer(registry.clone(), request_tx).await;

    let (mut leaving, leaving_id) = connect(addr).await;
    let (mut staying, staying_id) = connect(addr).await;

    send(&mut leaving, r#"{"op":"get","txt":"bye"}"#).await;
    let request = tokio::time::timeout(TIMEOUT, request_rx.recv()).await.unwrap().unwrap();
    assert_eq!(request.connection_id, leaving_id);
    assert_eq!(request.text, "bye");

    leaving.close(None).await.unwrap();
    wait_until(|| !registry.contains(&leaving_id)).await;
    assert_eq!(registry.len(), 1);

    response_tx
        .send(GenerationResponse {
            connection_id: leaving_id,
            payload: ServerMessage::text("late").to_json().unwrap(),
        })
        .unwrap();

    send(&mut staying, r#"{"op":"get","txt":"hi"}"#).await;
    let request = tokio::time::timeout(TIMEOUT, request_rx.recv()).await.unwrap().unwrap();
    assert_eq!(request.connection_id, staying_id);

    response_tx
        .send(GenerationResponse {
            connection_id: staying_id,
            payload: ServerMessage::text("welcome").to_json().unwrap(),
        })
        .unwrap();

    assert_eq!(next_text(&mut staying).await, r#"{"op":"TXT","txt":"welcome"}"#);
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let (addr, registry) = spawn_server(2).await;
    let (client, id) = connect(addr).await;
    assert_eq!(registry.len(), 1);

    drop(client);

    wait_until(|| registry.is_empty()).await;
    assert!(!registry.contains(&id));
}
