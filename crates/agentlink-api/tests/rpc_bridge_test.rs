//! End-to-end tests for the bridge.
//!
//! Each test starts a real scripted agent on the messaging network and a
//! real bridge (RPC listener + messaging node) on 127.0.0.1, then drives the
//! bridge over HTTP with reqwest.

use agentlink_api::{BridgeServer, RunningBridge};
use agentlink_kernel::ShutdownPhase;
use agentlink_types::{BridgeConfig, BridgeIdentity};
use agentlink_wire::{AddressBook, Envelope, EnvelopeHandler, MessagingNode, NodeConfig};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

// ---------------------------------------------------------------------------
// Scripted agent
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Script {
    /// Reply with fixed text.
    Fixed(&'static str),
    /// Reply with the query text, after a delay.
    Echo(Duration),
    /// Answer with an error payload.
    Fail(&'static str),
    /// Never answer.
    Silent,
}

struct ScriptedAgent {
    script: Script,
    node: OnceCell<Arc<MessagingNode>>,
    /// Payloads of every envelope received.
    received: Mutex<Vec<Value>>,
}

#[async_trait]
impl EnvelopeHandler for ScriptedAgent {
    async fn handle_envelope(&self, envelope: Envelope) {
        self.received
            .lock()
            .unwrap()
            .push(envelope.payload.clone());

        let token = envelope.payload["token"].as_str().unwrap_or_default().to_string();
        let query = envelope.payload["query_text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let reply = match &self.script {
            Script::Fixed(text) => json!({"type": "reply", "token": token, "reply_text": text}),
            Script::Echo(delay) => {
                tokio::time::sleep(*delay).await;
                json!({"type": "reply", "token": token, "reply_text": query})
            }
            Script::Fail(text) => json!({"type": "error", "token": token, "error_text": text}),
            Script::Silent => return,
        };
        let node = self.node.get().expect("agent node set");
        node.send(&envelope.sender, reply).await.unwrap();
    }
}

struct Harness {
    agent: Arc<ScriptedAgent>,
    agent_node: Arc<MessagingNode>,
    bridge: RunningBridge,
    client: reqwest::Client,
}

impl Harness {
    async fn start(script: Script, reply_timeout: Duration) -> Self {
        let agent_identity = Arc::new(BridgeIdentity::from_seed(&fresh_seed()).unwrap());
        let agent = Arc::new(ScriptedAgent {
            script,
            node: OnceCell::new(),
            received: Mutex::new(Vec::new()),
        });
        let (agent_node, _task) = MessagingNode::start(
            NodeConfig::default(),
            Arc::clone(&agent_identity),
            AddressBook::new(),
            agent.clone(),
        )
        .await
        .unwrap();
        agent.node.set(Arc::clone(&agent_node)).ok();

        let mut endpoints = BTreeMap::new();
        endpoints.insert(agent_identity.address().to_string(), agent_node.local_addr());
        let config = bridge_config(agent_identity.address(), endpoints, reply_timeout);
        let identity = Arc::new(BridgeIdentity::from_seed(&fresh_seed()).unwrap());
        let bridge = BridgeServer::start(config, identity).await.unwrap();

        Self {
            agent,
            agent_node,
            bridge,
            client: reqwest::Client::new(),
        }
    }

    async fn query(&self, text: &str, id: Value) -> Value {
        rpc(&self.client, self.bridge.base_url(), text, id).await
    }

    async fn stop(self) {
        self.bridge.shutdown().await;
        self.agent_node.shutdown();
    }
}

fn bridge_config(
    target: &str,
    endpoints: BTreeMap<String, std::net::SocketAddr>,
    reply_timeout: Duration,
) -> BridgeConfig {
    BridgeConfig {
        target_agent_address: target.to_string(),
        display_name: "Airbnb Agent".to_string(),
        description: "Finds rentals".to_string(),
        skill_tags: BTreeSet::from(["travel".to_string()]),
        skill_examples: vec!["find rentals in Paris".to_string()],
        rpc_port: 0,
        messaging_port: 0,
        host: "127.0.0.1".to_string(),
        reply_timeout,
        drain_timeout: Duration::from_secs(2),
        sweep_interval: Duration::from_secs(1),
        seed: None,
        require_seed: false,
        endpoints,
    }
}

fn fresh_seed() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!(
        "rpc-bridge-test-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

async fn rpc(client: &reqwest::Client, base_url: &str, text: &str, id: Value) -> Value {
    let response = client
        .post(format!("{base_url}/"))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": "query",
            "params": {"query": text},
            "id": id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_query_round_trip() {
    let harness = Harness::start(Script::Fixed("3 listings found"), Duration::from_secs(5)).await;

    let body = harness.query("find rentals in Paris", json!(1)).await;
    assert_eq!(
        body,
        json!({"jsonrpc": "2.0", "result": {"reply_text": "3 listings found"}, "id": 1})
    );

    // The agent saw exactly one query carrying the original text and a token.
    {
        let received = harness.agent.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "query");
        assert_eq!(received[0]["query_text"], "find rentals in Paris");
        assert!(!received[0]["token"].as_str().unwrap().is_empty());
    }
    assert!(harness.bridge.kernel().correlation().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_timeout_then_late_reply_dropped() {
    let harness = Harness::start(Script::Silent, Duration::from_millis(300)).await;

    let body = harness.query("find rentals in Paris", json!(1)).await;
    assert_eq!(body["error"]["code"], -32001);
    assert_eq!(body["id"], 1);
    assert!(body.get("result").is_none());
    assert!(harness.bridge.kernel().correlation().is_empty());

    // Reply after the deadline: acknowledged by the wire, dropped by the bridge.
    let token = harness.agent.received.lock().unwrap()[0]["token"]
        .as_str()
        .unwrap()
        .to_string();
    harness
        .agent_node
        .send(
            harness.bridge.bridge_address(),
            json!({"type": "reply", "token": token, "reply_text": "too late"}),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let listener = harness.bridge.kernel().listener();
    assert_eq!(listener.resolved_count(), 0);
    assert_eq!(listener.dropped_count(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_agent_error_reply() {
    let harness = Harness::start(Script::Fail("upstream unavailable"), Duration::from_secs(5)).await;

    let body = harness.query("stock price of ACME", json!("req-7")).await;
    assert_eq!(body["error"]["code"], -32002);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("upstream unavailable"));
    assert_eq!(body["id"], "req-7");

    harness.stop().await;
}

#[tokio::test]
async fn test_concurrent_calls_get_their_own_replies() {
    let harness = Harness::start(Script::Echo(Duration::from_millis(50)), Duration::from_secs(5)).await;
    let base_url = harness.bridge.base_url().to_string();

    let mut calls = Vec::new();
    for i in 0..20 {
        let client = harness.client.clone();
        let base_url = base_url.clone();
        calls.push(tokio::spawn(async move {
            let body = rpc(&client, &base_url, &format!("query number {i}"), json!(i)).await;
            (i, body)
        }));
    }
    for call in calls {
        let (i, body) = call.await.unwrap();
        assert_eq!(body["id"], i);
        assert_eq!(body["result"]["reply_text"], format!("query number {i}"));
    }
    assert!(harness.bridge.kernel().correlation().is_empty());
    assert_eq!(harness.bridge.kernel().listener().resolved_count(), 20);

    harness.stop().await;
}

#[tokio::test]
async fn test_unreachable_target_is_internal_error() {
    let config = bridge_config(
        &BridgeIdentity::from_seed("nobody-listens").unwrap().address().to_string(),
        BTreeMap::new(),
        Duration::from_secs(5),
    );
    let identity = Arc::new(BridgeIdentity::from_seed(&fresh_seed()).unwrap());
    let bridge = BridgeServer::start(config, identity).await.unwrap();
    let client = reqwest::Client::new();

    let body = rpc(&client, bridge.base_url(), "hello?", json!(5)).await;
    assert_eq!(body["error"]["code"], -32603);
    assert_eq!(body["id"], 5);
    assert!(bridge.kernel().correlation().is_empty());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_agent_card_and_health() {
    let harness = Harness::start(Script::Fixed("ok"), Duration::from_secs(5)).await;
    let base_url = harness.bridge.base_url();

    let card: Value = harness
        .client
        .get(format!("{base_url}/.well-known/agent.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(card["name"], "Airbnb Agent");
    assert_eq!(card["url"], format!("{base_url}/"));
    assert_eq!(card["skills"][0]["tags"], json!(["travel"]));
    assert_eq!(card["skills"][0]["examples"], json!(["find rentals in Paris"]));

    let health: Value = harness
        .client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["bridge_address"], harness.bridge.bridge_address());
    assert_eq!(health["agent_address"], harness.agent_node.address());

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_call_finish() {
    let harness = Harness::start(Script::Echo(Duration::from_millis(300)), Duration::from_secs(5)).await;
    let client = harness.client.clone();
    let base_url = harness.bridge.base_url().to_string();

    let call = tokio::spawn(async move { rpc(&client, &base_url, "still there?", json!(9)).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.bridge.kernel().correlation().len(), 1);

    let Harness {
        bridge, agent_node, ..
    } = harness;
    let status = bridge.shutdown().await;

    let body = call.await.unwrap();
    assert_eq!(body["result"]["reply_text"], "still there?");
    assert_eq!(status.current_phase, ShutdownPhase::Complete);
    assert!(status.phases_completed.iter().all(|p| p.success));
    agent_node.shutdown();
}

#[tokio::test]
async fn test_shutdown_expires_stuck_calls() {
    let harness = Harness::start(Script::Silent, Duration::from_secs(30)).await;
    let client = harness.client.clone();
    let base_url = harness.bridge.base_url().to_string();

    let call = tokio::spawn(async move { rpc(&client, &base_url, "anyone?", json!(4)).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let Harness {
        bridge, agent_node, ..
    } = harness;
    let status = bridge.shutdown().await;

    let body = call.await.unwrap();
    assert_eq!(body["error"]["code"], -32001);
    assert_eq!(body["id"], 4);
    let waiting = status
        .phases_completed
        .iter()
        .find(|p| p.phase == ShutdownPhase::WaitingForCalls)
        .unwrap();
    assert!(!waiting.success);
    agent_node.shutdown();
}

#[tokio::test]
async fn test_rpc_bind_failure_aborts_messaging_side() {
    let rpc_blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let messaging_port = {
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };

    let target = BridgeIdentity::from_seed(&fresh_seed()).unwrap();
    let mut config = bridge_config(target.address(), BTreeMap::new(), Duration::from_secs(1));
    config.rpc_port = rpc_blocker.local_addr().unwrap().port();
    config.messaging_port = messaging_port;
    let identity = Arc::new(BridgeIdentity::from_seed(&fresh_seed()).unwrap());

    match BridgeServer::start(config, identity).await {
        Err(agentlink_kernel::BridgeError::Startup(message)) => {
            assert!(message.contains("RPC listener"), "unexpected message: {message}");
        }
        Err(other) => panic!("expected a startup error, got {other}"),
        Ok(_) => panic!("bridge started on a taken RPC port"),
    }

    // The messaging node was stopped, so its port is free again.
    tokio::net::TcpListener::bind(("127.0.0.1", messaging_port))
        .await
        .unwrap();
}
