//! BridgeKernel: owns the messaging side of a running bridge.
//!
//! Boot wires the correlation table, inbound listener, messaging node and
//! relay together and starts the expiry sweeper. The RPC front door only
//! ever talks to the [`Relay`].

use crate::correlation::CorrelationTable;
use crate::error::{BridgeError, BridgeResult};
use crate::listener::InboundListener;
use crate::messenger::WireMessenger;
use crate::relay::Relay;
use agentlink_types::{BridgeConfig, BridgeIdentity};
use agentlink_wire::{AddressBook, MessagingNode, NodeConfig};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct BridgeKernel {
    config: BridgeConfig,
    identity: Arc<BridgeIdentity>,
    table: Arc<CorrelationTable>,
    listener: Arc<InboundListener>,
    node: Arc<MessagingNode>,
    relay: Arc<Relay>,
    booted_at: Instant,
    sweeper_stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeKernel {
    /// Start the messaging node and the sweeper. The bridge can send and
    /// receive envelopes once this returns.
    pub async fn boot(
        config: BridgeConfig,
        identity: Arc<BridgeIdentity>,
    ) -> BridgeResult<Arc<Self>> {
        let table = Arc::new(CorrelationTable::new());
        let listener = Arc::new(InboundListener::new(
            Arc::clone(&table),
            Some(config.target_agent_address.clone()),
        ));
        let address_book = AddressBook::with_endpoints(config.endpoints.clone());

        let node_config = NodeConfig {
            host: config.host.clone(),
            port: config.messaging_port,
            learn_from: Some(HashSet::from([config.target_agent_address.clone()])),
            ..NodeConfig::default()
        };
        let (node, accept_handle) = MessagingNode::start(
            node_config,
            Arc::clone(&identity),
            address_book,
            listener.clone(),
        )
        .await
        .map_err(|e| {
            BridgeError::Startup(format!(
                "messaging node on {}:{}: {e}",
                config.host, config.messaging_port
            ))
        })?;

        let messenger = Arc::new(WireMessenger::new(Arc::clone(&node)));
        let relay = Arc::new(Relay::new(
            Arc::clone(&table),
            messenger,
            config.target_agent_address.clone(),
            config.reply_timeout,
        ));

        let (sweeper_stop, stop_rx) = watch::channel(false);
        let sweeper = spawn_sweeper(Arc::clone(&table), config.sweep_interval, stop_rx);

        info!(
            bridge = %identity.address(),
            target = %config.target_agent_address,
            messaging = %node.local_addr(),
            "Bridge kernel booted"
        );

        Ok(Arc::new(Self {
            config,
            identity,
            table,
            listener,
            node,
            relay,
            booted_at: Instant::now(),
            sweeper_stop,
            tasks: Mutex::new(vec![accept_handle, sweeper]),
        }))
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn node(&self) -> &Arc<MessagingNode> {
        &self.node
    }

    /// The bridge's own network address.
    pub fn address(&self) -> &str {
        self.identity.address()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<BridgeIdentity> {
        &self.identity
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub fn listener(&self) -> &Arc<InboundListener> {
        &self.listener
    }

    pub fn uptime(&self) -> Duration {
        self.booted_at.elapsed()
    }

    /// Refuse new RPC calls.
    pub fn begin_drain(&self) {
        self.relay.begin_drain();
    }

    /// Wait until no call is pending, or `timeout` passes. Returns whether
    /// the table emptied in time.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.table.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Fail every remaining call with a timeout.
    pub fn expire_in_flight(&self) -> usize {
        let expired = self.table.expire_all();
        if expired > 0 {
            warn!(expired, "Expired in-flight calls at shutdown");
        }
        expired
    }

    /// Stop the sweeper and the messaging node and wait for their tasks.
    pub async fn stop(&self) {
        let _ = self.sweeper_stop.send(true);
        self.node.shutdown();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Kernel task ended abnormally");
            }
        }
        info!(bridge = %self.identity.address(), "Bridge kernel stopped");
    }
}

fn spawn_sweeper(
    table: Arc<CorrelationTable>,
    every: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = table.sweep_expired(tokio::time::Instant::now());
                    if swept > 0 {
                        debug!(swept, "Swept expired correlation entries");
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlink_wire::{Envelope, EnvelopeHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn test_config(target: &str, endpoints: BTreeMap<String, std::net::SocketAddr>) -> BridgeConfig {
        BridgeConfig {
            target_agent_address: target.to_string(),
            display_name: "test bridge".to_string(),
            description: "test".to_string(),
            skill_tags: BTreeSet::new(),
            skill_examples: Vec::new(),
            rpc_port: 0,
            messaging_port: 0,
            host: "127.0.0.1".to_string(),
            reply_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
            sweep_interval: Duration::from_millis(50),
            seed: None,
            require_seed: false,
            endpoints,
        }
    }

    /// Agent that answers every query with its uppercased text.
    struct ShoutingAgent {
        node: tokio::sync::OnceCell<Arc<MessagingNode>>,
    }

    #[async_trait]
    impl EnvelopeHandler for ShoutingAgent {
        async fn handle_envelope(&self, envelope: Envelope) {
            let token = envelope.payload["token"].as_str().unwrap_or_default();
            let text = envelope.payload["query_text"].as_str().unwrap_or_default();
            let reply = json!({
                "type": "reply",
                "token": token,
                "reply_text": text.to_uppercase(),
            });
            if let Some(node) = self.node.get() {
                node.send(&envelope.sender, reply).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_boot_relay_stop() {
        let agent_identity = Arc::new(BridgeIdentity::from_seed("kernel-test-agent").unwrap());
        let agent = Arc::new(ShoutingAgent {
            node: tokio::sync::OnceCell::new(),
        });
        let (agent_node, _agent_task) = MessagingNode::start(
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
        let config = test_config(agent_identity.address(), endpoints);
        let identity = Arc::new(BridgeIdentity::from_seed("kernel-test-bridge").unwrap());

        let kernel = BridgeKernel::boot(config, identity).await.unwrap();
        assert!(kernel.address().starts_with("agent1"));
        assert_ne!(kernel.address(), agent_identity.address());

        let reply = kernel.relay().relay("hello paris").await.unwrap();
        assert_eq!(reply, "HELLO PARIS");
        assert!(kernel.correlation().is_empty());
        assert_eq!(kernel.listener().resolved_count(), 1);

        kernel.stop().await;
        assert!(!kernel.node().is_running());
        agent_node.shutdown();
    }

    #[tokio::test]
    async fn test_wait_for_idle_and_expire() {
        let config = test_config("agent1nobody", BTreeMap::new());
        let identity = Arc::new(BridgeIdentity::from_seed("kernel-idle").unwrap());
        let kernel = BridgeKernel::boot(config, identity).await.unwrap();

        assert!(kernel.wait_for_idle(Duration::from_millis(10)).await);

        let pending = kernel.correlation().register(Duration::from_secs(30));
        assert!(!kernel.wait_for_idle(Duration::from_millis(60)).await);
        assert_eq!(kernel.expire_in_flight(), 1);
        assert!(matches!(
            kernel.correlation().await_result(pending).await,
            Err(BridgeError::Timeout(_))
        ));

        kernel.begin_drain();
        assert!(matches!(
            kernel.relay().relay("late").await,
            Err(BridgeError::ShuttingDown)
        ));
        kernel.stop().await;
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_entries() {
        let config = test_config("agent1nobody", BTreeMap::new());
        let identity = Arc::new(BridgeIdentity::from_seed("kernel-sweep").unwrap());
        let kernel = BridgeKernel::boot(config, identity).await.unwrap();

        let pending = kernel.correlation().register(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!kernel.correlation().contains(pending.token()));
        kernel.stop().await;
    }

    #[tokio::test]
    async fn test_stranger_endpoints_not_recorded() {
        use agentlink_wire::node::{read_frame, write_frame};
        use agentlink_wire::Frame;

        let target = BridgeIdentity::from_seed("kernel-known-agent").unwrap();
        let config = test_config(target.address(), BTreeMap::new());
        let identity = Arc::new(BridgeIdentity::from_seed("kernel-strangers").unwrap());
        let kernel = BridgeKernel::boot(config, identity).await.unwrap();

        for i in 0..40u16 {
            let stranger = BridgeIdentity::from_seed(&format!("kernel-stranger-{i}")).unwrap();
            let payload = json!({"type": "reply", "token": "nope", "reply_text": "x"});
            let mut envelope = Envelope::new("", kernel.address(), payload);
            envelope.reply_endpoint = Some(format!("127.0.0.1:{}", 30000 + i));
            envelope.sign(&stranger);

            let stream = tokio::net::TcpStream::connect(kernel.node().local_addr())
                .await
                .unwrap();
            let (mut reader, mut writer) = stream.into_split();
            write_frame(&mut writer, &Frame::Envelope(envelope))
                .await
                .unwrap();
            let response = read_frame(&mut reader).await.unwrap();
            assert!(matches!(response, Frame::Ack { .. }));
        }
        assert!(kernel.node().address_book().is_empty());

        let mut envelope = Envelope::new("", kernel.address(), json!({"type": "reply"}));
        envelope.reply_endpoint = Some("127.0.0.1:30999".to_string());
        envelope.sign(&target);
        let stream = tokio::net::TcpStream::connect(kernel.node().local_addr())
            .await
            .unwrap();
        let (mut reader, mut writer) = stream.into_split();
        write_frame(&mut writer, &Frame::Envelope(envelope))
            .await
            .unwrap();
        read_frame(&mut reader).await.unwrap();
        assert_eq!(kernel.node().address_book().len(), 1);

        kernel.stop().await;
    }

    #[tokio::test]
    async fn test_boot_fails_on_taken_port() {
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config("agent1nobody", BTreeMap::new());
        config.messaging_port = blocker.local_addr().unwrap().port();
        let identity = Arc::new(BridgeIdentity::from_seed("kernel-port").unwrap());

        assert!(matches!(
            BridgeKernel::boot(config, identity).await,
            Err(BridgeError::Startup(_))
        ));
    }
}
