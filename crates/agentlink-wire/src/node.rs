//! MessagingNode: TCP listener and sender for the agent network.
//!
//! A [`MessagingNode`] binds a local TCP listener under the agent's identity.
//! Inbound connections carry envelope frames; each envelope is checked
//! (version, target, signature), acknowledged, and handed to the registered
//! [`EnvelopeHandler`] on its own task. Outbound, [`MessagingNode::send`]
//! signs an envelope, connects to the target's endpoint and waits only for the
//! transport acknowledgement.

use crate::address_book::AddressBook;
use crate::message::*;

use agentlink_types::identity::{self, BridgeIdentity};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Malformed agent address: {0}")]
    InvalidAddress(String),
    #[error("No known endpoint for agent {0}")]
    UnknownTarget(String),
    #[error("Envelope rejected ({code}): {message}")]
    Rejected { code: u16, message: String },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Messaging node is not running")]
    NotRunning,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Configuration for a MessagingNode.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host to bind the listener on.
    pub host: String,
    /// Port to bind (0 picks an ephemeral port).
    pub port: u16,
    /// Endpoint advertised to peers in `reply_endpoint`. Defaults to the bound
    /// address, with an unspecified IP replaced by loopback.
    pub advertise_endpoint: Option<String>,
    /// Bound on connect + acknowledge for sends, and on idle inbound reads.
    pub io_timeout: Duration,
    /// Senders whose `reply_endpoint` may be recorded in the address book.
    /// `None` learns from any verified sender, subject to the book's limit.
    pub learn_from: Option<HashSet<String>>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            advertise_endpoint: None,
            io_timeout: Duration::from_secs(10),
            learn_from: None,
        }
    }
}

/// Consumer of verified inbound envelopes.
///
/// Called on a dedicated task per envelope, after the sender has been
/// acknowledged. Implementations must not panic on bad payloads; the wire
/// layer only vouches for the envelope, not for what it carries.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
    async fn handle_envelope(&self, envelope: Envelope);
}

/// The local network endpoint of one agent.
pub struct MessagingNode {
    config: NodeConfig,
    identity: Arc<BridgeIdentity>,
    address_book: AddressBook,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    reply_endpoint: String,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl MessagingNode {
    /// Bind the listener and start accepting. The node is ready to receive
    /// once this returns `Ok`.
    pub async fn start(
        config: NodeConfig,
        identity: Arc<BridgeIdentity>,
        address_book: AddressBook,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let reply_endpoint = config
            .advertise_endpoint
            .clone()
            .unwrap_or_else(|| advertised_endpoint(local_addr));

        info!(
            "Wire: listening on {} (address={})",
            local_addr,
            identity.address()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let node = Arc::new(Self {
            config,
            identity,
            address_book,
            local_addr,
            reply_endpoint,
            running: AtomicBool::new(true),
            shutdown_tx,
        });

        let node_clone = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, node_clone, handler, shutdown_rx).await;
        });

        Ok((node, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This agent's network address.
    pub fn address(&self) -> &str {
        self.identity.address()
    }

    /// Endpoint peers should use to reach this node.
    pub fn reply_endpoint(&self) -> &str {
        &self.reply_endpoint
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting connections. Envelopes already handed to the handler
    /// run to completion.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Wire: shutting down node {}", self.identity.address());
        }
        let _ = self.shutdown_tx.send(true);
    }

    /// Sign and deliver `payload` to `target`. Returns the envelope ID once
    /// the target has acknowledged receipt; does not wait for any reply.
    pub async fn send(&self, target: &str, payload: serde_json::Value) -> Result<String, WireError> {
        if !self.is_running() {
            return Err(WireError::NotRunning);
        }
        if !identity::is_valid_address(target) {
            return Err(WireError::InvalidAddress(target.to_string()));
        }
        let endpoint = self
            .address_book
            .resolve(target)
            .ok_or_else(|| WireError::UnknownTarget(target.to_string()))?;

        let mut envelope = Envelope::new(self.address(), target, payload);
        envelope.reply_endpoint = Some(self.reply_endpoint.clone());
        envelope.sign(&self.identity);
        let id = envelope.id.clone();

        let timeout = self.config.io_timeout;
        let response = tokio::time::timeout(timeout, exchange(endpoint, Frame::Envelope(envelope)))
            .await
            .map_err(|_| WireError::Timeout(timeout))??;

        match response {
            Frame::Ack { id: acked } if acked == id => {
                debug!(envelope = %id, target = %target, %endpoint, "Wire: envelope delivered");
                Ok(id)
            }
            Frame::Reject { code, message, .. } => Err(WireError::Rejected { code, message }),
            other => Err(WireError::Protocol(format!(
                "unexpected frame in reply to envelope {id}: {other:?}"
            ))),
        }
    }

    /// Accept loop, run in a spawned task.
    async fn accept_loop(
        listener: TcpListener,
        node: Arc<MessagingNode>,
        handler: Arc<dyn EnvelopeHandler>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Wire: accepted connection from {}", addr);
                        let node = Arc::clone(&node);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_inbound(stream, addr, &handler).await {
                                debug!("Wire: inbound connection from {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Wire: accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        node.running.store(false, Ordering::SeqCst);
        info!("Wire: node {} stopped", node.address());
    }

    /// Serve one inbound connection until the peer closes it.
    async fn handle_inbound(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        handler: &Arc<dyn EnvelopeHandler>,
    ) -> Result<(), WireError> {
        let (mut reader, mut writer) = stream.into_split();
        loop {
            let frame = match tokio::time::timeout(self.config.io_timeout, read_frame(&mut reader))
                .await
            {
                Err(_) => return Err(WireError::Timeout(self.config.io_timeout)),
                Ok(Err(WireError::ConnectionClosed)) => return Ok(()),
                Ok(Err(WireError::Json(e))) => {
                    warn!("Wire: malformed frame from {}: {}", addr, e);
                    let reject = Frame::Reject {
                        id: String::new(),
                        code: 400,
                        message: format!("malformed frame: {e}"),
                    };
                    write_frame(&mut writer, &reject).await?;
                    return Err(WireError::Json(e));
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(frame)) => frame,
            };

            let response = match frame {
                Frame::Envelope(envelope) => self.accept_envelope(envelope, addr, handler),
                _ => Frame::Reject {
                    id: String::new(),
                    code: 400,
                    message: "expected an envelope frame".to_string(),
                },
            };
            write_frame(&mut writer, &response).await?;
        }
    }

    /// Check an inbound envelope and dispatch it. Returns the frame to send
    /// back to the peer.
    fn accept_envelope(
        &self,
        envelope: Envelope,
        addr: SocketAddr,
        handler: &Arc<dyn EnvelopeHandler>,
    ) -> Frame {
        let reject = |code: u16, message: String| {
            warn!(
                envelope = %envelope.id,
                sender = %envelope.sender,
                peer = %addr,
                code,
                "Wire: rejected envelope: {}",
                message
            );
            Frame::Reject {
                id: envelope.id.clone(),
                code,
                message,
            }
        };

        if !self.is_running() {
            return reject(503, "node is shutting down".to_string());
        }
        if envelope.version != PROTOCOL_VERSION {
            return reject(
                400,
                format!(
                    "protocol version mismatch: expected {}, got {}",
                    PROTOCOL_VERSION, envelope.version
                ),
            );
        }
        if envelope.target != self.address() {
            return reject(404, format!("no agent {} at this endpoint", envelope.target));
        }
        if !envelope.verify() {
            return reject(401, "signature verification failed".to_string());
        }

        if let Some(endpoint) = envelope
            .reply_endpoint
            .as_deref()
            .filter(|_| self.may_learn_from(&envelope.sender))
        {
            match endpoint.parse::<SocketAddr>() {
                Ok(endpoint) => {
                    self.address_book.learn(&envelope.sender, endpoint);
                }
                Err(_) => debug!(
                    sender = %envelope.sender,
                    "Wire: ignoring unparseable reply endpoint {}",
                    endpoint
                ),
            }
        }

        let ack = Frame::Ack {
            id: envelope.id.clone(),
        };
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            handler.handle_envelope(envelope).await;
        });
        ack
    }

    fn may_learn_from(&self, sender: &str) -> bool {
        self.config
            .learn_from
            .as_ref()
            .map_or(true, |allowed| allowed.contains(sender))
    }
}

fn advertised_endpoint(local_addr: SocketAddr) -> String {
    let ip = if local_addr.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        local_addr.ip()
    };
    SocketAddr::new(ip, local_addr.port()).to_string()
}

/// Connect, send one frame and read one frame back.
async fn exchange(endpoint: SocketAddr, frame: Frame) -> Result<Frame, WireError> {
    let stream = TcpStream::connect(endpoint).await?;
    let (mut reader, mut writer) = stream.into_split();
    write_frame(&mut writer, &frame).await?;
    read_frame(&mut reader).await
}

/// Write a framed message (4-byte length + JSON).
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON).
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let frame = decode_frame(&body)?;
    Ok(frame)
}
