//! TCP server implementation.
//!
//! Each connection gets a reader pump (this module) and a writer task fed
//! by an unbounded frame queue. Inbound faults never kill the process:
//! codec errors are answered as fault frames at the request boundary, and
//! a frame whose declared payload exceeds the configured maximum is
//! rejected and drained without ever decoding (or buffering) the body.

use crate::context::{EndpointDescription, RequestContext};
use crate::error::ServerError;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use uarpc_trust::{ApplicationDescription, Certificate, TrustDecision, TrustGate, ValidationChecks};
use uarpc_wire::{
    EncodingContext, FaultMessage, Frame, FrameHeader, FrameKind, OpenRequest, OpenResponse,
    RequestMessage, ResponseMessage, SecurityHeader, StatusCode, FRAME_HEADER_SIZE,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Channel lifetime granted to clients, in milliseconds.
    pub channel_lifetime_ms: u32,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Encoding context (limits, namespaces, registry).
    pub context: EncodingContext,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", uarpc_wire::DEFAULT_PORT)
                .parse()
                .expect("default bind address"),
            max_connections: 1000,
            channel_lifetime_ms: 600_000,
            idle_timeout: Duration::from_secs(300),
            context: EncodingContext::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: EncodingContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub faults_total: AtomicU64,
}

/// Handler of service requests.
///
/// A handler must cause exactly one response per request through the
/// context; the connection pump sends an unexpected-error fault if it
/// returns without responding.
pub trait ServiceHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &RequestContext, request: RequestMessage);
}

/// Diagnostic handler that answers every request with its own body.
#[derive(Debug, Default)]
pub struct LoopbackHandler;

impl ServiceHandler for LoopbackHandler {
    fn handle(&self, ctx: &RequestContext, request: RequestMessage) {
        if let Err(e) = ctx.send_response(ResponseMessage::new(request.body)) {
            tracing::warn!(error = %e, "Loopback response failed");
        }
    }
}

/// TCP server for uarpc.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn ServiceHandler>,
    trust_gate: Arc<dyn TrustGate>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    next_channel_id: Arc<AtomicU32>,
    bound_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        handler: Arc<dyn ServiceHandler>,
        trust_gate: Arc<dyn TrustGate>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            trust_gate,
            registry: Arc::new(ConnectionRegistry::new()),
            stats: Arc::new(ServerStats::default()),
            shutdown,
            running: AtomicBool::new(false),
            next_channel_id: Arc::new(AtomicU32::new(1)),
            bound_addr: parking_lot::Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// The address actually bound, once `run` has started listening.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    /// Signals the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        *self.bound_addr.lock() = Some(listener.local_addr()?);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(addr = %listener.local_addr()?, "Server listening");

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => tracing::error!(error = %e, "Accept error"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!(%addr, "Connection limit reached, rejecting");
            return;
        }
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let connection = ConnectionTask {
            config: self.config.clone(),
            handler: self.handler.clone(),
            trust_gate: self.trust_gate.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            next_channel_id: self.next_channel_id.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        tokio::spawn(async move {
            tracing::info!(%addr, "Client connected");
            if let Err(e) = connection.run(stream, addr).await {
                tracing::debug!(%addr, error = %e, "Connection ended with error");
            }
            tracing::info!(%addr, "Client disconnected");
        });
    }
}

/// Per-connection state for the reader pump.
struct ConnectionTask {
    config: ServerConfig,
    handler: Arc<dyn ServiceHandler>,
    trust_gate: Arc<dyn TrustGate>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ServerStats>,
    next_channel_id: Arc<AtomicU32>,
    shutdown: broadcast::Receiver<()>,
}

impl ConnectionTask {
    async fn run(mut self, stream: TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
        stream.set_nodelay(true).ok();
        let (mut reader, mut writer) = stream.into_split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let limits = self.config.context.limits;
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let encoded = match frame.encode(&limits) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping unencodable outbound frame");
                        continue;
                    }
                };
                if writer.write_all(&encoded).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let endpoint = Arc::new(EndpointDescription {
            endpoint_url: format!("uarpc://{}", self.config.bind_addr),
            security: SecurityHeader::default(),
        });

        let mut buf = BytesMut::with_capacity(8 * 1024);
        let mut chunk = vec![0u8; 8 * 1024];
        // Bytes of an oversized payload still to be discarded unread.
        let mut drain_remaining: usize = 0;
        let mut connection: Option<Arc<ConnectionHandle>> = None;

        let outcome = loop {
            // Drain and dispatch whatever is buffered.
            match self.pump(
                &mut buf,
                &mut drain_remaining,
                &mut connection,
                &outbound_tx,
                &endpoint,
                addr,
            ) {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }

            tokio::select! {
                read = tokio::time::timeout(self.config.idle_timeout, reader.read(&mut chunk)) => match read {
                    Err(_) => {
                        tracing::info!(%addr, "Closing idle connection");
                        break Ok(());
                    }
                    Ok(Ok(0)) => break Ok(()),
                    Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                    Ok(Err(e)) => break Err(ServerError::Io(e)),
                },
                _ = self.shutdown.recv() => {
                    if let Some(ref connection) = connection {
                        let header = FrameHeader::new(FrameKind::Close, connection.channel_id, 0);
                        let _ = connection.send(Frame::new(header, Bytes::new()));
                    }
                    break Err(ServerError::ShuttingDown);
                }
            }
        };

        if let Some(connection) = connection {
            self.registry.remove_connection(&connection.id);
        }
        drop(outbound_tx);
        let _ = writer_task.await;
        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Err(ServerError::ShuttingDown) => Ok(()),
            other => other,
        }
    }

    /// Processes buffered frames. Returns Ok(false) when the connection
    /// should end cleanly.
    fn pump(
        &self,
        buf: &mut BytesMut,
        drain_remaining: &mut usize,
        connection: &mut Option<Arc<ConnectionHandle>>,
        outbound: &mpsc::UnboundedSender<Frame>,
        endpoint: &Arc<EndpointDescription>,
        addr: SocketAddr,
    ) -> Result<bool, ServerError> {
        loop {
            if *drain_remaining > 0 {
                let discard = (*drain_remaining).min(buf.len());
                buf.advance(discard);
                *drain_remaining -= discard;
                if *drain_remaining > 0 {
                    return Ok(true);
                }
            }

            let (header, payload_len, _) = match Frame::peek_header(buf)? {
                Some(parsed) => parsed,
                None => return Ok(true),
            };

            let max = self.config.context.limits.max_message_size;
            if payload_len > max {
                // Reject before reading (let alone decoding) the body.
                tracing::warn!(
                    %addr,
                    size = payload_len,
                    max,
                    "Rejecting oversized message"
                );
                self.stats.faults_total.fetch_add(1, Ordering::Relaxed);
                let fault = FaultMessage::new(StatusCode::BAD_REQUEST_TOO_LARGE).with_reason(
                    format!("message of {} bytes exceeds limit {}", payload_len, max),
                );
                let payload = fault.encode(&self.config.context)?;
                let reply = FrameHeader::new(
                    FrameKind::Fault,
                    header.channel_id,
                    header.request_id,
                );
                let _ = outbound.send(Frame::new(reply, payload));

                buf.advance(FRAME_HEADER_SIZE);
                *drain_remaining = payload_len;
                continue;
            }

            let frame = match Frame::decode(buf, &self.config.context.limits) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(true),
                Err(e) => {
                    // The frame was consumed but its payload is bad (CRC);
                    // answer with a fault and keep the connection.
                    tracing::warn!(%addr, error = %e, "Bad frame");
                    self.stats.faults_total.fetch_add(1, Ordering::Relaxed);
                    let fault = FaultMessage::new(e.status_code()).with_reason(e.to_string());
                    let payload = fault.encode(&self.config.context)?;
                    let reply = FrameHeader::new(
                        FrameKind::Fault,
                        header.channel_id,
                        header.request_id,
                    );
                    let _ = outbound.send(Frame::new(reply, payload));
                    continue;
                }
            };

            if !self.handle_frame(frame, connection, outbound, endpoint, addr)? {
                return Ok(false);
            }
        }
    }

    fn handle_frame(
        &self,
        frame: Frame,
        connection: &mut Option<Arc<ConnectionHandle>>,
        outbound: &mpsc::UnboundedSender<Frame>,
        endpoint: &Arc<EndpointDescription>,
        addr: SocketAddr,
    ) -> Result<bool, ServerError> {
        match frame.header.kind {
            FrameKind::Open => {
                let open = OpenRequest::decode(&frame.payload, &self.config.context)?;
                let (result, channel_id) = match self.gate_open(&open, addr) {
                    Ok(()) => {
                        let channel_id = self.next_channel_id.fetch_add(1, Ordering::SeqCst);
                        let handle = Arc::new(ConnectionHandle::new(
                            addr,
                            open.security,
                            channel_id,
                            outbound.clone(),
                        ));
                        self.registry.add_connection(handle.clone());
                        *connection = Some(handle);
                        (StatusCode::GOOD, channel_id)
                    }
                    Err(status) => (status, 0),
                };

                let ack = OpenResponse {
                    service_result: result,
                    channel_id,
                    revised_lifetime_ms: open
                        .requested_lifetime_ms
                        .min(self.config.channel_lifetime_ms),
                    server_certificate: None,
                };
                let payload = ack.encode(&self.config.context)?;
                let header = FrameHeader::new(FrameKind::OpenAck, channel_id, 0);
                let _ = outbound.send(Frame::new(header, payload));
                // A refused open ends the connection after the ack.
                Ok(result.is_good())
            }
            FrameKind::Request => {
                let Some(connection) = connection.as_ref() else {
                    let fault = FaultMessage::new(StatusCode::BAD_NOT_CONNECTED)
                        .with_reason("no open channel");
                    let payload = fault.encode(&self.config.context)?;
                    let header = FrameHeader::new(
                        FrameKind::Fault,
                        frame.header.channel_id,
                        frame.header.request_id,
                    );
                    let _ = outbound.send(Frame::new(header, payload));
                    return Ok(true);
                };
                self.stats.requests_total.fetch_add(1, Ordering::Relaxed);

                // Decode failures become faults at the request boundary.
                match RequestMessage::decode(&frame.payload, &self.config.context) {
                    Ok(request) => {
                        // Effective mode from per-message metadata.
                        let ctx = RequestContext::new(
                            connection.channel_id,
                            frame.header.request_id,
                            endpoint.clone(),
                            request.security.mode,
                            outbound.clone(),
                            self.config.context.clone(),
                        );
                        self.handler.handle(&ctx, request);
                        if !ctx.has_responded() {
                            tracing::warn!(
                                request_id = frame.header.request_id,
                                "Handler produced no response"
                            );
                            let _ = ctx.send_fault(
                                StatusCode::BAD_UNEXPECTED_ERROR,
                                "no response produced",
                            );
                        }
                    }
                    Err(e) => {
                        self.stats.faults_total.fetch_add(1, Ordering::Relaxed);
                        let fault = FaultMessage::new(e.status_code()).with_reason(e.to_string());
                        let payload = fault.encode(&self.config.context)?;
                        let header = FrameHeader::new(
                            FrameKind::Fault,
                            connection.channel_id,
                            frame.header.request_id,
                        );
                        let _ = outbound.send(Frame::new(header, payload));
                    }
                }
                Ok(true)
            }
            FrameKind::Close | FrameKind::Abort => Ok(false),
            kind => {
                tracing::debug!(?kind, "Ignoring unexpected frame");
                Ok(true)
            }
        }
    }

    /// Applies the trust gate to an open request. Returns the refusal
    /// status on rejection.
    fn gate_open(&self, open: &OpenRequest, addr: SocketAddr) -> Result<(), StatusCode> {
        let Some(der) = open.client_certificate.as_deref() else {
            // Anonymous opens are only acceptable without security.
            return if open.security.mode == uarpc_wire::SecurityMode::None {
                Ok(())
            } else {
                Err(StatusCode::BAD_CERTIFICATE_INVALID)
            };
        };

        let certificate = match Certificate::from_der(der.to_vec()) {
            Ok(certificate) => certificate,
            Err(e) => {
                tracing::warn!(%addr, error = %e, "Rejecting malformed certificate");
                return Err(e.status_code());
            }
        };
        let peer = ApplicationDescription {
            application_uri: open.application_uri.clone(),
            product_uri: None,
            application_name: None,
        };

        match self
            .trust_gate
            .validate(&certificate, &peer, ValidationChecks::new())
        {
            Ok(TrustDecision::Accept) | Ok(TrustDecision::AcceptPermanently) => Ok(()),
            Ok(TrustDecision::Reject) => {
                tracing::warn!(
                    %addr,
                    thumbprint = certificate.thumbprint(),
                    "Certificate rejected by trust gate"
                );
                Err(StatusCode::BAD_CERTIFICATE_UNTRUSTED)
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "Certificate validation failed");
                Err(e.status_code())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uarpc_client::{ChannelConfig, ClientError, InlineSpawner, SecureChannel};
    use uarpc_trust::{AcceptAllGate, MemoryTrustStore, StoreTrustGate, TrustStore};
    use uarpc_wire::{EncodingLimits, ExtensionObject, NodeId, SecurityMode, SecurityPolicy};

    async fn start_server(server: Arc<Server>) -> SocketAddr {
        tokio::spawn({
            let server = server.clone();
            async move {
                let _ = server.run().await;
            }
        });
        for _ in 0..100 {
            if let Some(addr) = server.bound_addr() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not bind");
    }

    fn loopback_server(context: EncodingContext) -> Arc<Server> {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_context(context);
        Arc::new(Server::new(
            config,
            Arc::new(LoopbackHandler),
            Arc::new(AcceptAllGate::new()),
        ))
    }

    fn client(addr: SocketAddr) -> SecureChannel {
        SecureChannel::new(
            ChannelConfig::new(addr).with_request_timeout(Duration::from_secs(2)),
            Arc::new(InlineSpawner),
        )
    }

    fn body(bytes: Vec<u8>) -> ExtensionObject {
        ExtensionObject::byte_string(NodeId::numeric(2, 4), bytes)
    }

    #[tokio::test]
    async fn test_end_to_end_loopback() {
        let server = loopback_server(EncodingContext::default());
        let addr = start_server(server.clone()).await;

        let channel = client(addr);
        channel.open().await.unwrap();

        let response = channel
            .service_request(
                uarpc_wire::RequestMessage::new(body(vec![1, 2, 3])),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.service_result, StatusCode::GOOD);
        assert_eq!(response.body, body(vec![1, 2, 3]));

        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 1);
        assert_eq!(server.registry().len(), 1);

        channel.close().await.unwrap();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_oversized_request_rejected_before_decode() {
        // Server limit 512 KiB; the client sends a 1 MiB message.
        let mut context = EncodingContext::default();
        context.limits = EncodingLimits::default().with_max_message_size(512 * 1024);
        let server = loopback_server(context);
        let addr = start_server(server.clone()).await;

        let channel = client(addr);
        channel.open().await.unwrap();

        let err = channel
            .service_request(
                uarpc_wire::RequestMessage::new(body(vec![0xAB; 1024 * 1024])),
                None,
            )
            .await
            .unwrap_err();
        match err {
            ClientError::Fault(fault) => {
                assert_eq!(fault.status, StatusCode::BAD_REQUEST_TOO_LARGE);
            }
            other => panic!("expected request-too-large fault, got {:?}", other),
        }
        // Nothing was dispatched to the handler.
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 0);
        assert_eq!(server.stats().faults_total.load(Ordering::Relaxed), 1);

        // The connection survives and serves the next request.
        let response = channel
            .service_request(uarpc_wire::RequestMessage::new(body(vec![7])), None)
            .await
            .unwrap();
        assert_eq!(response.body, body(vec![7]));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_trust_gate_refuses_untrusted() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Arc::new(Server::new(
            config,
            Arc::new(LoopbackHandler),
            // Default gate rejects unknown certificates.
            Arc::new(StoreTrustGate::new(Arc::new(MemoryTrustStore::new()))),
        ));
        let addr = start_server(server.clone()).await;

        let der = uarpc_trust::certificate::test_der(b"untrusted-press");
        let channel = SecureChannel::new(
            ChannelConfig::new(addr)
                .with_security(SecurityHeader::new(
                    SecurityMode::Sign,
                    SecurityPolicy::Basic256Sha256,
                ))
                .with_certificate_der(der),
            Arc::new(InlineSpawner),
        );
        let err = channel.open().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::OpenRefused(StatusCode::BAD_CERTIFICATE_UNTRUSTED)
        ));
        assert_eq!(server.registry().len(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_trust_gate_accept_permanently_persists() {
        let store = Arc::new(MemoryTrustStore::new());
        let gate = StoreTrustGate::new(store.clone())
            .with_decider(|_, _| TrustDecision::AcceptPermanently);
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Arc::new(Server::new(
            config,
            Arc::new(LoopbackHandler),
            Arc::new(gate),
        ));
        let addr = start_server(server.clone()).await;

        let der = uarpc_trust::certificate::test_der(b"new-scada-node");
        let channel = SecureChannel::new(
            ChannelConfig::new(addr)
                .with_security(SecurityHeader::new(
                    SecurityMode::Sign,
                    SecurityPolicy::Basic256Sha256,
                ))
                .with_certificate_der(der.clone()),
            Arc::new(InlineSpawner),
        );
        channel.open().await.unwrap();

        let certificate = Certificate::from_der(der).unwrap();
        assert!(store.is_trusted(certificate.thumbprint()).unwrap());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_signed_open_without_certificate_refused() {
        let server = loopback_server(EncodingContext::default());
        let addr = start_server(server.clone()).await;

        let channel = SecureChannel::new(
            ChannelConfig::new(addr).with_security(SecurityHeader::new(
                SecurityMode::Sign,
                SecurityPolicy::Basic256Sha256,
            )),
            Arc::new(InlineSpawner),
        );
        let err = channel.open().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::OpenRefused(StatusCode::BAD_CERTIFICATE_INVALID)
        ));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_registry_notified_on_connect_and_disconnect() {
        use crate::registry::ConnectionListener;

        #[derive(Default)]
        struct Events {
            connected: AtomicU64,
            disconnected: AtomicU64,
        }
        impl ConnectionListener for Events {
            fn on_connected(&self, _c: &ConnectionHandle) {
                self.connected.fetch_add(1, Ordering::SeqCst);
            }
            fn on_disconnected(&self, _c: &ConnectionHandle) {
                self.disconnected.fetch_add(1, Ordering::SeqCst);
            }
        }

        let server = loopback_server(EncodingContext::default());
        let events = Arc::new(Events::default());
        server.registry().add_listener(events.clone());
        let addr = start_server(server.clone()).await;

        let channel = client(addr);
        channel.open().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.connected.load(Ordering::SeqCst), 1);

        channel.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(events.disconnected.load(Ordering::SeqCst), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_per_request_security_mode_reaches_handler() {
        struct ModeProbe {
            seen: parking_lot::Mutex<Vec<SecurityMode>>,
        }
        impl ServiceHandler for ModeProbe {
            fn handle(&self, ctx: &RequestContext, request: RequestMessage) {
                self.seen.lock().push(ctx.security_mode());
                let _ = ctx.send_response(ResponseMessage::new(request.body));
            }
        }

        let probe = Arc::new(ModeProbe {
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Arc::new(Server::new(
            config,
            probe.clone(),
            Arc::new(AcceptAllGate::new()),
        ));
        let addr = start_server(server.clone()).await;

        let channel = client(addr);
        channel.open().await.unwrap();

        // Two requests on one connection with different per-message modes.
        for mode in [SecurityMode::None, SecurityMode::Sign] {
            let request = uarpc_wire::RequestMessage::new(body(vec![1]))
                .with_security(SecurityHeader::new(mode, SecurityPolicy::None));
            channel.service_request(request, None).await.unwrap();
        }

        let seen = probe.seen.lock().clone();
        assert_eq!(seen, vec![SecurityMode::None, SecurityMode::Sign]);
        server.shutdown();
    }
}
