//! Secure channel client transport.
//!
//! A [`SecureChannel`] is the session-oriented abstraction over one
//! connection: open it, send correlated service requests, reconnect after
//! loss, close, and finally dispose. Requests are matched to responses by
//! the `(channel id, request id)` pair carried in the frame header, never
//! by arrival order; responses may complete out of order under pipelining.
//!
//! A timed-out request is failed locally and its pending entry removed, so
//! a response arriving later finds nothing to complete and is discarded at
//! the transport. The single-assignment pending result makes double
//! delivery impossible even if the removal races the read loop.

use crate::async_result::{AsyncResult, ServiceFault, Spawner};
use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use uarpc_wire::{
    EncodingContext, FaultMessage, Frame, FrameHeader, FrameKind, OpenRequest, OpenResponse,
    RequestMessage, ResponseMessage, SecurityHeader, StatusCode,
};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Initial state; also entered after a close or connection loss.
    Closed,
    /// Handshake in progress.
    Opening,
    /// Ready for service requests.
    Open,
    /// Re-establishing after loss.
    Reconnecting,
    /// Terminal; no further transitions.
    Disposed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Closed => "closed",
            ChannelState::Opening => "opening",
            ChannelState::Open => "open",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Disposed => "disposed",
        };
        write!(f, "{}", name)
    }
}

/// Capability bitfield reported by a channel binding.
///
/// Callers probe features instead of relying on an unsupported operation
/// failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFeatures(u32);

impl ChannelFeatures {
    pub const OPEN: u32 = 1 << 0;
    pub const OPEN_ASYNC: u32 = 1 << 1;
    pub const RECONNECT: u32 = 1 << 2;
    pub const RECONNECT_ASYNC: u32 = 1 << 3;
    pub const SEND_REQUEST: u32 = 1 << 4;
    pub const SEND_REQUEST_ASYNC: u32 = 1 << 5;
    pub const CLOSE: u32 = 1 << 6;
    pub const CLOSE_ASYNC: u32 = 1 << 7;

    pub fn new() -> Self {
        Self(0)
    }

    /// Every capability of the TCP binding.
    pub fn all() -> Self {
        Self(
            Self::OPEN
                | Self::OPEN_ASYNC
                | Self::RECONNECT
                | Self::RECONNECT_ASYNC
                | Self::SEND_REQUEST
                | Self::SEND_REQUEST_ASYNC
                | Self::CLOSE
                | Self::CLOSE_ASYNC,
        )
    }

    pub fn with(mut self, feature: u32) -> Self {
        self.0 |= feature;
        self
    }

    pub fn has(&self, feature: u32) -> bool {
        self.0 & feature == feature
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Endpoint address.
    pub endpoint: SocketAddr,
    /// Connection/handshake timeout.
    pub connect_timeout: Duration,
    /// Default request timeout.
    pub request_timeout: Duration,
    /// Security selection sent in the open handshake.
    pub security: SecurityHeader,
    /// DER client certificate offered during the handshake.
    pub certificate_der: Option<Vec<u8>>,
    /// Application URI of this client.
    pub application_uri: Option<String>,
    /// Requested channel lifetime in milliseconds.
    pub requested_lifetime_ms: u32,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Encoding context (limits, namespaces, registry).
    pub context: EncodingContext,
}

impl ChannelConfig {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            security: SecurityHeader::default(),
            certificate_der: None,
            application_uri: None,
            requested_lifetime_ms: 600_000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            context: EncodingContext::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_security(mut self, security: SecurityHeader) -> Self {
        self.security = security;
        self
    }

    pub fn with_certificate_der(mut self, der: Vec<u8>) -> Self {
        self.certificate_der = Some(der);
        self
    }

    pub fn with_application_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_uri = Some(uri.into());
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_context(mut self, context: EncodingContext) -> Self {
        self.context = context;
        self
    }
}

/// State shared with the read loop.
struct Shared {
    state: Mutex<ChannelState>,
    channel_id: AtomicU32,
    pending: DashMap<u32, AsyncResult<ResponseMessage>>,
    context: EncodingContext,
}

impl Shared {
    /// Fails every outstanding request with the given status.
    fn fail_all(&self, status: StatusCode, message: &str) {
        let ids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, result)) = self.pending.remove(&id) {
                result.set_error(ServiceFault::new(status, message));
            }
        }
    }

    /// Marks the channel closed unless it was already disposed.
    fn mark_closed(&self) {
        let mut state = self.state.lock();
        if *state != ChannelState::Disposed {
            *state = ChannelState::Closed;
        }
    }
}

/// A client secure channel over TCP.
pub struct SecureChannel {
    config: ChannelConfig,
    shared: Arc<Shared>,
    next_request_id: AtomicU32,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    read_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    spawner: Arc<dyn Spawner>,
}

impl SecureChannel {
    /// Creates a channel bound to an endpoint, not yet open.
    ///
    /// The spawner is the execution context used to deliver completion
    /// listeners of this channel's pending operations.
    pub fn new(config: ChannelConfig, spawner: Arc<dyn Spawner>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ChannelState::Closed),
            channel_id: AtomicU32::new(0),
            pending: DashMap::new(),
            context: config.context.clone(),
        });
        Self {
            config,
            shared,
            next_request_id: AtomicU32::new(1),
            writer: tokio::sync::Mutex::new(None),
            read_task: Mutex::new(None),
            spawner,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Channel id assigned by the server; 0 before the first open.
    pub fn channel_id(&self) -> u32 {
        self.shared.channel_id.load(Ordering::SeqCst)
    }

    /// Capabilities of this binding.
    pub fn supported_features(&self) -> ChannelFeatures {
        ChannelFeatures::all()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Opens the channel. Idempotent when already open.
    pub async fn open(&self) -> Result<(), ClientError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ChannelState::Disposed => return Err(ClientError::Disposed),
                ChannelState::Open => return Ok(()),
                ChannelState::Opening | ChannelState::Reconnecting => {
                    return Err(ClientError::NotConnected)
                }
                ChannelState::Closed => *state = ChannelState::Opening,
            }
        }
        self.establish().await
    }

    /// Opens the channel only if it is not already open.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ChannelState::Disposed => return Err(ClientError::Disposed),
                ChannelState::Open => return Ok(()),
                ChannelState::Opening | ChannelState::Reconnecting => {
                    return Err(ClientError::NotConnected)
                }
                ChannelState::Closed => *state = ChannelState::Reconnecting,
            }
        }
        self.establish().await
    }

    async fn establish(&self) -> Result<(), ClientError> {
        match self.dial_and_handshake().await {
            Ok(()) => {
                {
                    let mut state = self.shared.state.lock();
                    if *state == ChannelState::Disposed {
                        return Err(ClientError::Disposed);
                    }
                    *state = ChannelState::Open;
                }
                tracing::debug!(
                    channel_id = self.channel_id(),
                    endpoint = %self.config.endpoint,
                    "Channel open"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.mark_closed();
                Err(e)
            }
        }
    }

    async fn dial_and_handshake(&self) -> Result<(), ClientError> {
        tracing::debug!(endpoint = %self.config.endpoint, "Connecting");
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.endpoint),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::Io)?;
        stream.set_nodelay(true).ok();

        let (mut reader, mut write_half) = stream.into_split();

        // Open handshake happens before the read loop exists, so the
        // acknowledgement is read directly here.
        let open = OpenRequest {
            security: self.config.security,
            client_certificate: self.config.certificate_der.clone(),
            application_uri: self.config.application_uri.clone(),
            requested_lifetime_ms: self.config.requested_lifetime_ms,
        };
        let payload = open.encode(&self.shared.context)?;
        let header = FrameHeader::new(FrameKind::Open, 0, 0)
            .with_security_mode(self.config.security.mode);
        let encoded = Frame::new(header, payload).encode(&self.shared.context.limits)?;
        write_half.write_all(&encoded).await.map_err(ClientError::Io)?;

        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);
        let ack_frame = tokio::time::timeout(self.config.connect_timeout, async {
            let mut chunk = vec![0u8; self.config.read_buffer_size];
            loop {
                if let Some(frame) = Frame::decode(&mut buf, &self.shared.context.limits)? {
                    return Ok::<Frame, ClientError>(frame);
                }
                let n = reader.read(&mut chunk).await.map_err(ClientError::Io)?;
                if n == 0 {
                    return Err(ClientError::ConnectionClosed);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)??;

        let ack = match ack_frame.header.kind {
            FrameKind::OpenAck => OpenResponse::decode(&ack_frame.payload, &self.shared.context)?,
            FrameKind::Fault => {
                let fault = FaultMessage::decode(&ack_frame.payload, &self.shared.context)?;
                return Err(ClientError::OpenRefused(fault.status));
            }
            _ => return Err(ClientError::OpenRefused(StatusCode::BAD_UNEXPECTED_ERROR)),
        };
        if ack.service_result.is_bad() {
            return Err(ClientError::OpenRefused(ack.service_result));
        }
        self.shared
            .channel_id
            .store(ack.channel_id, Ordering::SeqCst);

        *self.writer.lock().await = Some(write_half);

        // Bytes past the acknowledgement belong to the read loop.
        let shared = self.shared.clone();
        let chunk_size = self.config.read_buffer_size;
        let task = tokio::spawn(read_loop(shared, reader, buf, chunk_size));
        if let Some(old) = self.read_task.lock().replace(task) {
            old.abort();
        }
        Ok(())
    }

    /// Sends a request and returns the pending result immediately.
    ///
    /// The deadline (argument, or the configured default) fails the result
    /// with a timeout fault and removes the pending entry, so a late
    /// response is discarded rather than delivered.
    pub async fn service_request_async(
        &self,
        request: RequestMessage,
        timeout: Option<Duration>,
    ) -> Result<AsyncResult<ResponseMessage>, ClientError> {
        match self.state() {
            ChannelState::Open => {}
            ChannelState::Disposed => return Err(ClientError::Disposed),
            _ => return Err(ClientError::NotConnected),
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let result = AsyncResult::new(self.spawner.clone());
        self.shared.pending.insert(request_id, result.clone());

        let send_outcome: Result<(), ClientError> = async {
            let payload = request.encode(&self.shared.context)?;
            let header = FrameHeader::new(FrameKind::Request, self.channel_id(), request_id)
                .with_security_mode(request.security.mode);
            let encoded = Frame::new(header, payload).encode(&self.shared.context.limits)?;
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(ClientError::NotConnected)?;
            writer.write_all(&encoded).await.map_err(ClientError::Io)
        }
        .await;
        if let Err(e) = send_outcome {
            self.shared.pending.remove(&request_id);
            return Err(e);
        }
        tracing::debug!(request_id, "Request sent");

        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let shared = self.shared.clone();
        let timed_out = result.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Remove first: once the entry is gone the read loop stops
            // attributing bytes to this request id.
            if shared.pending.remove(&request_id).is_some() {
                tracing::debug!(request_id, "Request timed out");
                timed_out.set_error(ServiceFault::timeout(timeout));
            }
        });

        Ok(result)
    }

    /// Sends a request and awaits its response.
    pub async fn service_request(
        &self,
        request: RequestMessage,
        timeout: Option<Duration>,
    ) -> Result<ResponseMessage, ClientError> {
        let result = self.service_request_async(request, timeout).await?;
        result.wait().await.map_err(ClientError::from)
    }

    /// Closes the channel. Idempotent; pending requests fail.
    pub async fn close(&self) -> Result<(), ClientError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ChannelState::Closed | ChannelState::Disposed => return Ok(()),
                _ => *state = ChannelState::Closed,
            }
        }

        let header = FrameHeader::new(FrameKind::Close, self.channel_id(), 0);
        if let Ok(encoded) = Frame::new(header, Bytes::new()).encode(&self.shared.context.limits) {
            let mut writer = self.writer.lock().await;
            if let Some(writer) = writer.as_mut() {
                let _ = writer.write_all(&encoded).await;
            }
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        self.shared
            .fail_all(StatusCode::BAD_SECURE_CHANNEL_CLOSED, "channel closed");
        tracing::debug!(channel_id = self.channel_id(), "Channel closed");
        Ok(())
    }

    /// Releases the channel permanently. A disposed channel never
    /// transitions again.
    pub async fn dispose(&self) {
        if self.state() == ChannelState::Disposed {
            return;
        }
        let _ = self.close().await;
        *self.shared.state.lock() = ChannelState::Disposed;
        tracing::debug!("Channel disposed");
    }
}

/// Reads frames and dispatches completions until the connection ends.
async fn read_loop(
    shared: Arc<Shared>,
    mut reader: OwnedReadHalf,
    mut buf: BytesMut,
    chunk_size: usize,
) {
    let limits = shared.context.limits;
    let mut chunk = vec![0u8; chunk_size];
    loop {
        loop {
            match Frame::decode(&mut buf, &limits) {
                Ok(Some(frame)) => {
                    if !dispatch(&shared, frame) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Closing channel on framing error");
                    shared.fail_all(e.status_code(), "framing error");
                    shared.mark_closed();
                    return;
                }
            }
        }

        match reader.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!("Connection closed by peer");
                shared.fail_all(StatusCode::BAD_SECURE_CHANNEL_CLOSED, "connection closed");
                shared.mark_closed();
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::warn!(error = %e, "Read error");
                shared.fail_all(StatusCode::BAD_SECURE_CHANNEL_CLOSED, "read error");
                shared.mark_closed();
                return;
            }
        }
    }
}

/// Handles one inbound frame; returns false when the loop should stop.
fn dispatch(shared: &Shared, frame: Frame) -> bool {
    let channel_id = shared.channel_id.load(Ordering::SeqCst);
    if frame.header.channel_id != channel_id {
        tracing::debug!(
            frame_channel = frame.header.channel_id,
            channel_id,
            "Discarding frame for another channel"
        );
        return true;
    }
    let request_id = frame.header.request_id;

    match frame.header.kind {
        FrameKind::Response => match shared.pending.remove(&request_id) {
            Some((_, result)) => match ResponseMessage::decode(&frame.payload, &shared.context) {
                Ok(message) => {
                    result.set_result(message);
                }
                Err(e) => {
                    result.set_error(ServiceFault::new(e.status_code(), e.to_string()));
                }
            },
            None => {
                tracing::debug!(request_id, "Discarding response with no pending request");
            }
        },
        FrameKind::Fault => match shared.pending.remove(&request_id) {
            Some((_, result)) => {
                let fault = FaultMessage::decode(&frame.payload, &shared.context)
                    .unwrap_or_else(|e| FaultMessage::new(e.status_code()));
                result.set_error(ServiceFault::new(
                    fault.status,
                    fault.reason.unwrap_or_default(),
                ));
            }
            None => {
                tracing::debug!(request_id, "Discarding fault with no pending request");
            }
        },
        FrameKind::Abort | FrameKind::Close => {
            tracing::debug!(kind = ?frame.header.kind, "Channel terminated by peer");
            shared.fail_all(
                StatusCode::BAD_SECURE_CHANNEL_CLOSED,
                "terminated by peer",
            );
            shared.mark_closed();
            return false;
        }
        kind => {
            tracing::debug!(?kind, "Ignoring unexpected frame");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_result::InlineSpawner;
    use std::future::Future;
    use tokio::net::TcpListener;
    use uarpc_wire::{ExtensionObject, NodeId};

    fn test_channel(endpoint: SocketAddr) -> SecureChannel {
        let config = ChannelConfig::new(endpoint)
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(2));
        SecureChannel::new(config, Arc::new(InlineSpawner))
    }

    async fn spawn_server<F, Fut>(behavior: F) -> SocketAddr
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                behavior(stream).await;
            }
        });
        addr
    }

    async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> Frame {
        let limits = uarpc_wire::EncodingLimits::default();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = Frame::decode(buf, &limits).unwrap() {
                return frame;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "peer closed during test");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn server_handshake(stream: &mut TcpStream, buf: &mut BytesMut, channel_id: u32) {
        let ctx = EncodingContext::default();
        let open = read_frame(stream, buf).await;
        assert_eq!(open.header.kind, FrameKind::Open);
        let ack = OpenResponse {
            service_result: StatusCode::GOOD,
            channel_id,
            revised_lifetime_ms: 60_000,
            server_certificate: None,
        };
        let frame = Frame::new(
            FrameHeader::new(FrameKind::OpenAck, channel_id, 0),
            ack.encode(&ctx).unwrap(),
        );
        stream
            .write_all(&frame.encode(&ctx.limits).unwrap())
            .await
            .unwrap();
    }

    fn test_body() -> ExtensionObject {
        ExtensionObject::byte_string(NodeId::numeric(1, 100), vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_open_and_idempotent_reopen() {
        let addr = spawn_server(|mut stream| async move {
            let mut buf = BytesMut::new();
            server_handshake(&mut stream, &mut buf, 5).await;
            // Hold the connection until the client is done.
            let mut sink = [0u8; 64];
            while stream.read(&mut sink).await.unwrap_or(0) > 0 {}
        })
        .await;

        let channel = test_channel(addr);
        assert_eq!(channel.state(), ChannelState::Closed);
        channel.open().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.channel_id(), 5);

        // Second open is a no-op, not a second handshake.
        channel.open().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Open);

        // Reconnect while open does not re-dial either.
        channel.reconnect().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Open);

        channel.close().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        channel.close().await.unwrap();

        channel.dispose().await;
        assert_eq!(channel.state(), ChannelState::Disposed);
        assert!(matches!(channel.open().await, Err(ClientError::Disposed)));
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let addr = spawn_server(|mut stream| async move {
            let ctx = EncodingContext::default();
            let mut buf = BytesMut::new();
            server_handshake(&mut stream, &mut buf, 9).await;

            let frame = read_frame(&mut stream, &mut buf).await;
            assert_eq!(frame.header.kind, FrameKind::Request);
            let request = RequestMessage::decode(&frame.payload, &ctx).unwrap();

            let response = ResponseMessage::new(request.body);
            let reply = Frame::new(
                FrameHeader::new(FrameKind::Response, 9, frame.header.request_id),
                response.encode(&ctx).unwrap(),
            );
            stream
                .write_all(&reply.encode(&ctx.limits).unwrap())
                .await
                .unwrap();
        })
        .await;

        let channel = test_channel(addr);
        channel.open().await.unwrap();

        let response = channel
            .service_request(RequestMessage::new(test_body()), None)
            .await
            .unwrap();
        assert_eq!(response.service_result, StatusCode::GOOD);
        assert_eq!(response.body, test_body());
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fault_completes_request_with_typed_failure() {
        let addr = spawn_server(|mut stream| async move {
            let ctx = EncodingContext::default();
            let mut buf = BytesMut::new();
            server_handshake(&mut stream, &mut buf, 2).await;

            let frame = read_frame(&mut stream, &mut buf).await;
            let fault = FaultMessage::new(StatusCode::BAD_SERVICE_UNSUPPORTED)
                .with_reason("no handler");
            let reply = Frame::new(
                FrameHeader::new(FrameKind::Fault, 2, frame.header.request_id),
                fault.encode(&ctx).unwrap(),
            );
            stream
                .write_all(&reply.encode(&ctx.limits).unwrap())
                .await
                .unwrap();
        })
        .await;

        let channel = test_channel(addr);
        channel.open().await.unwrap();

        let err = channel
            .service_request(RequestMessage::new(test_body()), None)
            .await
            .unwrap_err();
        match err {
            ClientError::Fault(fault) => {
                assert_eq!(fault.status, StatusCode::BAD_SERVICE_UNSUPPORTED);
                assert_eq!(fault.message, "no handler");
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_discarded() {
        let addr = spawn_server(|mut stream| async move {
            let ctx = EncodingContext::default();
            let mut buf = BytesMut::new();
            server_handshake(&mut stream, &mut buf, 3).await;

            let frame = read_frame(&mut stream, &mut buf).await;
            // Respond well past the client deadline.
            tokio::time::sleep(Duration::from_millis(400)).await;
            let response = ResponseMessage::new(ExtensionObject::null());
            let reply = Frame::new(
                FrameHeader::new(FrameKind::Response, 3, frame.header.request_id),
                response.encode(&ctx).unwrap(),
            );
            let _ = stream.write_all(&reply.encode(&ctx.limits).unwrap()).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        let channel = test_channel(addr);
        channel.open().await.unwrap();

        let err = channel
            .service_request(
                RequestMessage::new(test_body()),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert_eq!(channel.pending_count(), 0);

        // The late response arrives, is discarded, and the channel stays
        // usable.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_async_twin_returns_pending_result() {
        let addr = spawn_server(|mut stream| async move {
            let ctx = EncodingContext::default();
            let mut buf = BytesMut::new();
            server_handshake(&mut stream, &mut buf, 4).await;

            let frame = read_frame(&mut stream, &mut buf).await;
            let response = ResponseMessage::new(ExtensionObject::null());
            let reply = Frame::new(
                FrameHeader::new(FrameKind::Response, 4, frame.header.request_id),
                response.encode(&ctx).unwrap(),
            );
            stream
                .write_all(&reply.encode(&ctx.limits).unwrap())
                .await
                .unwrap();
        })
        .await;

        let channel = test_channel(addr);
        channel.open().await.unwrap();

        let result = channel
            .service_request_async(RequestMessage::new(test_body()), None)
            .await
            .unwrap();
        let response = result.wait().await.unwrap();
        assert_eq!(response.service_result, StatusCode::GOOD);
    }

    #[tokio::test]
    async fn test_request_without_open_fails_immediately() {
        let channel = test_channel("127.0.0.1:1".parse().unwrap());
        let err = channel
            .service_request(RequestMessage::new(test_body()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_open_refused_by_server() {
        let addr = spawn_server(|mut stream| async move {
            let ctx = EncodingContext::default();
            let mut buf = BytesMut::new();
            let open = read_frame(&mut stream, &mut buf).await;
            assert_eq!(open.header.kind, FrameKind::Open);
            let ack = OpenResponse {
                service_result: StatusCode::BAD_CERTIFICATE_UNTRUSTED,
                channel_id: 0,
                revised_lifetime_ms: 0,
                server_certificate: None,
            };
            let frame = Frame::new(
                FrameHeader::new(FrameKind::OpenAck, 0, 0),
                ack.encode(&ctx).unwrap(),
            );
            stream
                .write_all(&frame.encode(&ctx.limits).unwrap())
                .await
                .unwrap();
        })
        .await;

        let channel = test_channel(addr);
        let err = channel.open().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::OpenRefused(StatusCode::BAD_CERTIFICATE_UNTRUSTED)
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_pending_fail_on_connection_loss() {
        let addr = spawn_server(|mut stream| async move {
            let mut buf = BytesMut::new();
            server_handshake(&mut stream, &mut buf, 6).await;
            let _ = read_frame(&mut stream, &mut buf).await;
            // Drop the connection with the request outstanding.
        })
        .await;

        let channel = test_channel(addr);
        channel.open().await.unwrap();

        let err = channel
            .service_request(RequestMessage::new(test_body()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_features_bitfield() {
        let features = ChannelFeatures::all();
        assert!(features.has(ChannelFeatures::OPEN));
        assert!(features.has(ChannelFeatures::SEND_REQUEST_ASYNC));
        assert!(features.has(ChannelFeatures::CLOSE_ASYNC));

        let partial = ChannelFeatures::new().with(ChannelFeatures::OPEN);
        assert!(partial.has(ChannelFeatures::OPEN));
        assert!(!partial.has(ChannelFeatures::RECONNECT));
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ChannelConfig::new("127.0.0.1:4850".parse().unwrap())
            .with_read_buffer_size(16);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ChannelConfig::new("127.0.0.1:4850".parse().unwrap())
            .with_read_buffer_size(64 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }
}
