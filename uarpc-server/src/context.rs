//! Per-request server context.
//!
//! A [`RequestContext`] binds one inbound request to the endpoint it
//! arrived on, its receive timestamp, and the security mode effective for
//! that specific request. The mode comes from the message's own security
//! header: on multiplexed or connectionless bindings it can differ per
//! request, so it is never assumed from the transport connection.
//!
//! Exactly one response leaves per request. The first of `send_response`,
//! `send_fault` or `send_internal_error` wins; later calls fail with
//! [`ServerError::AlreadyResponded`].

use crate::error::ServerError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uarpc_wire::{
    EncodingContext, FaultMessage, Frame, FrameHeader, FrameKind, ResponseMessage, SecurityHeader,
    SecurityMode, StatusCode,
};

/// The endpoint a request arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescription {
    /// Endpoint URL, e.g. `uarpc://0.0.0.0:4850`.
    pub endpoint_url: String,
    /// Security configured for the endpoint.
    pub security: SecurityHeader,
}

/// Correlation object for one inbound request.
pub struct RequestContext {
    channel_id: u32,
    request_id: u32,
    endpoint: Arc<EndpointDescription>,
    received_at: DateTime<Utc>,
    security_mode: SecurityMode,
    responded: AtomicBool,
    outbound: mpsc::UnboundedSender<Frame>,
    context: EncodingContext,
}

impl RequestContext {
    pub(crate) fn new(
        channel_id: u32,
        request_id: u32,
        endpoint: Arc<EndpointDescription>,
        security_mode: SecurityMode,
        outbound: mpsc::UnboundedSender<Frame>,
        context: EncodingContext,
    ) -> Self {
        Self {
            channel_id,
            request_id,
            endpoint,
            received_at: Utc::now(),
            security_mode,
            responded: AtomicBool::new(false),
            outbound,
            context,
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn endpoint(&self) -> &EndpointDescription {
        &self.endpoint
    }

    /// Timestamp captured when this context was constructed.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Security mode effective for this request (from the message, not
    /// the socket).
    pub fn security_mode(&self) -> SecurityMode {
        self.security_mode
    }

    /// Whether a response has already been sent.
    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<(), ServerError> {
        if self
            .responded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServerError::AlreadyResponded);
        }
        Ok(())
    }

    fn send_frame(&self, kind: FrameKind, payload: bytes::Bytes) -> Result<(), ServerError> {
        let header = FrameHeader::new(kind, self.channel_id, self.request_id)
            .with_security_mode(self.security_mode);
        self.outbound
            .send(Frame::new(header, payload))
            .map_err(|_| ServerError::ConnectionGone)
    }

    /// Sends the success response for this request.
    pub fn send_response(&self, response: ResponseMessage) -> Result<(), ServerError> {
        self.claim()?;
        let payload = response.encode(&self.context)?;
        self.send_frame(FrameKind::Response, payload)
    }

    /// Sends a routed fault: an expected, in-protocol failure outcome.
    pub fn send_fault(
        &self,
        status: StatusCode,
        reason: impl Into<String>,
    ) -> Result<(), ServerError> {
        self.claim()?;
        let fault = FaultMessage::new(status).with_reason(reason);
        let payload = fault.encode(&self.context)?;
        self.send_frame(FrameKind::Fault, payload)
    }

    /// Sends an internal error to the peer, including its diagnostic text.
    ///
    /// This deliberately leaks internal detail to the remote side and is
    /// therefore a separate call from [`send_fault`](Self::send_fault);
    /// nothing routes arbitrary errors here implicitly.
    pub fn send_internal_error(&self, error: &ServerError) -> Result<(), ServerError> {
        self.claim()?;
        let fault = FaultMessage::new(error.status_code()).with_reason(error.to_string());
        let payload = fault.encode(&self.context)?;
        self.send_frame(FrameKind::Fault, payload)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("channel_id", &self.channel_id)
            .field("request_id", &self.request_id)
            .field("security_mode", &self.security_mode)
            .field("received_at", &self.received_at)
            .field("responded", &self.has_responded())
            .finish()
    }
}
