//! Explicit per-connection state of one client/upstream pair.

use docweaver_core::realtime::{self, SESSION_CREATED};

/// Lifecycle of the upstream leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamPhase {
    /// The upstream handshake is in flight. Client frames are dropped.
    Connecting,
    Open,
    Closed,
}

/// State record for a single connection pair.
///
/// Owned by the task that drives the pair; nothing here is shared between
/// connections.
#[derive(Debug, Clone)]
pub struct ConnectionPair {
    pub id: u32,
    phase: UpstreamPhase,
    configured: bool,
    upstream_attempts: u32,
    dropped_client_frames: u64,
    forwarded_upstream: u64,
    forwarded_downstream: u64,
}

impl ConnectionPair {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            phase: UpstreamPhase::Connecting,
            configured: false,
            upstream_attempts: 0,
            dropped_client_frames: 0,
            forwarded_upstream: 0,
            forwarded_downstream: 0,
        }
    }

    pub fn phase(&self) -> UpstreamPhase {
        self.phase
    }

    /// Whether the session configuration has been pushed upstream.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn upstream_attempts(&self) -> u32 {
        self.upstream_attempts
    }

    pub fn dropped_client_frames(&self) -> u64 {
        self.dropped_client_frames
    }

    pub fn forwarded_upstream(&self) -> u64 {
        self.forwarded_upstream
    }

    pub fn forwarded_downstream(&self) -> u64 {
        self.forwarded_downstream
    }

    pub fn record_upstream_attempt(&mut self) {
        self.upstream_attempts += 1;
    }

    pub fn upstream_opened(&mut self) {
        if self.phase == UpstreamPhase::Connecting {
            self.phase = UpstreamPhase::Open;
        }
    }

    pub fn close(&mut self) {
        self.phase = UpstreamPhase::Closed;
    }

    /// Client frames are only relayed while the upstream leg is open.
    pub fn accepts_client_frames(&self) -> bool {
        self.phase == UpstreamPhase::Open
    }

    /// Counts a client frame that arrived while the upstream was not open.
    pub fn drop_client_frame(&mut self) {
        self.dropped_client_frames += 1;
    }

    pub fn record_forwarded_upstream(&mut self) {
        self.forwarded_upstream += 1;
    }

    /// Records a downstream text frame and reports whether the session
    /// configuration must follow it upstream.
    ///
    /// True exactly once per pair: for the first `session.created` seen while open.
    pub fn observe_downstream_text(&mut self, text: &str) -> bool {
        self.forwarded_downstream += 1;
        self.phase == UpstreamPhase::Open
            && !self.configured
            && realtime::event_type(text).as_deref() == Some(SESSION_CREATED)
    }

    pub fn record_forwarded_downstream(&mut self) {
        self.forwarded_downstream += 1;
    }

    pub fn mark_configured(&mut self) {
        self.configured = true;
    }
}
