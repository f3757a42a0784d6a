//! Per-session state held by the sequencer: identity, lifecycle, the
//! response publication back to the client, and activity tracking.

use crate::cluster::codecs::{session_event, session_event_code};
use crate::cluster::transport::EventPublication;
use crate::util::Result;

/// Lifecycle of a cluster session.
///
/// A session is created `Init` and parked in the pending list. Successfully
/// acknowledging the client on its response publication makes it
/// `Connected` and moves it to the live table. Its open event reaching the
/// log makes it `Open`; only then do close events get logged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionState {
    /// Created from a connect request, not yet acknowledged
    Init,
    /// Acknowledged to the client, open event not yet logged
    Connected,
    /// Open event logged; messages flow
    Open,
    /// Closed; awaiting its close event if one is owed
    Closed,
}

/// One client conversation admitted (or being admitted) by the sequencer.
pub struct ClusterSession {
    id: i64,
    correlation_id: i64,
    response_stream_id: i32,
    response_channel: String,
    response_publication: Box<dyn EventPublication + Send>,
    state: SessionState,
    last_activity_ms: i64,
    last_correlation_id: i64,
}

impl ClusterSession {
    /// Create a session in `Init` from a connect request.
    pub fn new(
        id: i64,
        correlation_id: i64,
        response_stream_id: i32,
        response_channel: String,
        response_publication: Box<dyn EventPublication + Send>,
        now_ms: i64,
    ) -> Self {
        ClusterSession {
            id,
            correlation_id,
            response_stream_id,
            response_channel,
            response_publication,
            state: SessionState::Init,
            last_activity_ms: now_ms,
            last_correlation_id: correlation_id,
        }
    }

    /// Cluster-assigned session id
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Correlation id of the originating connect request
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    /// Stream id the client listens for responses on
    pub fn response_stream_id(&self) -> i32 {
        self.response_stream_id
    }

    /// Channel URI the client listens for responses on
    pub fn response_channel(&self) -> &str {
        &self.response_channel
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move the session to a new lifecycle state
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Timestamp of the last ingress activity for this session
    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms
    }

    /// Correlation id of the last ingress message for this session
    pub fn last_correlation_id(&self) -> i64 {
        self.last_correlation_id
    }

    /// Record ingress activity.
    pub fn touch(&mut self, now_ms: i64, correlation_id: i64) {
        self.last_activity_ms = now_ms;
        self.last_correlation_id = correlation_id;
    }

    /// Tell the client its session is open by claiming a session event on
    /// the response publication: header, event block, and the (empty)
    /// detail. `Ok(false)` means the publication is not yet accepting
    /// writes and the attempt should be repeated.
    pub fn notify_session_opened(&mut self) -> Result<bool> {
        let id = self.id;
        let correlation_id = self.correlation_id;
        self.response_publication.try_claim(
            session_event::length(""),
            &mut |mut buffer| {
                // UNWRAP: the claimed region is exactly the encoded length
                session_event::encode(&mut buffer, id, correlation_id, session_event_code::OK, "")
                    .unwrap();
            },
        )
    }
}
