//! The sequencer agent: admits sessions from the ingress subscription and
//! serializes session lifecycle events, session messages, and timer
//! expirations into the replicated log.
//!
//! The agent is strictly single-threaded; the media client it embeds is
//! driven cooperatively from this duty cycle rather than behind a lock.

use std::collections::HashMap;
use std::convert::TryFrom;

use log::{debug, error, warn};

use crate::cluster::codecs::{
    message_header, session_close, session_close_event, session_connect, session_keep_alive,
    session_message, session_open_event, timer_event, CloseReason, ClusterMessageType,
};
use crate::cluster::session::{ClusterSession, SessionState};
use crate::cluster::timer::{TimerService, TIMER_POLL_LIMIT};
use crate::cluster::transport::{ControlledPollAction, EventPublication, FragmentPoller};
use crate::concurrent::agent::{Agent, AgentInvoker};
use crate::concurrent::clock::{CachedEpochClock, EpochClock, SystemEpochClock};
use crate::util::{BusError, ErrorHandler, IndexT, Result};

/// Maximum ingress fragments handled per work cycle
pub const FRAGMENT_POLL_LIMIT: usize = 10;

/// Attempts at claiming log space before an append is abandoned
pub const MAX_SEND_ATTEMPTS: usize = 3;

/// Maximum age of a pending session before it is discarded
pub const DEFAULT_PENDING_SESSION_TIMEOUT_MS: i64 = 5_000;

/// Maximum silence from an open session before it is closed with reason
/// timeout
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = 10_000;

/// Opens a response publication for a newly connecting session.
pub type ResponsePublicationSupplier =
    Box<dyn FnMut(&str, i32) -> Result<Box<dyn EventPublication + Send>> + Send>;

/// Configuration consumed by the sequencer. Channel addresses describe the
/// transports an external runner wires up; the sequencer itself only sees
/// the capability traits.
pub struct SequencerContext {
    /// Channel URI of the ingress subscription
    pub ingress_channel: String,
    /// Stream id of the ingress subscription
    pub ingress_stream_id: i32,
    /// Channel URI of the log publication
    pub log_channel: String,
    /// Stream id of the log publication
    pub log_stream_id: i32,
    /// Channel URI of the timer transport
    pub timer_channel: String,
    /// Stream id of the timer transport
    pub timer_stream_id: i32,
    /// Maximum age of a session that has not completed admission
    pub pending_session_timeout_ms: i64,
    /// Maximum silence from an open session before a timeout close
    pub session_timeout_ms: i64,
    /// Sink for asynchronous errors
    pub error_handler: ErrorHandler,
    /// Wall clock cached once per work cycle
    pub epoch_clock: Box<dyn EpochClock + Send>,
}

impl Default for SequencerContext {
    fn default() -> Self {
        SequencerContext {
            ingress_channel: "bus:udp?endpoint=0.0.0.0:9010".to_string(),
            ingress_stream_id: 101,
            log_channel: "bus:ipc?alias=cluster-log".to_string(),
            log_stream_id: 100,
            timer_channel: "bus:ipc?alias=cluster-timer".to_string(),
            timer_stream_id: 102,
            pending_session_timeout_ms: DEFAULT_PENDING_SESSION_TIMEOUT_MS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            error_handler: Box::new(|err| error!("sequencer error: {}", err)),
            epoch_clock: Box::new(SystemEpochClock),
        }
    }
}

struct SequencerCore<L>
where
    L: EventPublication,
{
    log: L,
    sessions: HashMap<i64, ClusterSession>,
    pending_sessions: Vec<ClusterSession>,
    timers: TimerService,
    cached_time_ms: CachedEpochClock,
    epoch_clock: Box<dyn EpochClock + Send>,
    next_session_id: i64,
    pending_session_timeout_ms: i64,
    session_timeout_ms: i64,
    response_publications: ResponsePublicationSupplier,
    error_handler: ErrorHandler,
}

/// The cluster sequencer agent over an ingress poller `I` and a log
/// publication `L`.
pub struct SequencerAgent<I, L>
where
    I: FragmentPoller,
    L: EventPublication,
{
    ingress: I,
    client_invoker: Option<AgentInvoker<Box<dyn Agent + Send>>>,
    core: SequencerCore<L>,
}

impl<I, L> SequencerAgent<I, L>
where
    I: FragmentPoller,
    L: EventPublication,
{
    /// Assemble a sequencer from its transports and configuration.
    pub fn new(
        context: SequencerContext,
        ingress: I,
        log: L,
        response_publications: ResponsePublicationSupplier,
    ) -> Self {
        SequencerAgent {
            ingress,
            client_invoker: None,
            core: SequencerCore {
                log,
                sessions: HashMap::new(),
                pending_sessions: Vec::new(),
                timers: TimerService::new(),
                cached_time_ms: CachedEpochClock::new(),
                epoch_clock: context.epoch_clock,
                next_session_id: 1,
                pending_session_timeout_ms: context.pending_session_timeout_ms,
                session_timeout_ms: context.session_timeout_ms,
                response_publications,
                error_handler: context.error_handler,
            },
        }
    }

    /// Embed the media client's conductor agent into this duty cycle. The
    /// sequencer invokes it once per work cycle, so the client needs no
    /// lock of its own.
    pub fn with_client_invoker(
        mut self,
        invoker: AgentInvoker<Box<dyn Agent + Send>>,
    ) -> Self {
        self.client_invoker = Some(invoker);
        self
    }

    /// Schedule (or re-schedule) a timer to fire at `deadline_ms`.
    pub fn schedule_timer(&mut self, correlation_id: i64, deadline_ms: i64) {
        self.core.timers.schedule(correlation_id, deadline_ms);
    }

    /// Cancel a scheduled timer.
    pub fn cancel_timer(&mut self, correlation_id: i64) -> bool {
        self.core.timers.cancel_timer(correlation_id)
    }

    /// Number of live (admitted) sessions.
    pub fn session_count(&self) -> usize {
        self.core.sessions.len()
    }

    /// Number of sessions still being admitted.
    pub fn pending_session_count(&self) -> usize {
        self.core.pending_sessions.len()
    }

    /// Lifecycle state of a live session, if known.
    pub fn session_state(&self, session_id: i64) -> Option<SessionState> {
        self.core.sessions.get(&session_id).map(|s| s.state())
    }

    /// Access the log publication, e.g. to drain appended events in tests
    /// and tooling.
    pub fn log_mut(&mut self) -> &mut L {
        &mut self.core.log
    }

    /// Access the ingress transport, e.g. to enqueue frames in tests and
    /// tooling.
    pub fn ingress_mut(&mut self) -> &mut I {
        &mut self.ingress
    }

    /// One sequencer work cycle: refresh the cached clock, drive the
    /// embedded client, process pending sessions, poll ingress, poll
    /// timers.
    pub fn do_work(&mut self) -> Result<usize> {
        let now_ms = self.core.epoch_clock.time_ms();
        self.core.cached_time_ms.update(now_ms);

        let mut work_count = 0;

        if let Some(invoker) = self.client_invoker.as_mut() {
            work_count += invoker.invoke();
        }

        work_count += self.core.process_pending_sessions(now_ms);
        work_count += self.core.check_session_liveness(now_ms);

        let SequencerAgent { ingress, core, .. } = self;
        work_count += ingress.controlled_poll(
            &mut |frame| core.on_ingress_fragment(frame),
            FRAGMENT_POLL_LIMIT,
        )?;

        work_count += self.core.poll_timers()?;

        Ok(work_count)
    }
}

impl<I, L> Agent for SequencerAgent<I, L>
where
    I: FragmentPoller,
    L: EventPublication,
{
    fn do_work(&mut self) -> Result<usize> {
        SequencerAgent::do_work(self)
    }

    fn role_name(&self) -> &str {
        "cluster-sequencer"
    }
}

impl<L> SequencerCore<L>
where
    L: EventPublication,
{
    /// Admit pending sessions, iterating in reverse so unordered removal is
    /// cheap: `Init` sessions retry their client acknowledgement, and
    /// anything pending longer than the timeout is discarded without a log
    /// event.
    fn process_pending_sessions(&mut self, now_ms: i64) -> usize {
        let mut work_count = 0;

        for index in (0..self.pending_sessions.len()).rev() {
            let connected = {
                let session = &mut self.pending_sessions[index];
                if session.state() == SessionState::Init {
                    match session.notify_session_opened() {
                        Ok(connected) => connected,
                        Err(e) => {
                            (self.error_handler)(&e);
                            false
                        }
                    }
                } else {
                    false
                }
            };

            if connected {
                let mut session = self.pending_sessions.swap_remove(index);
                session.set_state(SessionState::Connected);
                let correlation_id = session.correlation_id();
                session.touch(now_ms, correlation_id);
                debug!("session {} connected", session.id());
                self.sessions.insert(session.id(), session);
                work_count += 1;
                continue;
            }

            if now_ms - self.pending_sessions[index].last_activity_ms()
                > self.pending_session_timeout_ms
            {
                let session = self.pending_sessions.swap_remove(index);
                warn!("pending session {} timed out before admission", session.id());
                work_count += 1;
            }
        }

        work_count
    }

    /// Close open sessions that have gone silent past the session timeout.
    fn check_session_liveness(&mut self, now_ms: i64) -> usize {
        let mut expired = Vec::new();
        for (session_id, session) in &self.sessions {
            if session.state() == SessionState::Open
                && now_ms - session.last_activity_ms() > self.session_timeout_ms
            {
                expired.push(*session_id);
            }
        }

        let mut work_count = 0;
        for session_id in expired {
            match Self::append_session_close(&mut self.log, session_id, CloseReason::Timeout, now_ms)
            {
                Ok(true) => {
                    warn!("session {} timed out", session_id);
                    self.sessions.remove(&session_id);
                    work_count += 1;
                }
                Ok(false) => {}
                Err(e) => (self.error_handler)(&e),
            }
        }
        work_count
    }

    fn on_ingress_fragment(&mut self, frame: &mut [u8]) -> ControlledPollAction {
        let msg_type = match message_header::msg_type(&frame) {
            Ok(msg_type) => msg_type,
            Err(e) => {
                (self.error_handler)(&e);
                return ControlledPollAction::Continue;
            }
        };

        match ClusterMessageType::try_from(msg_type) {
            Ok(ClusterMessageType::SessionConnect) => {
                self.on_session_connect(frame);
                ControlledPollAction::Continue
            }
            Ok(ClusterMessageType::SessionMessage) => self.on_session_message(frame),
            Ok(ClusterMessageType::SessionKeepAlive) => {
                self.on_session_keep_alive(frame);
                ControlledPollAction::Continue
            }
            Ok(ClusterMessageType::SessionClose) => {
                self.on_session_close_request(frame);
                ControlledPollAction::Continue
            }
            // Egress and log event types never arrive on ingress
            _ => ControlledPollAction::Continue,
        }
    }

    fn on_session_connect(&mut self, frame: &mut [u8]) {
        if frame.len() < session_connect::RESPONSE_CHANNEL_OFFSET as usize {
            // Malformed frame; drop it
            return;
        }

        // UNWRAP: fixed block bounds checked above
        let correlation_id = session_connect::correlation_id(&frame).unwrap();
        let response_stream_id = session_connect::response_stream_id(&frame).unwrap();
        let response_channel = match session_connect::response_channel(&frame) {
            Ok(channel) => channel.to_string(),
            Err(e) => {
                (self.error_handler)(&e);
                return;
            }
        };

        let publication =
            match (self.response_publications)(&response_channel, response_stream_id) {
                Ok(publication) => publication,
                Err(e) => {
                    (self.error_handler)(&e);
                    return;
                }
            };

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        let now_ms = self.cached_time_ms.time_ms();

        debug!(
            "session {} connecting, responses on {}:{}",
            session_id, response_channel, response_stream_id
        );
        self.pending_sessions.push(ClusterSession::new(
            session_id,
            correlation_id,
            response_stream_id,
            response_channel,
            publication,
            now_ms,
        ));
    }

    fn on_session_message(&mut self, frame: &mut [u8]) -> ControlledPollAction {
        if frame.len() < session_message::PAYLOAD_OFFSET as usize {
            // Malformed frame; drop it
            return ControlledPollAction::Continue;
        }

        // UNWRAP: header fields lie within the bounds checked above
        let session_id = session_message::session_id(&frame).unwrap();
        let correlation_id = session_message::correlation_id(&frame).unwrap();
        let now_ms = self.cached_time_ms.time_ms();

        let state = match self.sessions.get(&session_id) {
            Some(session) => session.state(),
            // Unknown sessions are dropped, not retried
            None => return ControlledPollAction::Continue,
        };
        if state == SessionState::Closed {
            return ControlledPollAction::Continue;
        }

        // The session's open event must precede its first message
        if state == SessionState::Connected {
            // UNWRAP: session presence established above
            let open_append = Self::append_session_open(
                &mut self.log,
                self.sessions.get(&session_id).unwrap(),
                now_ms,
            );
            match open_append {
                Ok(true) => {
                    // UNWRAP: session presence established above
                    self.sessions
                        .get_mut(&session_id)
                        .unwrap()
                        .set_state(SessionState::Open);
                }
                Ok(false) => return ControlledPollAction::Abort,
                Err(e) => {
                    (self.error_handler)(&e);
                    return ControlledPollAction::Abort;
                }
            }
        }

        {
            let mut view = &mut *frame;
            // UNWRAP: the timestamp lies within the bounds checked above
            session_message::put_timestamp_ms(&mut view, now_ms).unwrap();
        }

        let frame: &[u8] = frame;
        let mut appended = false;
        for _ in 0..MAX_SEND_ATTEMPTS {
            match self
                .log
                .try_claim(frame.len() as IndexT, &mut |buffer| {
                    buffer.copy_from_slice(frame)
                }) {
                Ok(true) => {
                    appended = true;
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    (self.error_handler)(&e);
                    return ControlledPollAction::Abort;
                }
            }
        }

        if appended {
            // UNWRAP: session presence established above
            self.sessions
                .get_mut(&session_id)
                .unwrap()
                .touch(now_ms, correlation_id);
            ControlledPollAction::Continue
        } else {
            ControlledPollAction::Abort
        }
    }

    fn on_session_keep_alive(&mut self, frame: &mut [u8]) {
        if frame.len() < session_keep_alive::LENGTH as usize {
            // Malformed frame; drop it
            return;
        }

        // UNWRAP: bounds checked above
        let session_id = session_keep_alive::session_id(&frame).unwrap();
        let correlation_id = session_keep_alive::correlation_id(&frame).unwrap();
        let now_ms = self.cached_time_ms.time_ms();

        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.touch(now_ms, correlation_id);
        }
    }

    fn on_session_close_request(&mut self, frame: &mut [u8]) {
        let session_id = match session_close::session_id(&frame) {
            Ok(session_id) => session_id,
            Err(e) => {
                (self.error_handler)(&e);
                return;
            }
        };
        let now_ms = self.cached_time_ms.time_ms();

        let state = match self.sessions.get(&session_id) {
            Some(session) => session.state(),
            None => return,
        };

        match state {
            // A session that never reached Open leaves no trace in the log
            SessionState::Connected => {
                debug!("session {} closed before opening", session_id);
                self.sessions.remove(&session_id);
            }
            // Closed means an earlier close append was back-pressured; the
            // event is still owed
            SessionState::Open | SessionState::Closed => {
                match Self::append_session_close(
                    &mut self.log,
                    session_id,
                    CloseReason::UserAction,
                    now_ms,
                ) {
                    Ok(true) => {
                        debug!("session {} closed", session_id);
                        self.sessions.remove(&session_id);
                    }
                    Ok(false) => {
                        // UNWRAP: session presence established above
                        self.sessions
                            .get_mut(&session_id)
                            .unwrap()
                            .set_state(SessionState::Closed);
                    }
                    Err(e) => {
                        (self.error_handler)(&e);
                        // UNWRAP: session presence established above
                        self.sessions
                            .get_mut(&session_id)
                            .unwrap()
                            .set_state(SessionState::Closed);
                    }
                }
            }
            SessionState::Init => {}
        }
    }

    fn poll_timers(&mut self) -> Result<usize> {
        let now_ms = self.cached_time_ms.time_ms();
        let SequencerCore { timers, log, .. } = self;

        timers.poll(
            now_ms,
            &mut |correlation_id| {
                for _ in 0..MAX_SEND_ATTEMPTS {
                    let appended = log.try_claim(timer_event::LENGTH, &mut |mut buffer| {
                        // UNWRAP: the claimed region is exactly the encoded
                        // length
                        timer_event::encode(&mut buffer, correlation_id, now_ms).unwrap();
                    })?;
                    if appended {
                        return Ok(());
                    }
                }
                Err(BusError::UnableToAppend)
            },
            TIMER_POLL_LIMIT,
        )
    }

    fn append_session_open(log: &mut L, session: &ClusterSession, now_ms: i64) -> Result<bool> {
        let session_id = session.id();
        let correlation_id = session.correlation_id();
        let response_stream_id = session.response_stream_id();
        let channel = session.response_channel();

        for _ in 0..MAX_SEND_ATTEMPTS {
            let appended = log.try_claim(session_open_event::length(channel), &mut |mut buffer| {
                // UNWRAP: the claimed region is exactly the encoded length
                session_open_event::encode(
                    &mut buffer,
                    session_id,
                    correlation_id,
                    now_ms,
                    response_stream_id,
                    channel,
                )
                .unwrap();
            })?;
            if appended {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn append_session_close(
        log: &mut L,
        session_id: i64,
        reason: CloseReason,
        now_ms: i64,
    ) -> Result<bool> {
        for _ in 0..MAX_SEND_ATTEMPTS {
            let appended = log.try_claim(session_close_event::LENGTH, &mut |mut buffer| {
                // UNWRAP: the claimed region is exactly the encoded length
                session_close_event::encode(&mut buffer, session_id, now_ms, reason).unwrap();
            })?;
            if appended {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
