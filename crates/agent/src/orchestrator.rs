//! Turn lifecycle: request, stream, fold, publish.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::activity::ActivityState;
use crate::builder::MessageBuilder;
use crate::conversation::Conversation;
use crate::error::TurnError;
use crate::interpret::interpret;
use crate::message::{Message, MessageId};
use crate::request::RequestTemplate;
use crate::sse::FrameStream;
use crate::stream::AgentEvent;
use crate::transport::AgentTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Failed { error: TurnError },
    Cancelled,
}

/// Outcome of the most recent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub status: TurnStatus,
    pub finished_at: DateTime<Utc>,
}

impl TurnReport {
    fn now(status: TurnStatus) -> Self {
        Self {
            status,
            finished_at: Utc::now(),
        }
    }

    pub fn error(&self) -> Option<&TurnError> {
        match &self.status {
            TurnStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub message_id: MessageId,
    pub events: usize,
    /// False when the stream closed without a `[DONE]` sentinel.
    pub saw_done: bool,
}

/// One chat session against one agent.
///
/// The session is the only writer of the conversation, activity and report
/// channels; any number of readers may subscribe. Turns run one at a time.
pub struct ChatSession {
    transport: Arc<dyn AgentTransport>,
    template: RequestTemplate,
    credential: Option<String>,
    conversation: watch::Sender<Arc<Conversation>>,
    activity: watch::Sender<ActivityState>,
    last_report: watch::Sender<Option<TurnReport>>,
    turn_gate: tokio::sync::Mutex<()>,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        template: RequestTemplate,
        credential: Option<String>,
    ) -> Self {
        Self {
            transport,
            template,
            credential: credential.filter(|c| !c.is_empty()),
            conversation: watch::channel(Arc::new(Conversation::new())).0,
            activity: watch::channel(ActivityState::Idle).0,
            last_report: watch::channel(None).0,
            turn_gate: tokio::sync::Mutex::new(()),
            in_flight: Mutex::new(None),
        }
    }

    // ── Read accessors ─────────────────────────────────────────

    pub fn conversation(&self) -> Arc<Conversation> {
        self.conversation.borrow().clone()
    }

    pub fn activity(&self) -> ActivityState {
        *self.activity.borrow()
    }

    pub fn last_report(&self) -> Option<TurnReport> {
        self.last_report.borrow().clone()
    }

    pub fn subscribe_conversation(&self) -> watch::Receiver<Arc<Conversation>> {
        self.conversation.subscribe()
    }

    pub fn subscribe_activity(&self) -> watch::Receiver<ActivityState> {
        self.activity.subscribe()
    }

    pub fn subscribe_reports(&self) -> watch::Receiver<Option<TurnReport>> {
        self.last_report.subscribe()
    }

    // ── Turns ──────────────────────────────────────────────────

    /// Spawn a turn, aborting the one in flight. The new turn starts once the
    /// aborted task has released the turn gate.
    pub fn submit_turn(
        self: &Arc<Self>,
        input: impl Into<String>,
    ) -> JoinHandle<Result<TurnSummary, TurnError>> {
        let input = input.into();
        let session = Arc::clone(self);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = in_flight.take() {
            if !previous.is_finished() {
                info!("aborting in-flight turn for new submission");
            }
            previous.abort();
        }
        let handle = tokio::spawn(async move { session.run_turn(&input).await });
        *in_flight = Some(handle.abort_handle());
        handle
    }

    /// Abort the in-flight submitted turn, if any. The partial assistant
    /// message stays in the conversation.
    pub fn cancel(&self) -> bool {
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match previous {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Run one turn to completion. Concurrent calls queue behind each other.
    pub async fn run_turn(&self, input: &str) -> Result<TurnSummary, TurnError> {
        let _gate = self.turn_gate.lock().await;

        let Some(token) = self.credential.as_deref() else {
            warn!("no auth token configured; turn not sent");
            let error = TurnError::CredentialMissing;
            self.report(TurnStatus::Failed {
                error: error.clone(),
            });
            return Err(error);
        };

        let started = Instant::now();
        let mut guard = TurnGuard::new(self);
        self.set_activity(ActivityState::Loading);

        let user = Arc::new(Message::user(input));
        info!(message_id = %user.id, "turn started");
        self.publish(user);

        let request = self.template.build(self.conversation.borrow().outbound_history());
        let result = match self.transport.open(&request, token).await {
            Ok(frames) => self.drive(frames).await,
            Err(e) => Err(TurnError::Transport(e)),
        };

        guard.disarm();
        self.set_activity(ActivityState::Idle);
        match &result {
            Ok(summary) => {
                info!(
                    message_id = %summary.message_id,
                    events = summary.events,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn completed"
                );
                self.report(TurnStatus::Completed);
            }
            Err(error) => {
                warn!(error = %error, elapsed_ms = started.elapsed().as_millis() as u64, "turn failed");
                self.report(TurnStatus::Failed {
                    error: error.clone(),
                });
            }
        }
        result
    }

    /// Fold frames into a fresh assistant message until a terminal event or
    /// the end of the stream.
    async fn drive(&self, mut frames: FrameStream) -> Result<TurnSummary, TurnError> {
        let mut builder = MessageBuilder::new(MessageId::generate());
        let mut events = 0;

        while let Some(next) = frames.next().await {
            let frame = next?;
            for event in interpret(&frame) {
                events += 1;
                if let AgentEvent::Unrecognized { event: name, reason } = &event {
                    debug!(event = ?name, reason = %reason, "skipping unrecognized event");
                    continue;
                }

                let outcome = builder.apply(&event);
                if outcome.changed {
                    self.publish(Arc::new(builder.message().clone()));
                }
                self.activity.send_if_modified(|state| {
                    let next = state.next(&event, &outcome);
                    let changed = next != *state;
                    *state = next;
                    changed
                });

                match event {
                    AgentEvent::Done => {
                        return Ok(TurnSummary {
                            message_id: builder.finish().id,
                            events,
                            saw_done: true,
                        });
                    }
                    AgentEvent::ServerError(error) => {
                        return Err(TurnError::ServerReported(error));
                    }
                    _ => {}
                }
            }
        }

        debug!("event stream closed without [DONE]");
        Ok(TurnSummary {
            message_id: builder.finish().id,
            events,
            saw_done: false,
        })
    }

    fn publish(&self, message: Arc<Message>) {
        self.conversation
            .send_if_modified(|conversation| Arc::make_mut(conversation).upsert(message));
    }

    fn set_activity(&self, next: ActivityState) {
        self.activity.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    fn report(&self, status: TurnStatus) {
        self.last_report.send_replace(Some(TurnReport::now(status)));
    }
}

/// Returns the session to idle when a turn's future is dropped before it
/// finishes, i.e. when its task is aborted.
struct TurnGuard<'a> {
    session: &'a ChatSession,
    armed: bool,
}

impl<'a> TurnGuard<'a> {
    fn new(session: &'a ChatSession) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            info!("turn cancelled");
            self.session.set_activity(ActivityState::Idle);
            self.session.report(TurnStatus::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::message::ContentBlock;
    use crate::sse::SseFrame;
    use crate::stream::ServerError;
    use crate::transport::mock::MockTransport;

    const TWO_ROW_RESULT: &str = r#"{"name":"sql_exec","content":[{"type":"json","json":{"sql":"SELECT region, revenue FROM sales","result_set":{"resultSetMetaData":{"rowType":[{"name":"REGION"},{"name":"REVENUE"}]},"data":[["EMEA","1200"],["APAC","800"]]}}}]}"#;

    fn session(mock: &Arc<MockTransport>) -> Arc<ChatSession> {
        Arc::new(ChatSession::new(
            mock.clone(),
            RequestTemplate::default(),
            Some("jwt-token".into()),
        ))
    }

    fn record_activity(session: &ChatSession) -> Arc<Mutex<Vec<ActivityState>>> {
        let mut rx = session.subscribe_activity();
        let trace = Arc::new(Mutex::new(vec![*rx.borrow_and_update()]));
        let sink = trace.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                sink.lock().unwrap().push(state);
            }
        });
        trace
    }

    fn assistant_kinds(session: &ChatSession) -> Vec<&'static str> {
        let conversation = session.conversation();
        conversation
            .last()
            .map(|m| m.content.iter().map(ContentBlock::kind).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_sql_result_turn() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[
            (Some("response.status"), r#"{"status":"executing_tools"}"#),
            (Some("response.tool_result"), TWO_ROW_RESULT),
            (None, "[DONE]"),
        ]);
        let session = session(&mock);
        let trace = record_activity(&session);

        let summary = session.run_turn("show revenue by region").await.unwrap();
        tokio::task::yield_now().await;

        assert!(summary.saw_done);
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                ActivityState::Idle,
                ActivityState::Loading,
                ActivityState::ExecutingSql,
                ActivityState::Idle,
            ]
        );
        assert_eq!(session.conversation().len(), 2);
        assert_eq!(assistant_kinds(&session), vec!["tool_results", "fetched_table"]);
        assert_eq!(
            session.last_report().map(|r| r.status),
            Some(TurnStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_text_deltas_merge_into_one_block() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[
            (Some("response.text.delta"), r#"{"text":"Hel"}"#),
            (Some("response.text.delta"), r#"{"text":"lo "}"#),
            (Some("response.text.delta"), r#"{"text":"world"}"#),
            (None, "[DONE]"),
        ]);
        let session = session(&mock);
        session.run_turn("hi").await.unwrap();

        let conversation = session.conversation();
        let assistant = conversation.last().unwrap();
        assert_eq!(
            assistant.content,
            vec![ContentBlock::Text { text: "Hello world".into() }]
        );
        assert_eq!(session.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn test_status_without_status_field_does_not_end_turn() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[
            (Some("response.text.delta"), r#"{"text":"Hel"}"#),
            (Some("response.status"), r#"{"message":"Planning the next steps"}"#),
            (Some("response.text.delta"), r#"{"text":"lo"}"#),
            (None, "[DONE]"),
        ]);
        let session = session(&mock);
        let summary = session.run_turn("hi").await.unwrap();

        assert!(summary.saw_done);
        assert_eq!(session.conversation().last().unwrap().text(), "Hello");
        assert_eq!(session.last_report().unwrap().status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_chart_result_turn() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[
            (
                Some("response.tool_result"),
                r#"{"name":"data_to_chart","content":[{"json":{"chart_spec":"{\"mark\":\"bar\"}"}}]}"#,
            ),
            (None, "[DONE]"),
        ]);
        let session = session(&mock);
        let trace = record_activity(&session);
        session.run_turn("chart it").await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(assistant_kinds(&session), vec!["tool_results", "chart"]);
        assert!(trace.lock().unwrap().contains(&ActivityState::RunningAnalytics));
        assert_eq!(session.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_event_changes_nothing() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_stalled(&[
            (Some("response.text.delta"), r#"{"text":"partial"}"#),
            (Some("response.text.delta"), "not json"),
        ]);
        let session = session(&mock);
        let trace = record_activity(&session);

        let handle = session.submit_turn("q");
        // Let the turn consume both frames and park on the open stream.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let snapshot = session.conversation();
        assert_eq!(snapshot.last().unwrap().text(), "partial");
        assert_eq!(session.activity(), ActivityState::Streaming);
        assert_eq!(
            *trace.lock().unwrap(),
            vec![ActivityState::Idle, ActivityState::Loading, ActivityState::Streaming]
        );
        assert!(session.last_report().is_none());

        assert!(session.cancel());
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_credential_fails_fast() {
        let mock = Arc::new(MockTransport::new());
        let session = ChatSession::new(mock.clone(), RequestTemplate::default(), None);

        let err = session.run_turn("hello").await.unwrap_err();
        assert_eq!(err, TurnError::CredentialMissing);
        assert_eq!(mock.call_count(), 0);
        assert_eq!(session.activity(), ActivityState::Idle);
        assert!(session.conversation().is_empty());
        assert_eq!(session.last_report().and_then(|r| r.error().cloned()), Some(err));
    }

    #[tokio::test]
    async fn test_empty_credential_counts_as_missing() {
        let mock = Arc::new(MockTransport::new());
        let session = ChatSession::new(mock.clone(), RequestTemplate::default(), Some(String::new()));
        assert_eq!(session.run_turn("x").await, Err(TurnError::CredentialMissing));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_request_creates_no_assistant_message() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_refusal(TransportError::Status {
            status: 401,
            body: "Unauthorized".into(),
        });
        let session = session(&mock);

        let err = session.run_turn("hello").await.unwrap_err();
        assert!(matches!(err, TurnError::Transport(TransportError::Status { status: 401, .. })));
        assert_eq!(session.conversation().len(), 1);
        assert_eq!(session.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn test_server_error_stops_turn_keeping_partial_message() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[
            (Some("response.text.delta"), r#"{"text":"Looking"}"#),
            (Some("error"), r#"{"code":"399504","message":"Agent not found"}"#),
            (Some("response.text.delta"), r#"{"text":" never applied"}"#),
        ]);
        let session = session(&mock);

        let err = session.run_turn("q").await.unwrap_err();
        assert_eq!(
            err,
            TurnError::ServerReported(ServerError {
                code: Some("399504".into()),
                message: "Agent not found".into(),
            })
        );
        assert_eq!(session.conversation().last().unwrap().text(), "Looking");
        assert_eq!(session.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn test_mid_stream_transport_error() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_frames(vec![
            Ok(SseFrame::new(Some("response.text.delta"), r#"{"text":"a"}"#)),
            Err(TransportError::Stream("connection reset".into())),
        ]);
        let session = session(&mock);
        let err = session.run_turn("q").await.unwrap_err();
        assert!(matches!(err, TurnError::Transport(TransportError::Stream(_))));
        assert_eq!(session.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn test_stream_end_without_done_completes() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[(Some("response.text.delta"), r#"{"text":"ok"}"#)]);
        let session = session(&mock);
        let summary = session.run_turn("q").await.unwrap();
        assert!(!summary.saw_done);
        assert_eq!(session.last_report().map(|r| r.status), Some(TurnStatus::Completed));
    }

    #[tokio::test]
    async fn test_history_sent_without_derived_blocks() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[(Some("response.tool_result"), TWO_ROW_RESULT), (None, "[DONE]")]);
        mock.queue_events(&[(None, "[DONE]")]);
        let session = session(&mock);

        session.run_turn("first").await.unwrap();
        session.run_turn("second").await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1, "jwt-token");
        let history = &requests[1].0.messages;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].content.len(), 1);
        assert_eq!(history[1].content[0].kind(), "tool_results");
    }

    #[tokio::test]
    async fn test_exactly_one_entry_per_message() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[
            (Some("response.text.delta"), r#"{"text":"a"}"#),
            (Some("response.tool_use"), r#"{"name":"analyst1","input":{}}"#),
            (Some("response.text.delta"), r#"{"text":"b"}"#),
            (Some("response.response"), "{}"),
            (Some("response"), "{}"),
            (None, "[DONE]"),
        ]);
        let session = session(&mock);
        let summary = session.run_turn("q").await.unwrap();

        let conversation = session.conversation();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().unwrap().id, summary.message_id);
        assert_eq!(assistant_kinds(&session), vec!["text", "tool_use", "text"]);
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_message() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_stalled(&[(Some("response.text.delta"), r#"{"text":"half an ans"}"#)]);
        let session = session(&mock);

        let handle = session.submit_turn("q");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(session.cancel());
        assert!(handle.await.unwrap_err().is_cancelled());

        assert_eq!(session.activity(), ActivityState::Idle);
        assert_eq!(session.last_report().map(|r| r.status), Some(TurnStatus::Cancelled));
        assert_eq!(session.conversation().last().unwrap().text(), "half an ans");
        assert!(!session.cancel());
    }

    #[tokio::test]
    async fn test_new_submission_aborts_previous_turn() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_stalled(&[(Some("response.text.delta"), r#"{"text":"first"}"#)]);
        mock.queue_events(&[(Some("response.text.delta"), r#"{"text":"second"}"#), (None, "[DONE]")]);
        let session = session(&mock);

        let first = session.submit_turn("one");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let second = session.submit_turn("two");

        assert!(first.await.unwrap_err().is_cancelled());
        second.await.unwrap().unwrap();

        let texts: Vec<String> = session.conversation().messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["one", "first", "two", "second"]);
        assert_eq!(session.activity(), ActivityState::Idle);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_run_turn_calls_queue() {
        let mock = Arc::new(MockTransport::new());
        mock.queue_events(&[(Some("response.text.delta"), r#"{"text":"a1"}"#), (None, "[DONE]")]);
        mock.queue_events(&[(Some("response.text.delta"), r#"{"text":"a2"}"#), (None, "[DONE]")]);
        let session = session(&mock);

        let (first, second) = tokio::join!(session.run_turn("q1"), session.run_turn("q2"));
        first.unwrap();
        second.unwrap();

        let texts: Vec<String> = session.conversation().messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["q1", "a1", "q2", "a2"]);
    }
}
