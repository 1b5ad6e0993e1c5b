//! Opening the agent's event stream.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};
use url::Url;

use cortex_core::config::{AgentConfig, HttpConfig, SnowflakeConfig};

use crate::error::TransportError;
use crate::request::AgentRequest;
use crate::sse::{FrameStream, SseDecoder};

pub const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// Source of SSE frames for one turn.
///
/// An `Err` means no event was received: the request could not be sent or
/// the server answered with a non-success status.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn open(&self, request: &AgentRequest, token: &str) -> Result<FrameStream, TransportError>;
}

/// `POST`s the request to the agent `:run` endpoint and decodes the
/// `text/event-stream` response body.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    endpoint: Url,
    token_type: String,
    request_timeout: Duration,
    max_event_bytes: usize,
}

impl HttpAgentTransport {
    pub fn new(
        snowflake: &SnowflakeConfig,
        agent: &AgentConfig,
        http: &HttpConfig,
    ) -> Result<Self, TransportError> {
        let mut endpoint = snowflake
            .account_url()
            .map_err(|e| TransportError::Endpoint(e.to_string()))?;
        // Appended, not joined: a path prefix on the account URL is kept.
        let path = agent.endpoint_path();
        endpoint
            .path_segments_mut()
            .map_err(|_| TransportError::Endpoint("account URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(path.trim_start_matches('/').split('/'));
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            token_type: snowflake.token_type.clone(),
            request_timeout: Duration::from_secs(http.request_timeout_secs),
            max_event_bytes: http.max_event_bytes,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn open(&self, request: &AgentRequest, token: &str) -> Result<FrameStream, TransportError> {
        debug!(url = %self.endpoint, messages = request.messages.len(), "opening agent stream");

        let send = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(TOKEN_TYPE_HEADER, &self.token_type)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send();

        // Bounds the wait for response headers only; the stream itself may
        // legitimately run longer.
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| {
                TransportError::Network(format!(
                    "no response within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "agent request rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decoder = SseDecoder::new(Box::pin(response.bytes_stream()))
            .with_max_frame_bytes(self.max_event_bytes);
        Ok(Box::pin(decoder))
    }
}

/// Scripted transport for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::sse::SseFrame;
    use futures::{stream, StreamExt};
    use std::collections::VecDeque;
    use std::sync::{Mutex, PoisonError};

    enum Scripted {
        Frames(Vec<Result<SseFrame, TransportError>>),
        /// Frames, then a stream that never ends.
        Stalled(Vec<SseFrame>),
        Refused(TransportError),
    }

    /// Returns queued responses in FIFO order and records every request.
    /// With nothing queued, a call gets a stream holding only `[DONE]`.
    #[derive(Default)]
    pub struct MockTransport {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<(AgentRequest, String)>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a stream of `(event, data)` frames.
        pub fn queue_events(&self, events: &[(Option<&str>, &str)]) {
            let frames = events
                .iter()
                .map(|(event, data)| Ok(SseFrame::new(*event, data)))
                .collect();
            self.push(Scripted::Frames(frames));
        }

        /// Queue frames or mid-stream errors.
        pub fn queue_frames(&self, frames: Vec<Result<SseFrame, TransportError>>) {
            self.push(Scripted::Frames(frames));
        }

        /// Queue frames followed by a stream that stays open forever.
        pub fn queue_stalled(&self, events: &[(Option<&str>, &str)]) {
            let frames = events
                .iter()
                .map(|(event, data)| SseFrame::new(*event, data))
                .collect();
            self.push(Scripted::Stalled(frames));
        }

        /// Queue a failure to open the stream.
        pub fn queue_refusal(&self, error: TransportError) {
            self.push(Scripted::Refused(error));
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        /// Requests received so far, with the token each was sent with.
        pub fn requests(&self) -> Vec<(AgentRequest, String)> {
            self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        fn push(&self, scripted: Scripted) {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(scripted);
        }
    }

    // Each item yields to the scheduler first so watchers observe every
    // intermediate state, as they would with a real network stream.
    fn paced<S>(items: S) -> impl futures::Stream<Item = S::Item> + Send
    where
        S: futures::Stream + Send,
        S::Item: Send,
    {
        items.then(|item| async move {
            tokio::task::yield_now().await;
            item
        })
    }

    #[async_trait]
    impl AgentTransport for MockTransport {
        async fn open(&self, request: &AgentRequest, token: &str) -> Result<FrameStream, TransportError> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((request.clone(), token.to_string()));

            let next = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();

            match next {
                Some(Scripted::Frames(frames)) => Ok(Box::pin(paced(stream::iter(frames)))),
                Some(Scripted::Stalled(frames)) => Ok(Box::pin(paced(
                    stream::iter(frames.into_iter().map(Ok::<_, TransportError>))
                        .chain(stream::pending()),
                ))),
                Some(Scripted::Refused(error)) => Err(error),
                None => {
                    let done: Result<SseFrame, TransportError> = Ok(SseFrame::new(None, "[DONE]"));
                    Ok(Box::pin(paced(stream::iter(vec![done]))))
                }
            }
        }
    }
}
