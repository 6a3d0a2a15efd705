use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

use crate::config::OllamaApiConfig;
use crate::error::{parse_error_message, OllamaApiError};
use crate::events::OllamaStreamEvent;
use crate::headers::build_headers;
use crate::ndjson::{NdjsonStreamParser, ParsedEvent};
use crate::payload::OllamaChatRequest;
use crate::url::normalize_chat_url;

/// Pull-based sequence of decoded events for one chat request. It ends after
/// the terminal `Done` event or after the first error.
pub type OllamaEventStream = Pin<Box<dyn Stream<Item = ParsedEvent> + Send>>;

#[derive(Debug)]
pub struct OllamaApiClient {
    http: Client,
    config: OllamaApiConfig,
}

impl OllamaApiClient {
    pub fn new(config: OllamaApiConfig) -> Result<Self, OllamaApiError> {
        let endpoint = normalize_chat_url(&config.base_url);
        reqwest::Url::parse(&endpoint)
            .map_err(|error| OllamaApiError::InvalidBaseUrl(format!("{endpoint}: {error}")))?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(OllamaApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_url(&self.config.base_url)
    }

    pub fn build_headers(&self) -> Result<HeaderMap, OllamaApiError> {
        let headers = build_headers();
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    OllamaApiError::InvalidHeader(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    OllamaApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &OllamaChatRequest,
    ) -> Result<reqwest::RequestBuilder, OllamaApiError> {
        validate_request_payload_shape(request)?;

        let headers = self.build_headers()?;
        let mut payload = request.clone();
        payload.stream = true;
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(&payload))
    }

    /// Send one request. Non-success statuses become
    /// [`OllamaApiError::Status`]; nothing is retried.
    pub async fn send(&self, request: &OllamaChatRequest) -> Result<Response, OllamaApiError> {
        let response = self.build_request(request)?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_error_message(status, &body);
        tracing::debug!(status = status.as_u16(), %message, "chat request rejected");
        Err(OllamaApiError::Status(status, message))
    }

    /// Open a streamed chat completion and return its decoded events.
    pub async fn stream(
        &self,
        request: &OllamaChatRequest,
    ) -> Result<OllamaEventStream, OllamaApiError> {
        let response = self.send(request).await?;
        Ok(decode_event_stream(response.bytes_stream()))
    }
}

/// Decode a raw body stream into NDJSON events.
///
/// The returned stream stops after `done: true`, after the first error, or
/// with [`OllamaApiError::StreamInterrupted`] when the body closes before a
/// terminal line arrives.
pub fn decode_event_stream<S, B, E>(bytes: S) -> OllamaEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<OllamaApiError> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        parser: NdjsonStreamParser::default(),
        pending: VecDeque::new(),
        finished: false,
        saw_done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let parsed = state.parser.feed(chunk.as_ref());
                    state.enqueue(parsed);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    let error: OllamaApiError = error.into();
                    return Some((
                        Err(OllamaApiError::StreamInterrupted(error.to_string())),
                        state,
                    ));
                }
                None => {
                    state.finished = true;
                    let tail = state.parser.finish();
                    state.enqueue(tail);
                    if !state.saw_done {
                        state.pending.push_back(Err(OllamaApiError::StreamInterrupted(
                            "response body ended without a final line".to_owned(),
                        )));
                    }
                }
            }
        }
    }))
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    parser: NdjsonStreamParser,
    pending: VecDeque<ParsedEvent>,
    finished: bool,
    saw_done: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, parsed: Vec<ParsedEvent>) {
        for item in parsed {
            if self.saw_done {
                break;
            }
            if matches!(item, Ok(OllamaStreamEvent::Done(_))) {
                self.saw_done = true;
                self.finished = true;
            }
            self.pending.push_back(item);
        }
    }
}

fn validate_request_payload_shape(request: &OllamaChatRequest) -> Result<(), OllamaApiError> {
    if request.model.trim().is_empty() {
        return Err(OllamaApiError::InvalidRequestPayload(
            "'model' must not be empty".to_owned(),
        ));
    }
    if request.messages.is_empty() {
        return Err(OllamaApiError::InvalidRequestPayload(
            "'messages' must contain at least one message".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures_util::{stream, StreamExt};

    use super::decode_event_stream;
    use crate::error::OllamaApiError;
    use crate::events::OllamaStreamEvent;

    fn chunks(parts: &[&str]) -> Vec<Result<Vec<u8>, OllamaApiError>> {
        parts.iter().map(|part| Ok(part.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn decode_stops_after_done_line() {
        let body = chunks(&[
            "{\"message\":{\"content\":\"A\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n",
            "{\"message\":{\"content\":\"ignored\"},\"done\":false}\n",
        ]);
        let events: Vec<_> = decode_event_stream(stream::iter(body)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(OllamaStreamEvent::ContentDelta(text)) if text == "A"));
        assert!(matches!(&events[1], Ok(OllamaStreamEvent::Done(stats))
            if stats.done_reason.as_deref() == Some("stop")));
    }

    #[tokio::test]
    async fn decode_reports_interruption_without_done() {
        let body = chunks(&["{\"message\":{\"content\":\"partial\"},\"done\":false}\n"]);
        let events: Vec<_> = decode_event_stream(stream::iter(body)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(
            events[1],
            Err(OllamaApiError::StreamInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn decode_accepts_unterminated_final_line() {
        let body = chunks(&["{\"message\":{\"content\":\"x\"},\"done\":false}\n{\"done\":true}"]);
        let events: Vec<_> = decode_event_stream(stream::iter(body)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Ok(OllamaStreamEvent::Done(_))));
    }

    #[tokio::test]
    async fn decode_ends_at_first_error() {
        let body = chunks(&[
            "{\"error\":\"out of memory\"}\n",
            "{\"done\":true}\n",
        ]);
        let events: Vec<_> = decode_event_stream(stream::iter(body)).collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Err(OllamaApiError::StreamFailed(message))
            if message == "out of memory"));
    }
}
