//! Event stream over one SSE response

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use projsync_core::RawEvent;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::parser::SseParser;
use super::types::{StreamError, StreamResult};

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Raw events read from one SSE response
///
/// Ends (`None`) when the server closes the response. A transport error is
/// yielded once and then the stream ends; parse errors are yielded and the
/// stream keeps going.
pub struct EventStream {
    bytes: ByteStream,
    parser: SseParser,
    buffered: VecDeque<StreamResult<RawEvent>>,
    finished: bool,
}

impl EventStream {
    /// Open the event stream at `url`
    pub async fn connect(client: &Client, url: Url) -> StreamResult<Self> {
        debug!("Connecting to SSE stream: {}", url);

        let response = client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StreamError::Server { status, message });
        }

        Ok(Self::from_bytes(response.bytes_stream()))
    }

    /// Wrap an existing byte stream
    pub fn from_bytes<S>(bytes: S) -> Self
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            bytes: Box::pin(bytes),
            parser: SseParser::new(),
            buffered: VecDeque::new(),
            finished: false,
        }
    }
}

impl Stream for EventStream {
    type Item = StreamResult<RawEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(event) = this.buffered.pop_front() {
                return Poll::Ready(Some(event));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.bytes.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffered.extend(this.parser.feed(chunk)),
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn chunks(parts: &[&'static str]) -> EventStream {
        let items: Vec<Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        EventStream::from_bytes(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn yields_events_across_chunks_then_ends() {
        let mut stream = chunks(&[
            "event: projectChanged\ndata: {\"projectID\":\"a\"}\n",
            "\nevent: projectDeletion\n",
            "data: {\"projectID\":\"b\"}\n\n",
        ]);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.project_id(), Some("a"));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.event_type, "projectDeletion");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn parse_errors_do_not_end_the_stream() {
        let mut stream = chunks(&[
            "event: projectChanged\ndata: nope\n\n",
            "event: projectChanged\ndata: {\"projectID\":\"a\"}\n\n",
        ]);

        assert!(matches!(stream.next().await, Some(Err(StreamError::Parse(_)))));
        assert!(stream.next().await.unwrap().is_ok());
    }
}
