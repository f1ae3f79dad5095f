//! Push-event transport
//!
//! The server publishes project events over SSE. [`EventStream`] turns one
//! HTTP response into a stream of [`RawEvent`](projsync_core::RawEvent)s and
//! [`spawn_event_pump`] keeps a connection fed, reconnecting with backoff.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use projsync_client::EventStream;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest::Client::new();
//! let url = url::Url::parse("http://localhost:9090/api/v1/events")?;
//! let mut events = EventStream::connect(&client, url).await?;
//!
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

mod parser;
mod pump;
mod stream;
mod types;

pub use parser::SseParser;
pub use pump::spawn_event_pump;
pub use stream::EventStream;
pub use types::{StreamError, StreamResult};
