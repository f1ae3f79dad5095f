//! Keeps a connection fed from its event stream

use std::sync::Weak;

use futures::StreamExt;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::stream::EventStream;
use super::types::StreamError;
use crate::config::StreamConfig;
use crate::connection::Connection;

/// Stream events from `url` into `connection` until the connection is dropped.
///
/// A broken stream marks the connection disconnected (failing its pending
/// operations) and is reopened with exponential backoff. A 401/403 marks it
/// unauthorized instead. Every successful open, the first one included,
/// queues a full resync so nothing pushed before the stream was up is lost.
pub fn spawn_event_pump(
    connection: Weak<Connection>,
    client: Client,
    url: Url,
    config: StreamConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;

        loop {
            match EventStream::connect(&client, url.clone()).await {
                Ok(mut stream) => {
                    attempt = 0;
                    let Some(conn) = connection.upgrade() else {
                        break;
                    };
                    info!(connection_id = %conn.id(), "Event stream open");
                    conn.stream_opened();
                    drop(conn);

                    while let Some(item) = stream.next().await {
                        let Some(conn) = connection.upgrade() else {
                            debug!("Connection dropped, stopping event pump");
                            return;
                        };
                        match item {
                            Ok(event) => conn.submit(event),
                            Err(StreamError::Parse(e)) => {
                                warn!(connection_id = %conn.id(), "Skipping unparseable event: {}", e)
                            }
                            Err(e) => {
                                warn!(connection_id = %conn.id(), "Event stream failed: {}", e);
                                break;
                            }
                        }
                    }

                    let Some(conn) = connection.upgrade() else {
                        break;
                    };
                    conn.set_connected(false);
                }
                Err(e) => {
                    let Some(conn) = connection.upgrade() else {
                        break;
                    };
                    warn!(connection_id = %conn.id(), attempt, "Cannot open event stream: {}", e);
                    if e.is_unauthorized() {
                        conn.set_authorized(false);
                    } else {
                        conn.set_connected(false);
                    }
                }
            }

            let delay = config.backoff(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "Reopening event stream");
            tokio::time::sleep(delay).await;
        }

        debug!("Event pump stopped");
    })
}
