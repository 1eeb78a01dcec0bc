//! Server-sent event stream for real-time clients.
//!
//! Each connected client gets its own broadcast receiver; the stream opens
//! with a `connected` acknowledgement frame and then forwards bus events
//! as `event: <type>` / `data: <json>` messages. There is no replay: a
//! client only sees events published after it connected.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use super::AppContext;

pub async fn event_stream(
    State(context): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(
        subscribers = context.bus.subscriber_count(),
        "sse client connected"
    );
    let rx = context.bus.subscribe();

    let ack = stream::once(async {
        Ok(Event::default().event("connected").data("{}"))
    });
    let events = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.type_str()).data(json))),
                Err(error) => {
                    warn!(%error, "failed to serialize event for sse");
                    None
                }
            },
            // Lagged receiver: this client missed events, keep streaming.
            Err(error) => {
                warn!(%error, "sse subscriber lagged");
                None
            }
        }
    });

    Sse::new(ack.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
