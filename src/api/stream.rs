//! Server-pushed event stream per task.
//!
//! Replays committed events past the client's last seen sequence, then
//! switches to live delivery from the bus. Delivery is at-least-once;
//! duplicates are suppressed per connection by sequence number, and clients
//! reconcile across reconnects by passing `since` (or `Last-Event-ID`).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::domain::models::TaskEvent;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub since: Option<u64>,
}

fn sse_event(event: &TaskEvent) -> Event {
    Event::default()
        .id(event.seq.to_string())
        .event(event.payload.kind())
        .data(serde_json::to_string(event).unwrap_or_default())
}

pub async fn stream_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let since = query.since.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    });

    // Subscribe before replaying so nothing committed in between is lost;
    // the per-connection sequence filter drops the overlap.
    let mut rx = state.bus.subscribe();
    let replayed = state.bus.replay(task_id, since).await.unwrap_or_default();

    let stream = async_stream::stream! {
        let mut last_sent = since;

        for event in replayed {
            last_sent = Some(event.seq);
            yield Ok(sse_event(&event));
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.task_id != task_id {
                        continue;
                    }
                    if last_sent.is_some_and(|last| event.seq <= last) {
                        continue;
                    }
                    last_sent = Some(event.seq);
                    yield Ok(sse_event(&event));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Fell behind the channel; reconcile from the log.
                    let missed = state
                        .bus
                        .replay(task_id, last_sent)
                        .await
                        .unwrap_or_default();
                    for event in missed {
                        last_sent = Some(event.seq);
                        yield Ok(sse_event(&event));
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
