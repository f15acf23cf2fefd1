//! Server-sent events for workflow progress: buffered replay for late
//! joiners, then live events until a terminal status or idle timeout.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use codemend_common::{ConversationId, EventStatus, WorkflowEvent};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::server::AppState;

fn sse_event(event: &WorkflowEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(Uuid::new_v4().to_string())
        .event("workflow-update")
        .data(data)
}

fn is_terminal(event: &WorkflowEvent) -> bool {
    matches!(event.status, EventStatus::Complete | EventStatus::Error)
}

pub async fn stream_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let conversation_id = ConversationId::from_string(id.clone());
    let idle_timeout = Duration::from_secs(state.services.config.server.stream_idle_timeout_secs);

    let stream = async_stream::stream! {
        yield Ok(sse_event(&WorkflowEvent::status_only(
            &conversation_id,
            EventStatus::Connected,
            "stream connected",
        )));

        // a conversation that already finished gets its terminal status and
        // the stream ends; there is nothing further to wait for
        match state.supervisor.get(&conversation_id).await {
            Ok(Some(workflow)) if workflow.status.is_terminal() => {
                let status = match workflow.status {
                    codemend_common::WorkflowStatus::Completed => EventStatus::Complete,
                    _ => EventStatus::Error,
                };
                yield Ok(sse_event(&WorkflowEvent::status_only(
                    &conversation_id,
                    status,
                    format!("conversation is {}", workflow.status),
                )));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                yield Ok(sse_event(&WorkflowEvent::status_only(
                    &conversation_id,
                    EventStatus::Error,
                    format!("cannot load conversation: {e}"),
                )));
                return;
            }
        }

        let mut receiver = state.services.events.subscribe(&id);
        loop {
            match tokio::time::timeout(idle_timeout, receiver.recv()).await {
                Ok(Some(event)) => {
                    let terminal = is_terminal(&event);
                    yield Ok(sse_event(&event));
                    if terminal {
                        break;
                    }
                }
                // channel closed: finished or replaced by a newer subscriber
                Ok(None) => break,
                Err(_) => {
                    debug!(conversation_id = %id, "stream idle timeout");
                    state.services.events.idle_timeout(&id);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
