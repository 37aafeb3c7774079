//! Server-Sent Events (SSE) handler.
//!
//! Subscribes signed-in callers to the [`EventBus`](ql_core::events::EventBus),
//! optionally filtered by category, replays recent events for late joiners,
//! and sends keepalive heartbeats.

use axum::extract::{Extension, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use ql_core::events::EventCategory;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::auth::Caller;

/// Number of buffered events replayed to a new subscriber.
const REPLAY: usize = 50;

/// Optional query parameter for category filtering.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Filter events by category: "admin" or "user".
    pub category: Option<String>,
}

/// GET /events -- SSE stream of engine events.
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<EventsQuery>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>, AppError> {
    if caller.0.is_none() {
        return Err(ql_core::Error::Unauthorized("sign in to subscribe to events".into()).into());
    }
    let category_filter = params.category.clone();

    let recent = ctx.event_bus.recent_events(REPLAY);
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if matches_category(event.category, &category_filter) {
                if let Ok(data) = serde_json::to_string(&event) {
                    yield Ok(Event::default().event(event.payload.event_type()).data(data));
                }
            }
        }

        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if matches_category(event.category, &category_filter) {
                                if let Ok(data) = serde_json::to_string(&event) {
                                    yield Ok(Event::default().event(event.payload.event_type()).data(data));
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!("SSE client lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(Event::default()
                        .event("heartbeat")
                        .data(r#"{"type":"heartbeat"}"#));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

fn matches_category(category: EventCategory, filter: &Option<String>) -> bool {
    match filter.as_deref() {
        Some("admin") => category == EventCategory::Admin,
        Some("user") => category == EventCategory::User,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_filter() {
        assert!(matches_category(EventCategory::Admin, &None));
        assert!(matches_category(EventCategory::User, &Some("user".into())));
        assert!(!matches_category(EventCategory::User, &Some("admin".into())));
        assert!(matches_category(EventCategory::User, &Some("bogus".into())));
    }
}
