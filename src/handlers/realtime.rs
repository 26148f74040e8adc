use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};
use tower_cookies::Cookies;

use crate::{
    error::{ApiError, AppError},
    middleware::require_user,
    realtime::{ChangeFeed, RowChange},
    state::AppState,
};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Stream row changes for one table as Server-Sent Events. Each event is
/// named after the change kind and carries the change as JSON.
pub async fn subscribe(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(table): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    if !ChangeFeed::is_known_table(&table) {
        return Err(ApiError(AppError::NotFound("Table")));
    }
    log::debug!("{} subscribed to {table}", user.email);

    let stream = BroadcastStream::new(state.feed.subscribe()).filter_map(move |received| match received {
        Ok(change) if change.table == table => to_event(&change).map(Ok),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            log::warn!("realtime subscriber on {table} lagged, {skipped} changes skipped");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE)))
}

fn to_event(change: &RowChange) -> Option<Event> {
    match Event::default().event(change.event.as_str()).json_data(change) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("could not encode change on {}: {e}", change.table);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ChangeKind;
    use serde_json::json;

    #[test]
    fn changes_encode_as_named_events() {
        let change = RowChange {
            table: "products",
            event: ChangeKind::Insert,
            new: Some(json!({"sku": "WC-1"})),
            old: None,
        };
        assert!(to_event(&change).is_some());
    }
}
