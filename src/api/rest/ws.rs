use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::delivery::DeliveryEvent;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct FeedFilter {
    pub delivery_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
}

impl FeedFilter {
    fn accepts(&self, event: &DeliveryEvent) -> bool {
        self.delivery_id.is_none_or(|id| event.delivery_id == id)
            && self
                .driver_id
                .is_none_or(|id| event.driver_id == Some(id))
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(filter): Query<FeedFilter>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: FeedFilter) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.delivery_events_tx.subscribe());

    info!(
        delivery_id = ?filter.delivery_id,
        driver_id = ?filter.driver_id,
        "delivery feed client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "delivery feed client lagging, events dropped");
                    continue;
                }
            };

            if !filter.accepts(&event) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize delivery event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("delivery feed client disconnected");
}
