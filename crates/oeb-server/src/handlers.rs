// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route handlers. Each one is a thin translation layer: parse the
//! request, call into a library crate, shape the response.

use crate::error::{ApiError, ApiJson};
use crate::voice::{VoiceNotifyRequest, VoiceResolution};
use crate::{AppState, bus::FilteredSubscription};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, extract::Request};
use chrono::{DateTime, Utc};
use oeb_core::{Envelope, EventContext, EventSource, create_event};
use oeb_pipeline::EnrichOutcome;
use oeb_store::QueryParams;
use oeb_voice::QueueItem;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_QUERY_LIMIT: usize = 100;
const MAX_QUERY_LIMIT: usize = 1000;

/// `POST /events/:name` — hook ingress, routed through the enrichment
/// pipeline.
pub async fn ingest_hook(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    ApiJson(payload): ApiJson<Value>,
) -> Result<Response, ApiError> {
    if !payload.is_object() {
        return Err(ApiError::bad_request("body must be a JSON object"));
    }

    let context = EventContext {
        app: state.config.default_app.clone(),
        app_root: state.config.default_app_root.clone(),
        source: EventSource::Hook,
        correlation_id: None,
    };

    match oeb_pipeline::enrich(&name, &payload, &context) {
        Ok(EnrichOutcome::Skipped { reason }) => Ok((
            StatusCode::OK,
            Json(json!({ "status": "skipped", "reason": reason })),
        )
            .into_response()),
        Ok(EnrichOutcome::Accepted(envelope)) => {
            let id = envelope.id.clone();
            let envelope = *envelope;
            state.store.push(envelope.clone());
            state.bus.publish(envelope);
            Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
        }
        Err(err) => Err(ApiError::bad_request(err.to_string())),
    }
}

/// A partial event, wrapped through the envelope factory before storage.
#[derive(Debug, Deserialize)]
struct PartialEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
    app: Option<String>,
    #[serde(rename = "appRoot")]
    app_root: Option<String>,
    source: Option<EventSource>,
    #[serde(rename = "correlationId")]
    correlation_id: Option<String>,
}

/// `POST /events` — programmatic ingress. Accepts either a full envelope
/// (carrying its own `schemaVersion`) or a partial event wrapped here.
pub async fn ingest_programmatic(
    State(state): State<Arc<AppState>>,
    ApiJson(value): ApiJson<Value>,
) -> Result<Response, ApiError> {
    if !value.is_object() {
        return Err(ApiError::bad_request("body must be a JSON object"));
    }

    let envelope = if value.get("schemaVersion").is_some() {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|err| ApiError::bad_request(format!("invalid envelope: {err}")))?;
        envelope
            .validate()
            .map_err(|err| ApiError::bad_request(err.to_string()))?;
        envelope
    } else {
        let partial: PartialEvent = serde_json::from_value(value)
            .map_err(|err| ApiError::bad_request(format!("invalid event: {err}")))?;
        let context = EventContext {
            app: partial.app.unwrap_or_else(|| state.config.default_app.clone()),
            app_root: partial
                .app_root
                .unwrap_or_else(|| state.config.default_app_root.clone()),
            source: partial.source.unwrap_or(EventSource::Cli),
            correlation_id: partial.correlation_id,
        };
        create_event(partial.event_type, partial.data, &context)
            .map_err(|err| ApiError::bad_request(err.to_string()))?
    };

    let id = envelope.id.clone();
    state.store.push(envelope.clone());
    state.bus.publish(envelope);
    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "id": id }))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "type")]
    event_type: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

/// `GET /events` — query the in-memory store.
pub async fn query_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<Envelope>> {
    let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT);
    let params = QueryParams {
        event_type: query.event_type,
        since: query.since,
        limit: Some(limit),
    };
    Json(state.store.query(&params))
}

/// `GET /health`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime_s = state.started_at.elapsed().as_secs();
    let (voice_mode, queue_depth, is_playing) = match &state.voice {
        Some(queue) => ("enabled", queue.depth().await, queue.is_playing()),
        None => ("disabled", 0, false),
    };

    Json(json!({
        "status": "ok",
        "nonce": state.nonce,
        "uptime_s": uptime_s,
        "events": {
            "total": state.store.size(),
            "types": state.store.type_counts(),
        },
        "persistErrors": state.store.persist_errors(),
        "wsClients": state.bus.subscriber_count(),
        "version": oeb_core::SCHEMA_VERSION,
        "voice": {
            "mode": voice_mode,
            "queueDepth": queue_depth,
            "isPlaying": is_playing,
        },
    }))
}

/// `POST /voice/notify`.
pub async fn voice_notify(
    State(state): State<Arc<AppState>>,
    ApiJson(value): ApiJson<Value>,
) -> Result<Response, ApiError> {
    let request: VoiceNotifyRequest = serde_json::from_value(value)
        .map_err(|err| ApiError::bad_request(format!("invalid voice request: {err}")))?;

    let resolution = state.voice_catalog.resolve(&request, state.voice.is_some());
    match resolution {
        VoiceResolution::Queued {
            label,
            text,
            file_path,
        } => {
            if let Some(queue) = &state.voice {
                queue.enqueue(QueueItem::new(file_path, label.clone())).await;
            }
            Ok((StatusCode::OK, Json(json!({ "queued": true, "label": label, "text": text }))).into_response())
        }
        VoiceResolution::Skipped(reason) => {
            Ok((StatusCode::OK, Json(json!({ "queued": false, "reason": reason }))).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

/// `GET /ws` — upgrade and attach to exactly one topic.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.event_type))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, type_filter: Option<String>) {
    let mut subscription: FilteredSubscription = state.bus.subscribe(type_filter);
    debug!("ws subscriber attached");

    loop {
        tokio::select! {
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else { break };
                let Ok(text) = serde_json::to_string(&envelope) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(error = %err, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    debug!("ws subscriber detached");
}

/// Fallback for any route the core doesn't implement. Static asset serving
/// and the dashboard UI are out of scope.
pub async fn not_found(_req: Request) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}
