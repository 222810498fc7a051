use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::browser::probes::{describe_click_target, describe_focused_element};
use crate::browser::MouseButton;
use crate::teach::TeachSession;

use super::state::AppState;

const TEACH_FRAME_PUMP_INTERVAL: Duration = Duration::from_millis(150);
const EVENT_LOG_TAIL: usize = 50;

// ---------------------------------------------------------------------------
// Run subscriber socket
// ---------------------------------------------------------------------------

pub async fn runs_ws_handler(
    ws: WebSocketUpgrade,
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_run_socket(socket, run_id, state))
}

/// Forward every run event to the client; accept `confirm_action`,
/// `submit_variables`, and `abort` back. A dropped client just loses its
/// queue; the run is unaffected.
async fn handle_run_socket(socket: WebSocket, run_id: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(run_state) = state.registry.get(&run_id).await else {
        let _ = sender
            .send(Message::Text(
                json!({"type": "runner_status", "message": "unknown_run"}).to_string(),
            ))
            .await;
        let _ = sender.close().await;
        return;
    };

    let mut subscription = run_state.subscribe().await;
    let subscriber_id = subscription.id;

    let send_task = tokio::spawn(async move {
        while let Some(message) = subscription.receiver.recv().await {
            if sender
                .send(Message::Text(message.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let recv_state = Arc::clone(&run_state);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(payload) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            match payload.get("type").and_then(Value::as_str) {
                Some("confirm_action") => {
                    let allow = payload
                        .get("allow")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    recv_state.resolve_confirmation(allow).await;
                }
                Some("submit_variables") => {
                    if let Some(values) = payload.get("values").and_then(Value::as_object) {
                        let values: HashMap<String, Value> =
                            values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                        recv_state.resolve_variables(values).await;
                    }
                }
                Some("abort") => recv_state.request_abort().await,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    run_state.unsubscribe(subscriber_id).await;
    tracing::info!("Run websocket disconnected: {}", run_id);
}

// ---------------------------------------------------------------------------
// Teach driver socket
// ---------------------------------------------------------------------------

pub async fn teach_ws_handler(
    ws: WebSocketUpgrade,
    Path(teach_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_teach_socket(socket, teach_id, state))
}

/// Bidirectional teach bridge: inbound pointer/keyboard driver input is
/// applied to the live page and logged with DOM introspection; outbound the
/// client gets a ~150 ms frame stream, probe results, and the event-log tail.
async fn handle_teach_socket(socket: WebSocket, teach_id: String, state: Arc<AppState>) {
    let (mut socket_sender, mut socket_receiver) = socket.split();

    let Some(session) = state.teach.get(&teach_id).await else {
        let _ = socket_sender
            .send(Message::Text(
                json!({"type": "status", "message": "No such session"}).to_string(),
            ))
            .await;
        let _ = socket_sender.close().await;
        return;
    };

    // One writer owns the sink; the frame pump and the driver loop both feed
    // this channel.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if socket_sender
                .send(Message::Text(message.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let pump_session = Arc::clone(&session);
    let pump_tx = out_tx.clone();
    let frame_pump = tokio::spawn(async move {
        while pump_session.is_running() {
            match pump_session.capture_frame(false).await {
                Ok(frame) => {
                    let message = json!({"type": "runner_frame", "frame": frame, "cursor": null});
                    if pump_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("Teach frame pump capture failed: {}", e);
                }
            }
            tokio::time::sleep(TEACH_FRAME_PUMP_INTERVAL).await;
        }
    });

    while let Some(Ok(message)) = socket_receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        handle_teach_message(&session, &payload, &out_tx).await;

        let recent = session.recent_events(EVENT_LOG_TAIL).await;
        if !recent.is_empty() {
            let _ = out_tx.send(json!({"type": "event_log", "events": recent}));
        }
    }

    tracing::info!("Teach websocket disconnected for {}", teach_id);
    // The session stays around for a /teach/stop call; only the streaming
    // stops.
    session.mark_stopped();
    frame_pump.abort();
    drop(out_tx);
    writer.abort();
}

fn probe_extra(meta: &Value, keys: &[&str]) -> Map<String, Value> {
    let mut extra = Map::new();
    for key in keys {
        if let Some(value) = meta.get(*key) {
            if !value.is_null() {
                extra.insert((*key).to_string(), value.clone());
            }
        }
    }
    extra
}

async fn handle_teach_message(
    session: &Arc<TeachSession>,
    payload: &Value,
    out_tx: &mpsc::UnboundedSender<Value>,
) {
    let page = session.page();
    let get_f64 = |key: &str| payload.get(key).and_then(Value::as_f64).unwrap_or(0.0);

    match payload.get("type").and_then(Value::as_str) {
        Some("mouse_move") => {
            let (x, y) = (get_f64("x"), get_f64("y"));
            if let Err(e) = page.mouse_move(x, y).await {
                tracing::debug!("Teach mouse_move failed: {}", e);
            }
            session
                .with_log(|log, ts| log.record_mouse_move(ts, x, y))
                .await;
        }

        Some("mouse_down") => {
            let (x, y) = (get_f64("x"), get_f64("y"));
            let button =
                MouseButton::from_index(payload.get("button").and_then(Value::as_i64).unwrap_or(0));
            if let Err(e) = page.mouse_move(x, y).await {
                tracing::debug!("Teach mouse_move failed: {}", e);
            }
            if let Err(e) = page.mouse_down(x, y, button).await {
                tracing::debug!("Teach mouse_down failed: {}", e);
            }
            let extra = match describe_click_target(&page, x, y).await {
                Some(meta) => {
                    let mut extra = probe_extra(
                        &meta,
                        &["element", "actionable", "clickable", "primaryLocator", "selectorCandidates"],
                    );
                    if let Some(best) = meta.get("bestSelector").filter(|v| !v.is_null()) {
                        extra.insert("selector".to_string(), best.clone());
                    }
                    extra
                }
                None => Map::new(),
            };
            session
                .with_log(|log, ts| log.record_mouse_down(ts, x, y, button, extra))
                .await;
        }

        Some("mouse_up") => {
            let (x, y) = (get_f64("x"), get_f64("y"));
            let button =
                MouseButton::from_index(payload.get("button").and_then(Value::as_i64).unwrap_or(0));
            if let Err(e) = page.mouse_up(x, y, button).await {
                tracing::debug!("Teach mouse_up failed: {}", e);
            }
            let extra = match describe_click_target(&page, x, y).await {
                Some(meta) => {
                    let mut extra =
                        probe_extra(&meta, &["element", "actionable", "primaryLocator"]);
                    if let Some(best) = meta.get("bestSelector").filter(|v| !v.is_null()) {
                        extra.insert("selector".to_string(), best.clone());
                    }
                    extra
                }
                None => Map::new(),
            };
            session
                .with_log(|log, ts| log.record_mouse_up(ts, x, y, button, extra))
                .await;
        }

        Some("wheel") => {
            let delta_x = payload.get("deltaX").and_then(Value::as_i64).unwrap_or(0);
            let delta_y = payload.get("deltaY").and_then(Value::as_i64).unwrap_or(0);
            let viewport = page.viewport();
            let (cx, cy) = ((viewport.width / 2) as f64, (viewport.height / 2) as f64);
            if let Err(e) = page.mouse_wheel(cx, cy, delta_x as f64, delta_y as f64).await {
                tracing::debug!("Teach wheel failed: {}", e);
            }
            session
                .with_log(|log, ts| log.record_scroll(ts, delta_x, delta_y))
                .await;
        }

        Some("key_down") => {
            let key = payload
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let code = payload
                .get("code")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            if !key.is_empty() {
                if let Err(e) = page.key_down_raw(&key).await {
                    tracing::debug!("Teach key_down failed: {}", e);
                }
            }
            let mods: Vec<String> = ["alt", "ctrl", "meta", "shift"]
                .iter()
                .filter(|m| payload.get(**m).and_then(Value::as_bool).unwrap_or(false))
                .map(|m| m.to_string())
                .collect();

            let mut extra = Map::new();
            if !mods.is_empty() || !key.is_empty() {
                let mut combo_parts: Vec<String> = mods
                    .iter()
                    .map(|m| {
                        let mut c = m.clone();
                        c[..1].make_ascii_uppercase();
                        c
                    })
                    .collect();
                if !key.is_empty() {
                    combo_parts.push(key.clone());
                }
                if !combo_parts.is_empty() {
                    extra.insert("combo".to_string(), json!(combo_parts.join("+")));
                }
            }
            if let Some(focus) = describe_focused_element(&page).await {
                if let Some(selector) = focus.get("selector").filter(|v| !v.is_null()) {
                    extra.insert("selector".to_string(), selector.clone());
                }
                extra.insert("focus".to_string(), focus);
            }
            session
                .with_log(|log, ts| log.record_key_down(ts, &key, code, mods, extra))
                .await;
        }

        Some("key_up") => {
            let key = payload
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if !key.is_empty() {
                if let Err(e) = page.key_up_raw(&key).await {
                    tracing::debug!("Teach key_up failed: {}", e);
                }
            }
            let mut extra = Map::new();
            if let Some(focus) = describe_focused_element(&page).await {
                if let Some(selector) = focus.get("selector").filter(|v| !v.is_null()) {
                    extra.insert("selector".to_string(), selector.clone());
                }
                extra.insert("focus".to_string(), focus);
            }
            session
                .with_log(|log, ts| log.record_key_up(ts, &key, extra))
                .await;
        }

        Some("probe_dom") => {
            let reason = payload
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("probe")
                .to_string();
            if reason == "focus" || reason == "activeElement" {
                let info = describe_focused_element(&page).await;
                let _ = out_tx.send(json!({
                    "type": "dom_probe",
                    "target": info,
                    "reason": "focus",
                }));
            } else {
                let (x, y) = (get_f64("x"), get_f64("y"));
                let info = describe_click_target(&page, x, y).await;
                let _ = out_tx.send(json!({
                    "type": "dom_probe",
                    "target": info,
                    "x": x,
                    "y": y,
                    "reason": reason,
                }));
                if let Some(info) = info {
                    let mut data = probe_extra(
                        &info,
                        &["element", "actionable", "clickable", "primaryLocator", "selectorCandidates"],
                    );
                    data.insert("x".to_string(), json!(x));
                    data.insert("y".to_string(), json!(y));
                    if let Some(best) = info.get("bestSelector").filter(|v| !v.is_null()) {
                        data.insert("selector".to_string(), best.clone());
                    }
                    session
                        .with_log(|log, ts| log.log(ts, "dom_probe", data))
                        .await;
                }
            }
        }

        _ => {}
    }
}
