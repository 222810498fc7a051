use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::browser::{BrowserDriver, MouseButton, PageDriver};
use crate::config::TeachConfig;
use crate::models::{RecordingFrame, TeachEvent};

/// Movement beyond this promotes a down/up pair to a drag.
const DRAG_DISTANCE_PX: f64 = 6.0;
/// Holding the button this long promotes to a drag even without movement.
const DRAG_DURATION_SECS: f64 = 0.75;

#[derive(Debug)]
struct PressedKey {
    ts: f64,
    code: Option<String>,
    mods: Vec<String>,
    extra: Map<String, Value>,
}

#[derive(Debug)]
struct MouseDownState {
    x: f64,
    y: f64,
    button: MouseButton,
    ts: f64,
    max_distance: f64,
    extra: Map<String, Value>,
}

/// Pure capture state of a teach session: the event log, pressed-key and
/// mouse-down tracking, and the bounded frame FIFO. Timestamps are seconds
/// since teach start and are passed in explicitly so the logic stays
/// clock-free and testable.
#[derive(Debug)]
pub struct SessionLog {
    events: Vec<TeachEvent>,
    pressed_keys: HashMap<String, PressedKey>,
    mouse_down: Option<MouseDownState>,
    frames: VecDeque<RecordingFrame>,
    last_frame_ts: f64,
    frame_interval: f64,
    max_frames: usize,
}

impl SessionLog {
    pub fn new(config: &TeachConfig) -> Self {
        Self {
            events: Vec::new(),
            pressed_keys: HashMap::new(),
            mouse_down: None,
            frames: VecDeque::new(),
            last_frame_ts: 0.0,
            frame_interval: config.frame_interval.as_secs_f64(),
            max_frames: config.max_frames,
        }
    }

    pub fn events(&self) -> &[TeachEvent] {
        &self.events
    }

    pub fn frames(&self) -> &VecDeque<RecordingFrame> {
        &self.frames
    }

    pub fn take_parts(self) -> (Vec<RecordingFrame>, Vec<TeachEvent>) {
        (self.frames.into_iter().collect(), self.events)
    }

    /// Append a raw event.
    pub fn log(&mut self, ts: f64, kind: &str, data: Map<String, Value>) {
        self.events.push(TeachEvent::new(ts, kind, data));
    }

    /// Store a frame if forced, the buffer is empty, or the minimum interval
    /// since the last stored frame has elapsed. The buffer drops its oldest
    /// frame once the cap is reached.
    pub fn push_frame(&mut self, ts: f64, png: String, force: bool) -> bool {
        let should_store =
            force || self.frames.is_empty() || (ts - self.last_frame_ts) >= self.frame_interval;
        if !should_store {
            return false;
        }
        self.frames.push_back(RecordingFrame { timestamp: ts, png });
        self.last_frame_ts = ts;
        while self.frames.len() > self.max_frames {
            self.frames.pop_front();
        }
        true
    }

    /// Track pointer movement; only meaningful while a button is down.
    pub fn record_mouse_move(&mut self, ts: f64, x: f64, y: f64) {
        let _ = ts;
        if let Some(down) = &mut self.mouse_down {
            let distance = ((x - down.x).powi(2) + (y - down.y).powi(2)).sqrt();
            if distance > down.max_distance {
                down.max_distance = distance;
            }
        }
    }

    /// Remember the press; the click/drag decision happens on release.
    pub fn record_mouse_down(
        &mut self,
        ts: f64,
        x: f64,
        y: f64,
        button: MouseButton,
        extra: Map<String, Value>,
    ) {
        self.mouse_down = Some(MouseDownState {
            x,
            y,
            button,
            ts,
            max_distance: 0.0,
            extra,
        });
    }

    /// Emit exactly one `drag` or `click` event for the down/up pair.
    pub fn record_mouse_up(
        &mut self,
        ts: f64,
        x: f64,
        y: f64,
        button: MouseButton,
        up_extra: Map<String, Value>,
    ) {
        let Some(down) = self.mouse_down.take() else {
            return;
        };
        let distance = ((x - down.x).powi(2) + (y - down.y).powi(2))
            .sqrt()
            .max(down.max_distance);
        let duration = (ts - down.ts).max(0.0);

        if distance > DRAG_DISTANCE_PX || duration > DRAG_DURATION_SECS {
            let mut data = Map::new();
            data.insert("start".to_string(), json!([down.x, down.y]));
            data.insert("end".to_string(), json!([x, y]));
            data.insert("duration".to_string(), json!(duration));
            data.insert("button".to_string(), json!(button.as_str()));
            if let Some(element) = up_extra.get("element") {
                data.insert("endElement".to_string(), element.clone());
            }
            self.log(ts, "drag", data);
        } else {
            let mut data = Map::new();
            data.insert("x".to_string(), json!(x));
            data.insert("y".to_string(), json!(y));
            data.insert("button".to_string(), json!(button.as_str()));
            for (key, value) in down.extra {
                data.insert(key, value);
            }
            self.log(ts, "click", data);
        }
    }

    pub fn record_scroll(&mut self, ts: f64, delta_x: i64, delta_y: i64) {
        let mut data = Map::new();
        data.insert("deltaX".to_string(), json!(delta_x));
        data.insert("deltaY".to_string(), json!(delta_y));
        self.log(ts, "scroll", data);
    }

    /// First press emits `keydown` and starts hold tracking; repeats while
    /// held emit `keydown_repeat`.
    pub fn record_key_down(
        &mut self,
        ts: f64,
        key: &str,
        code: Option<String>,
        mods: Vec<String>,
        extra: Map<String, Value>,
    ) {
        if key.is_empty() {
            return;
        }
        let mut payload = Map::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("code".to_string(), json!(code));
        payload.insert("mods".to_string(), json!(mods));
        for (k, v) in &extra {
            payload.insert(k.clone(), v.clone());
        }

        if self.pressed_keys.contains_key(key) {
            self.log(ts, "keydown_repeat", payload);
        } else {
            self.pressed_keys.insert(
                key.to_string(),
                PressedKey {
                    ts,
                    code,
                    mods,
                    extra,
                },
            );
            self.log(ts, "keydown", payload);
        }
    }

    /// Emits `keyup`, then a `key_hold` with the measured duration when the
    /// matching press is known.
    pub fn record_key_up(&mut self, ts: f64, key: &str, extra: Map<String, Value>) {
        if key.is_empty() {
            return;
        }
        let pressed = self.pressed_keys.remove(key);

        let mut payload = Map::new();
        payload.insert("key".to_string(), json!(key));
        for (k, v) in extra {
            payload.insert(k, v);
        }
        self.log(ts, "keyup", payload);

        if let Some(pressed) = pressed {
            let mut hold = Map::new();
            hold.insert("key".to_string(), json!(key));
            hold.insert("code".to_string(), json!(pressed.code));
            hold.insert("mods".to_string(), json!(pressed.mods));
            hold.insert("duration".to_string(), json!((ts - pressed.ts).max(0.0)));
            for (k, v) in pressed.extra {
                hold.insert(k, v);
            }
            self.log(ts, "key_hold", hold);
        }
    }
}

/// A live teach session: the browser/page pair the operator drives through
/// the WS bridge, plus the capture log.
pub struct TeachSession {
    pub teach_id: String,
    pub recording_id: String,
    started: Instant,
    running: AtomicBool,
    driver: Mutex<Option<BrowserDriver>>,
    page: Arc<PageDriver>,
    log: Mutex<SessionLog>,
}

impl TeachSession {
    pub fn new(
        teach_id: String,
        recording_id: String,
        driver: BrowserDriver,
        page: PageDriver,
        config: &TeachConfig,
    ) -> Self {
        Self {
            teach_id,
            recording_id,
            started: Instant::now(),
            running: AtomicBool::new(true),
            driver: Mutex::new(Some(driver)),
            page: Arc::new(page),
            log: Mutex::new(SessionLog::new(config)),
        }
    }

    pub fn page(&self) -> Arc<PageDriver> {
        Arc::clone(&self.page)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Seconds since the session started.
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub async fn with_log<R>(&self, f: impl FnOnce(&mut SessionLog, f64) -> R) -> R {
        let ts = self.elapsed();
        let mut log = self.log.lock().await;
        f(&mut log, ts)
    }

    /// Capture a screenshot, store it in the frame buffer subject to the
    /// sampling rules, and return the encoded frame for streaming.
    pub async fn capture_frame(&self, force: bool) -> Result<String> {
        let png = self.page.screenshot_b64().await?;
        let ts = self.elapsed();
        let mut log = self.log.lock().await;
        log.push_frame(ts, png.clone(), force);
        Ok(png)
    }

    /// Tail of the event log, serialized for the WS `event_log` message.
    pub async fn recent_events(&self, limit: usize) -> Vec<Value> {
        let log = self.log.lock().await;
        let events = log.events();
        let start = events.len().saturating_sub(limit);
        events[start..]
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect()
    }

    /// Tear down the browser and hand back the captured parts. Cleanup
    /// failures are logged and swallowed.
    pub async fn finish(&self) -> (Vec<RecordingFrame>, Vec<TeachEvent>) {
        self.mark_stopped();
        if let Err(e) = self.capture_frame(true).await {
            tracing::debug!("Final teach frame capture failed: {}", e);
        }
        if let Some(mut driver) = self.driver.lock().await.take() {
            driver.close().await;
        }
        let mut log = self.log.lock().await;
        let drained = std::mem::replace(&mut *log, SessionLog::new(&TeachConfig::default()));
        drained.take_parts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log() -> SessionLog {
        SessionLog::new(&TeachConfig::default())
    }

    #[test]
    fn quick_release_is_a_click() {
        let mut log = test_log();
        let mut extra = Map::new();
        extra.insert("selector".to_string(), json!("#submit"));
        log.record_mouse_down(1.0, 100.0, 100.0, MouseButton::Left, extra);
        log.record_mouse_up(1.1, 102.0, 101.0, MouseButton::Left, Map::new());

        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "click");
        assert_eq!(events[0].data.get("selector"), Some(&json!("#submit")));
        assert_eq!(events[0].data.get("button"), Some(&json!("left")));
    }

    #[test]
    fn long_movement_is_a_drag() {
        let mut log = test_log();
        log.record_mouse_down(1.0, 100.0, 100.0, MouseButton::Left, Map::new());
        log.record_mouse_move(1.05, 140.0, 140.0);
        log.record_mouse_move(1.1, 400.0, 400.0);
        let mut up_extra = Map::new();
        up_extra.insert("element".to_string(), json!({"tag": "div"}));
        log.record_mouse_up(1.2, 400.0, 400.0, MouseButton::Left, up_extra);

        let events = log.events();
        assert_eq!(events.len(), 1, "one drag, no click for the pair");
        assert_eq!(events[0].kind, "drag");
        assert_eq!(events[0].data.get("start"), Some(&json!([100.0, 100.0])));
        assert_eq!(events[0].data.get("end"), Some(&json!([400.0, 400.0])));
        assert_eq!(events[0].data.get("button"), Some(&json!("left")));
        assert!(events[0].data.contains_key("endElement"));
    }

    #[test]
    fn slow_hold_is_a_drag_even_in_place() {
        let mut log = test_log();
        log.record_mouse_down(1.0, 50.0, 50.0, MouseButton::Left, Map::new());
        log.record_mouse_up(2.5, 51.0, 50.0, MouseButton::Left, Map::new());
        assert_eq!(log.events()[0].kind, "drag");
    }

    #[test]
    fn key_hold_tracks_duration_and_repeats() {
        let mut log = test_log();
        log.record_key_down(0.5, "a", Some("KeyA".into()), vec![], Map::new());
        log.record_key_down(0.6, "a", Some("KeyA".into()), vec![], Map::new());
        log.record_key_up(1.5, "a", Map::new());

        let kinds: Vec<&str> = log.events().iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["keydown", "keydown_repeat", "keyup", "key_hold"]);
        let hold = &log.events()[3];
        let duration = hold.data.get("duration").and_then(|v| v.as_f64()).unwrap();
        assert!((duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn frame_buffer_respects_interval_and_cap() {
        let config = TeachConfig {
            frame_interval: std::time::Duration::from_secs(1),
            max_frames: 3,
        };
        let mut log = SessionLog::new(&config);
        assert!(log.push_frame(0.0, "f0".into(), false)); // buffer empty
        assert!(!log.push_frame(0.5, "f1".into(), false)); // too soon
        assert!(log.push_frame(0.7, "f2".into(), true)); // forced
        assert!(log.push_frame(2.0, "f3".into(), false));
        assert!(log.push_frame(3.1, "f4".into(), false));
        // Cap of 3: oldest frames were dropped.
        assert_eq!(log.frames().len(), 3);
        assert_eq!(log.frames().front().unwrap().png, "f2");
    }
}
