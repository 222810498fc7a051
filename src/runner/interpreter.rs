//! Deterministic application of one agent action against the page.
//!
//! Coordinates arrive on a 0-999 grid; denormalization clamps first and
//! scales by `dim - 1` so 999 reaches the inclusive far edge of the
//! viewport.

use std::time::Duration;

use serde_json::Value;

use crate::agent::AgentAction;
use crate::browser::{navigation::ensure_scheme, MouseButton, PageDriver};
use crate::config::{RunnerConfig, NORMALIZED_RANGE};
use crate::error::RunnerError;
use crate::models::Viewport;

use super::hooks::CursorHint;

const DEFAULT_SCROLL_MAGNITUDE: i64 = 800;
const MAX_SCROLL_MAGNITUDE: i64 = 2000;
const DRAG_STEPS: u32 = 20;

/// Result of a successfully applied action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub summary: String,
    pub cursor: Option<CursorHint>,
}

impl ActionOutcome {
    fn plain(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            cursor: None,
        }
    }
}

/// Normalized grid position -> viewport pixels.
pub fn denormalize_point(x_norm: f64, y_norm: f64, viewport: Viewport) -> (f64, f64) {
    let clamp = |v: f64| v.clamp(0.0, NORMALIZED_RANGE);
    let x = (clamp(x_norm) / NORMALIZED_RANGE * ((viewport.width - 1) as f64)).round();
    let y = (clamp(y_norm) / NORMALIZED_RANGE * ((viewport.height - 1) as f64)).round();
    (x, y)
}

fn cursor_hint(x_norm: f64, y_norm: f64) -> CursorHint {
    let clamp = |v: f64| v.clamp(0.0, NORMALIZED_RANGE);
    CursorHint {
        x: clamp(x_norm) / NORMALIZED_RANGE,
        y: clamp(y_norm) / NORMALIZED_RANGE,
    }
}

/// Direction + magnitude -> wheel deltas. Magnitude defaults to 800 and is
/// clamped to ±2000; unknown directions scroll down.
pub fn scroll_deltas(direction: &str, magnitude: Option<&Value>) -> (i64, i64) {
    let mag = magnitude
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64().map(|f| f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(DEFAULT_SCROLL_MAGNITUDE)
        .clamp(-MAX_SCROLL_MAGNITUDE, MAX_SCROLL_MAGNITUDE);

    match direction.to_ascii_lowercase().as_str() {
        "up" => (0, -mag.abs()),
        "left" => (-mag.abs(), 0),
        "right" => (mag.abs(), 0),
        _ => (0, mag.abs()),
    }
}

fn browser_err(e: anyhow::Error) -> RunnerError {
    RunnerError::Action(e.to_string())
}

/// Apply one validated action. Every failure surfaces as an action error the
/// step loop can recover from.
pub async fn apply_action(
    page: &PageDriver,
    action: &AgentAction,
    config: &RunnerConfig,
) -> Result<ActionOutcome, RunnerError> {
    let viewport = config.viewport;

    match action.name.as_str() {
        "navigate" => {
            let Some(url) = action.arg_str("url") else {
                return Err(RunnerError::action("navigate requires a 'url' argument"));
            };
            let url = ensure_scheme(url);
            page.navigate(&url).await.map_err(browser_err)?;
            Ok(ActionOutcome::plain(format!("navigate -> {url}")))
        }

        "wait_5_seconds" => {
            tokio::time::sleep(Duration::from_millis(5_000)).await;
            Ok(ActionOutcome::plain("wait_5_seconds"))
        }

        "go_back" => {
            let moved = page.go_back().await.map_err(browser_err)?;
            let suffix = if moved { "" } else { " (noop)" };
            Ok(ActionOutcome::plain(format!("go_back{suffix}")))
        }

        "go_forward" => {
            let moved = page.go_forward().await.map_err(browser_err)?;
            let suffix = if moved { "" } else { " (noop)" };
            Ok(ActionOutcome::plain(format!("go_forward{suffix}")))
        }

        "search" => {
            page.navigate(&config.default_search_url)
                .await
                .map_err(browser_err)?;
            Ok(ActionOutcome::plain(format!(
                "search -> {}",
                config.default_search_url
            )))
        }

        "click_at" | "type_text_at" => {
            let (x_norm, y_norm) = (action.arg_f64("x"), action.arg_f64("y"));
            let (x, y) = denormalize_point(x_norm, y_norm, viewport);
            let cursor = cursor_hint(x_norm, y_norm);

            if action.name == "type_text_at" {
                let text = action.arg_str("text").unwrap_or_default().to_string();
                if action.arg_bool("clear_before_typing", true) {
                    // Triple-click selects the field content, Delete clears it.
                    page.mouse_click(x, y, MouseButton::Left, 3)
                        .await
                        .map_err(browser_err)?;
                    page.press_key("Delete").await.map_err(browser_err)?;
                } else {
                    page.mouse_click(x, y, MouseButton::Left, 1)
                        .await
                        .map_err(browser_err)?;
                }
                if !text.is_empty() {
                    page.insert_text(&text).await.map_err(browser_err)?;
                }
                if action.arg_bool("press_enter", false) {
                    page.press_key("Enter").await.map_err(browser_err)?;
                }
            } else {
                page.mouse_click(x, y, MouseButton::Left, 1)
                    .await
                    .map_err(browser_err)?;
            }
            Ok(ActionOutcome {
                summary: format!("{} @{},{}", action.name, x as i64, y as i64),
                cursor: Some(cursor),
            })
        }

        "hover_at" => {
            let (x_norm, y_norm) = (action.arg_f64("x"), action.arg_f64("y"));
            let (x, y) = denormalize_point(x_norm, y_norm, viewport);
            page.mouse_move(x, y).await.map_err(browser_err)?;
            Ok(ActionOutcome {
                summary: "hover_at".to_string(),
                cursor: Some(cursor_hint(x_norm, y_norm)),
            })
        }

        "scroll_document" => {
            let direction = action.arg_str("direction").unwrap_or_default().to_string();
            let (dx, dy) = scroll_deltas(&direction, action.args.get("magnitude"));
            let center_x = (viewport.width / 2) as f64;
            let center_y = (viewport.height / 2) as f64;
            page.mouse_wheel(center_x, center_y, dx as f64, dy as f64)
                .await
                .map_err(browser_err)?;
            let label = if direction.is_empty() { "down" } else { &direction };
            Ok(ActionOutcome::plain(format!("scroll_document {label}")))
        }

        "scroll_at" => {
            let (x_norm, y_norm) = (action.arg_f64("x"), action.arg_f64("y"));
            let direction = action.arg_str("direction").unwrap_or_default().to_string();
            let (dx, dy) = scroll_deltas(&direction, action.args.get("magnitude"));
            let (x, y) = denormalize_point(x_norm, y_norm, viewport);
            page.mouse_move(x, y).await.map_err(browser_err)?;

            // Walk up from the element under the point to the nearest
            // scrollable ancestor on the requested axis; fall back to the
            // document.
            let script = format!(
                r#"
                ((x, y, dx, dy) => {{
                    const point = document.elementFromPoint(x, y);
                    const isScrollable = (el) => {{
                        if (!el) return false;
                        const style = window.getComputedStyle(el);
                        const canScrollY = dy !== 0 && el.scrollHeight > el.clientHeight;
                        const canScrollX = dx !== 0 && el.scrollWidth > el.clientWidth;
                        return (
                            (canScrollY && (style.overflowY === 'auto' || style.overflowY === 'scroll')) ||
                            (canScrollX && (style.overflowX === 'auto' || style.overflowX === 'scroll'))
                        );
                    }};
                    if (!point) {{
                        window.scrollBy({{left: dx, top: dy, behavior: 'auto'}});
                        return false;
                    }}
                    let node = point;
                    while (node && node !== document.body && !isScrollable(node)) {{
                        node = node.parentElement;
                    }}
                    if (!node || node === document.body) {{
                        window.scrollBy({{left: dx, top: dy, behavior: 'auto'}});
                        return false;
                    }}
                    node.scrollBy({{left: dx, top: dy, behavior: 'auto'}});
                    return true;
                }})({x}, {y}, {dx}, {dy})
                "#
            );
            let scrolled_element = page
                .evaluate(&script)
                .await
                .map_err(browser_err)?
                .as_bool()
                .unwrap_or(false);

            let dir_label = if direction.is_empty() { "down" } else { &direction };
            let target = if scrolled_element { "element" } else { "document" };
            Ok(ActionOutcome {
                summary: format!("scroll_at {dir_label} ({target})"),
                cursor: Some(cursor_hint(x_norm, y_norm)),
            })
        }

        "drag_and_drop" => {
            let (x_norm, y_norm) = (action.arg_f64("x"), action.arg_f64("y"));
            let (dest_x_norm, dest_y_norm) = (
                action.arg_f64("destination_x"),
                action.arg_f64("destination_y"),
            );
            let (x, y) = denormalize_point(x_norm, y_norm, viewport);
            let (dest_x, dest_y) = denormalize_point(dest_x_norm, dest_y_norm, viewport);

            page.mouse_move(x, y).await.map_err(browser_err)?;
            page.mouse_down(x, y, MouseButton::Left)
                .await
                .map_err(browser_err)?;
            for step in 1..=DRAG_STEPS {
                let t = step as f64 / DRAG_STEPS as f64;
                let ix = x + (dest_x - x) * t;
                let iy = y + (dest_y - y) * t;
                page.mouse_move(ix, iy).await.map_err(browser_err)?;
            }
            page.mouse_up(dest_x, dest_y, MouseButton::Left)
                .await
                .map_err(browser_err)?;

            Ok(ActionOutcome {
                summary: format!(
                    "drag_and_drop {},{}->{},{}",
                    x as i64, y as i64, dest_x as i64, dest_y as i64
                ),
                cursor: Some(cursor_hint(dest_x_norm, dest_y_norm)),
            })
        }

        "key_combination" => {
            let keys = action.arg_str("keys").unwrap_or_default();
            if keys.is_empty() {
                return Err(RunnerError::action(
                    "key_combination requires a 'keys' string argument",
                ));
            }
            page.press_key(keys).await.map_err(browser_err)?;
            Ok(ActionOutcome::plain(format!("key_combination {keys}")))
        }

        other => Err(RunnerError::action(format!("Unsupported action '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RUNNER_VIEWPORT;
    use serde_json::json;

    #[test]
    fn denormalize_reaches_the_inclusive_edges() {
        let (x, y) = denormalize_point(0.0, 0.0, RUNNER_VIEWPORT);
        assert_eq!((x, y), (0.0, 0.0));
        let (x, y) = denormalize_point(999.0, 999.0, RUNNER_VIEWPORT);
        assert_eq!((x, y), (1439.0, 899.0));
    }

    #[test]
    fn denormalize_clamps_out_of_range_input() {
        let (x, y) = denormalize_point(-50.0, 2000.0, RUNNER_VIEWPORT);
        assert_eq!((x, y), (0.0, 899.0));
    }

    #[test]
    fn denormalize_stays_in_bounds_across_the_grid() {
        for v in [0.0, 1.0, 250.0, 499.5, 500.0, 998.0, 999.0] {
            let (x, y) = denormalize_point(v, v, RUNNER_VIEWPORT);
            assert!((0.0..=1439.0).contains(&x));
            assert!((0.0..=899.0).contains(&y));
        }
    }

    #[test]
    fn scroll_deltas_directions_and_clamping() {
        assert_eq!(scroll_deltas("down", None), (0, 800));
        assert_eq!(scroll_deltas("up", None), (0, -800));
        assert_eq!(scroll_deltas("left", Some(&json!(300))), (-300, 0));
        assert_eq!(scroll_deltas("right", Some(&json!(300))), (300, 0));
        assert_eq!(scroll_deltas("down", Some(&json!(9999))), (0, 2000));
        assert_eq!(scroll_deltas("", Some(&json!("bogus"))), (0, 800));
        assert_eq!(scroll_deltas("sideways", None), (0, 800));
    }
}
