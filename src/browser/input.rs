use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton as CdpMouseButton,
};

use super::driver::PageDriver;

/// Mouse button as reported by the teach bridge and the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// DOM `MouseEvent.button` index mapping; anything unknown is left.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => MouseButton::Middle,
            2 => MouseButton::Right,
            _ => MouseButton::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
        }
    }

    fn cdp(&self) -> CdpMouseButton {
        match self {
            MouseButton::Left => CdpMouseButton::Left,
            MouseButton::Middle => CdpMouseButton::Middle,
            MouseButton::Right => CdpMouseButton::Right,
        }
    }
}

/// CDP modifier bitmask: Alt=1, Ctrl=2, Meta=4, Shift=8.
fn modifier_bit(name: &str) -> Option<i64> {
    match name.to_ascii_lowercase().as_str() {
        "alt" => Some(1),
        "ctrl" | "control" => Some(2),
        "meta" | "cmd" | "command" => Some(4),
        "shift" => Some(8),
        _ => None,
    }
}

/// Key name -> (windows virtual key code, DOM code, committed text).
fn key_spec(key: &str) -> Result<(i64, String, String, String)> {
    let spec = match key.to_ascii_lowercase().as_str() {
        "enter" | "return" => (13, "Enter", "\r", "Enter"),
        "tab" => (9, "Tab", "", "Tab"),
        "escape" | "esc" => (27, "Escape", "", "Escape"),
        "backspace" => (8, "Backspace", "", "Backspace"),
        "delete" => (46, "Delete", "", "Delete"),
        "arrowup" | "up" => (38, "ArrowUp", "", "ArrowUp"),
        "arrowdown" | "down" => (40, "ArrowDown", "", "ArrowDown"),
        "arrowleft" | "left" => (37, "ArrowLeft", "", "ArrowLeft"),
        "arrowright" | "right" => (39, "ArrowRight", "", "ArrowRight"),
        "space" => (32, "Space", " ", " "),
        "home" => (36, "Home", "", "Home"),
        "end" => (35, "End", "", "End"),
        "pageup" => (33, "PageUp", "", "PageUp"),
        "pagedown" => (34, "PageDown", "", "PageDown"),
        "shift" => (16, "ShiftLeft", "", "Shift"),
        "control" | "ctrl" => (17, "ControlLeft", "", "Control"),
        "alt" => (18, "AltLeft", "", "Alt"),
        "meta" | "cmd" | "command" => (91, "MetaLeft", "", "Meta"),
        _ => {
            if key.chars().count() == 1 {
                let c = key.chars().next().unwrap();
                let upper = c.to_ascii_uppercase();
                return Ok((
                    upper as i64,
                    format!("Key{}", upper),
                    key.to_string(),
                    key.to_string(),
                ));
            }
            return Err(anyhow!("Unknown key: {}", key));
        }
    };
    Ok((
        spec.0,
        spec.1.to_string(),
        spec.2.to_string(),
        spec.3.to_string(),
    ))
}

/// Split a combo like `Ctrl+Enter` into a modifier bitmask and the final key.
/// A bare key has no modifiers; `Ctrl++` means Ctrl plus the plus key.
pub fn parse_combo(combo: &str) -> Result<(i64, String)> {
    let parts: Vec<&str> = combo.split('+').collect();
    if parts.is_empty() {
        return Err(anyhow!("Empty key combination"));
    }
    let mut modifiers = 0i64;
    let mut key: Option<String> = None;
    for (i, part) in parts.iter().enumerate() {
        let is_last = i == parts.len() - 1;
        if part.is_empty() {
            // Consecutive '+' signs: the key itself is '+'.
            if is_last {
                key = Some("+".to_string());
            }
            continue;
        }
        match modifier_bit(part) {
            Some(bit) if !is_last => modifiers |= bit,
            _ => key = Some(part.to_string()),
        }
    }
    let key = key.ok_or_else(|| anyhow!("Key combination '{}' has no key", combo))?;
    Ok((modifiers, key))
}

impl PageDriver {
    pub async fn mouse_move(&self, x: f64, y: f64) -> Result<()> {
        let event = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(|e| anyhow!("Failed to build mouse move: {}", e))?;
        self.page
            .execute(event)
            .await
            .map_err(|e| anyhow!("Failed to dispatch mouse move: {}", e))?;
        Ok(())
    }

    pub async fn mouse_down(&self, x: f64, y: f64, button: MouseButton) -> Result<()> {
        self.mouse_press_event(DispatchMouseEventType::MousePressed, x, y, button, 1)
            .await
    }

    pub async fn mouse_up(&self, x: f64, y: f64, button: MouseButton) -> Result<()> {
        self.mouse_press_event(DispatchMouseEventType::MouseReleased, x, y, button, 1)
            .await
    }

    /// Full press/release pair. `click_count` of 3 performs a triple-click
    /// (selects the whole field content on most inputs).
    pub async fn mouse_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: i64,
    ) -> Result<()> {
        self.mouse_move(x, y).await?;
        for count in 1..=click_count {
            self.mouse_press_event(DispatchMouseEventType::MousePressed, x, y, button, count)
                .await?;
            self.mouse_press_event(DispatchMouseEventType::MouseReleased, x, y, button, count)
                .await?;
        }
        Ok(())
    }

    async fn mouse_press_event(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: i64,
    ) -> Result<()> {
        let event = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(button.cdp())
            .click_count(click_count)
            .build()
            .map_err(|e| anyhow!("Failed to build mouse event: {}", e))?;
        self.page
            .execute(event)
            .await
            .map_err(|e| anyhow!("Failed to dispatch mouse event: {}", e))?;
        Ok(())
    }

    pub async fn mouse_wheel(&self, x: f64, y: f64, delta_x: f64, delta_y: f64) -> Result<()> {
        let event = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(delta_x)
            .delta_y(delta_y)
            .build()
            .map_err(|e| anyhow!("Failed to build wheel event: {}", e))?;
        self.page
            .execute(event)
            .await
            .map_err(|e| anyhow!("Failed to dispatch wheel event: {}", e))?;
        Ok(())
    }

    /// Commit text into the focused element in one CDP call.
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.page
            .execute(InsertTextParams {
                text: text.to_string(),
            })
            .await
            .map_err(|e| anyhow!("Failed to insert text: {}", e))?;
        Ok(())
    }

    /// Press a key or combo (`Enter`, `Ctrl+Enter`, `Shift+Tab`) as a full
    /// down/up pair with the modifier bitmask applied.
    pub async fn press_key(&self, combo: &str) -> Result<()> {
        let (modifiers, key) = parse_combo(combo)?;
        let (vk, code, text, key_name) = key_spec(&key)?;

        let mut down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(key_name.clone())
            .code(code.clone())
            .windows_virtual_key_code(vk)
            .native_virtual_key_code(vk)
            .modifiers(modifiers);
        if !text.is_empty() && modifiers == 0 {
            down = down.text(text);
        }
        let down = down
            .build()
            .map_err(|e| anyhow!("Failed to build key down: {}", e))?;
        self.page
            .execute(down)
            .await
            .map_err(|e| anyhow!("Failed to dispatch key down: {}", e))?;

        let up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key_name)
            .code(code)
            .windows_virtual_key_code(vk)
            .native_virtual_key_code(vk)
            .modifiers(modifiers)
            .build()
            .map_err(|e| anyhow!("Failed to build key up: {}", e))?;
        self.page
            .execute(up)
            .await
            .map_err(|e| anyhow!("Failed to dispatch key up: {}", e))?;
        Ok(())
    }

    /// Raw key-down passthrough for teach sessions (the operator holds keys).
    pub async fn key_down_raw(&self, key: &str) -> Result<()> {
        let (vk, code, text, key_name) = key_spec(key)?;
        let mut event = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(key_name)
            .code(code)
            .windows_virtual_key_code(vk)
            .native_virtual_key_code(vk);
        if !text.is_empty() {
            event = event.text(text);
        }
        let event = event
            .build()
            .map_err(|e| anyhow!("Failed to build key down: {}", e))?;
        self.page
            .execute(event)
            .await
            .map_err(|e| anyhow!("Failed to dispatch key down: {}", e))?;
        Ok(())
    }

    /// Raw key-up passthrough for teach sessions.
    pub async fn key_up_raw(&self, key: &str) -> Result<()> {
        let (vk, code, _text, key_name) = key_spec(key)?;
        let event = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key_name)
            .code(code)
            .windows_virtual_key_code(vk)
            .native_virtual_key_code(vk)
            .build()
            .map_err(|e| anyhow!("Failed to build key up: {}", e))?;
        self.page
            .execute(event)
            .await
            .map_err(|e| anyhow!("Failed to dispatch key up: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_index_mapping() {
        assert_eq!(MouseButton::from_index(0), MouseButton::Left);
        assert_eq!(MouseButton::from_index(1), MouseButton::Middle);
        assert_eq!(MouseButton::from_index(2), MouseButton::Right);
        assert_eq!(MouseButton::from_index(9), MouseButton::Left);
    }

    #[test]
    fn combo_parsing() {
        assert_eq!(parse_combo("Enter").unwrap(), (0, "Enter".to_string()));
        assert_eq!(parse_combo("Ctrl+Enter").unwrap(), (2, "Enter".to_string()));
        assert_eq!(
            parse_combo("Ctrl+Shift+a").unwrap(),
            (10, "a".to_string())
        );
        // A trailing modifier name is the key itself.
        assert_eq!(parse_combo("Shift").unwrap(), (0, "Shift".to_string()));
        assert!(parse_combo("").is_err());
    }

    #[test]
    fn key_spec_single_chars() {
        let (vk, code, _, _) = key_spec("a").unwrap();
        assert_eq!(vk, 'A' as i64);
        assert_eq!(code, "KeyA");
        assert!(key_spec("NoSuchKey").is_err());
    }
}
