use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, FrameId, GetFrameTreeParams, NavigateToHistoryEntryParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

use crate::models::Viewport;

/// Owns one headless Chromium instance. Each run and each teach session
/// launches its own driver and closes it on the way out; pages are never
/// shared across tasks.
pub struct BrowserDriver {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
}

impl BrowserDriver {
    /// Launch a headless browser sized to the given viewport.
    pub async fn launch(viewport: Viewport) -> Result<Self> {
        let config = BrowserConfig::builder()
            .window_size(viewport.width, viewport.height)
            .arg("--disable-dev-shm-usage")
            .arg("--disable-background-networking")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--lang=en-US")
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = timeout(Duration::from_secs(30), Browser::launch(config))
            .await
            .map_err(|_| anyhow!("Browser launch timeout (30s) - Chromium may not be installed"))?
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                tracing::trace!("Browser event: {:?}", event);
            }
        });

        Ok(Self {
            browser,
            handler_task,
        })
    }

    /// Open a fresh page with an explicit device-metrics override so the
    /// viewport matches regardless of window chrome.
    pub async fn open_page(&self, viewport: Viewport) -> Result<PageDriver> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to create page: {}", e))?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!("Failed to build viewport params: {}", e))?;
        page.execute(metrics)
            .await
            .map_err(|e| anyhow!("Failed to set viewport: {}", e))?;

        Ok(PageDriver { page, viewport })
    }

    /// Close the browser and stop its event pump. Cleanup errors are logged,
    /// never propagated.
    pub async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!("Browser close reported: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// One frame in the page's frame tree.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub id: FrameId,
    pub url: String,
    pub is_main: bool,
}

/// Capability surface over a single page. All interaction the interpreter,
/// teach sessions, and probes need goes through here.
pub struct PageDriver {
    pub(crate) page: Page,
    pub(crate) viewport: Viewport,
}

impl PageDriver {
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Navigate and wait until the DOM is at least interactive (the
    /// dom-content-loaded equivalent).
    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {}", url))?;
        self.wait_for_dom_content_loaded(Duration::from_secs(10)).await;
        Ok(())
    }

    /// Poll `document.readyState` until it leaves "loading".
    pub async fn wait_for_dom_content_loaded(&self, budget: Duration) {
        let deadline = tokio::time::Instant::now() + budget;
        while tokio::time::Instant::now() < deadline {
            let ready_state: String = self
                .page
                .evaluate("document.readyState")
                .await
                .map(|v| v.into_value().unwrap_or_default())
                .unwrap_or_default();
            if ready_state == "interactive" || ready_state == "complete" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Current page URL (empty string when unavailable).
    pub async fn url(&self) -> String {
        self.page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Viewport-only PNG screenshot, base64-encoded.
    pub async fn screenshot_b64(&self) -> Result<String> {
        let bytes = self
            .page
            .screenshot(
                chromiumoxide::page::ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| anyhow!("Failed to take screenshot: {}", e))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Evaluate JavaScript on the main frame and return the JSON value.
    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| anyhow!("Failed to evaluate script: {}", e))?;
        result
            .into_value()
            .map_err(|e| anyhow!("Failed to parse script result: {}", e))
    }

    /// Flattened frame tree, main frame first.
    pub async fn frame_tree(&self) -> Result<Vec<FrameInfo>> {
        let tree = self
            .page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(|e| anyhow!("Failed to get frame tree: {}", e))?;

        let mut frames = Vec::new();
        fn walk(
            node: &chromiumoxide::cdp::browser_protocol::page::FrameTree,
            is_main: bool,
            out: &mut Vec<FrameInfo>,
        ) {
            out.push(FrameInfo {
                id: node.frame.id.clone(),
                url: node.frame.url.clone(),
                is_main,
            });
            if let Some(children) = &node.child_frames {
                for child in children {
                    walk(child, false, out);
                }
            }
        }
        walk(&tree.result.frame_tree, true, &mut frames);
        Ok(frames)
    }

    /// Evaluate an expression inside a specific frame via an isolated world.
    pub async fn evaluate_in_frame(
        &self,
        frame_id: &FrameId,
        expression: &str,
    ) -> Result<serde_json::Value> {
        use chromiumoxide::cdp::browser_protocol::page::CreateIsolatedWorldParams;

        let world = self
            .page
            .execute(
                CreateIsolatedWorldParams::builder()
                    .frame_id(frame_id.clone())
                    .world_name("showrun-probe")
                    .build()
                    .map_err(|e| anyhow!("Failed to build isolated world params: {}", e))?,
            )
            .await
            .map_err(|e| anyhow!("Failed to create isolated world: {}", e))?;

        let eval = self
            .page
            .execute(
                EvaluateParams::builder()
                    .expression(expression)
                    .context_id(world.result.execution_context_id.clone())
                    .return_by_value(true)
                    .build()
                    .map_err(|e| anyhow!("Failed to build evaluate params: {}", e))?,
            )
            .await
            .map_err(|e| anyhow!("Frame evaluation failed: {}", e))?;

        if let Some(exception) = &eval.result.exception_details {
            return Err(anyhow!("Frame evaluation threw: {}", exception.text));
        }
        Ok(eval
            .result
            .result
            .value
            .clone()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Navigate one entry back in history. Returns false when there is no
    /// earlier entry (noop).
    pub async fn go_back(&self) -> Result<bool> {
        self.navigate_history(-1).await
    }

    /// Navigate one entry forward in history. Returns false on noop.
    pub async fn go_forward(&self) -> Result<bool> {
        self.navigate_history(1).await
    }

    async fn navigate_history(&self, delta: i64) -> Result<bool> {
        use chromiumoxide::cdp::browser_protocol::page::GetNavigationHistoryParams;

        let history = self
            .page
            .execute(GetNavigationHistoryParams::default())
            .await
            .map_err(|e| anyhow!("Failed to read navigation history: {}", e))?;

        let target = history.result.current_index + delta;
        let Some(entry) = history
            .result
            .entries
            .get(usize::try_from(target).unwrap_or(usize::MAX))
        else {
            return Ok(false);
        };

        self.page
            .execute(NavigateToHistoryEntryParams::new(entry.id))
            .await
            .map_err(|e| anyhow!("Failed to navigate history: {}", e))?;
        self.wait_for_dom_content_loaded(Duration::from_secs(10)).await;
        Ok(true)
    }

    /// Close the page. Errors are swallowed; callers are in cleanup paths.
    pub async fn close(self) {
        let _ = self.page.close().await;
    }
}
