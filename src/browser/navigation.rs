//! Embedded-frame readiness.
//!
//! Many target sites load inside a viewer shell: the host page reaches
//! dom-content-loaded long before the inner app is usable. Before the step
//! loop starts we wait for a child frame matching the start URL's host (or
//! the first non-blank foreign frame) to finish loading.

use std::time::Duration;

use url::Url;

use crate::browser::PageDriver;
use crate::error::RunnerError;

const IGNORED_URL_PREFIXES: [&str; 3] = ["about:", "chrome-error://", "data:"];
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Prefix `https://` onto scheme-less URLs; operators and plans routinely
/// write bare hosts.
pub fn ensure_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Hostname of a URL, lowercased with any `www.` prefix removed, for
/// comparing "the same site" across shell and frame.
pub fn normalize_host(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn is_ignored(url: &str) -> bool {
    url.is_empty() || IGNORED_URL_PREFIXES.iter().any(|p| url.starts_with(p))
}

/// Wait for the embedded page backing `start_url` to become ready.
///
/// Returns immediately when the main frame already hosts the expected domain.
/// Otherwise polls the frame tree for a host-matched child frame (falling
/// back to the first non-blank foreign frame) and waits for its document to
/// reach `complete`. If a candidate frame was seen but never readied within
/// the budget, fails with the embedded-frame timeout error; if no child frame
/// ever appeared, the wait is a no-op.
pub async fn wait_for_embedded_page(
    page: &PageDriver,
    start_url: Option<&str>,
    budget: Duration,
) -> Result<(), RunnerError> {
    if budget.is_zero() {
        return Ok(());
    }

    let expected_host = start_url.and_then(normalize_host);
    let main_url = page.url().await;
    if let (Some(expected), Some(main)) = (&expected_host, normalize_host(&main_url)) {
        if *expected == main {
            // The site is the top-level document; give it a short settle.
            page.wait_for_dom_content_loaded(Duration::from_secs(4)).await;
            return Ok(());
        }
    }

    let deadline = tokio::time::Instant::now() + budget;
    let mut saw_frame = false;

    while tokio::time::Instant::now() < deadline {
        let frames = match page.frame_tree().await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::debug!("Frame tree unavailable: {}", e);
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        let mut target = None;
        let mut fallback = None;
        for frame in frames.iter().filter(|f| !f.is_main) {
            if is_ignored(&frame.url) {
                continue;
            }
            let frame_host = normalize_host(&frame.url);
            if expected_host.is_some() && frame_host == expected_host {
                target = Some(frame);
                break;
            }
            if fallback.is_none() {
                fallback = Some(frame);
            }
        }

        let Some(candidate) = target.or(fallback) else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };

        saw_frame = true;
        match page
            .evaluate_in_frame(&candidate.id, "document.readyState")
            .await
        {
            Ok(state) if state.as_str() == Some("complete") => {
                tracing::info!("Embedded frame ready at {}", candidate.url);
                return Ok(());
            }
            Ok(_) | Err(_) => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    if !saw_frame {
        tracing::info!(
            "No child frame detected for {}; continuing without embedded frame wait",
            main_url
        );
        return Ok(());
    }

    Err(RunnerError::EmbeddedFrameTimeout { expected_host })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_prefixing() {
        assert_eq!(ensure_scheme("example.com"), "https://example.com");
        assert_eq!(ensure_scheme("http://example.com"), "http://example.com");
        assert_eq!(ensure_scheme("https://example.com"), "https://example.com");
    }

    #[test]
    fn normalizes_hosts() {
        assert_eq!(
            normalize_host("https://www.Example.com/path"),
            Some("example.com".to_string())
        );
        assert_eq!(
            normalize_host("http://docs.example.com"),
            Some("docs.example.com".to_string())
        );
        assert_eq!(normalize_host("not a url"), None);
    }

    #[test]
    fn ignored_prefixes() {
        assert!(is_ignored(""));
        assert!(is_ignored("about:blank"));
        assert!(is_ignored("chrome-error://chromewebdata/"));
        assert!(is_ignored("data:text/html,hi"));
        assert!(!is_ignored("https://example.com"));
    }
}
