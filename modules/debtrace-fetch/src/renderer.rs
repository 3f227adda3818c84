//! Headless-browser rendering for the handful of sources whose pages
//! are assembled by JavaScript.
//!
//! Each render spawns a fresh Chromium process and reads its dumped
//! DOM; the process exits on every path, so a crashed or hung page
//! cannot leak a browser instance into the worker.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, Result};

/// Renders a page to its post-JavaScript HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;
}

pub struct ChromeRenderer {
    chrome_bin: String,
}

impl ChromeRenderer {
    pub fn new(chrome_bin: impl Into<String>) -> Self {
        Self {
            chrome_bin: chrome_bin.into(),
        }
    }

    /// Uses `CHROME_BIN` when set, otherwise the `chromium` on PATH.
    pub fn from_env() -> Self {
        Self::new(std::env::var("CHROME_BIN").unwrap_or_else(|_| "chromium".to_string()))
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        debug!(url, renderer = "chrome", "Rendering URL");

        let output = tokio::process::Command::new(&self.chrome_bin)
            .args([
                "--headless",
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--dump-dom",
                url,
            ])
            .output()
            .await
            .map_err(|e| FetchError::Render {
                url: url.to_string(),
                reason: format!("failed to run {}: {e}", self.chrome_bin),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url, renderer = "chrome", stderr = %stderr, "Chrome exited with error");
            return Err(FetchError::Render {
                url: url.to_string(),
                reason: format!("chrome exited with {}", output.status),
            });
        }

        let html = String::from_utf8_lossy(&output.stdout).to_string();
        if html.trim().is_empty() {
            return Err(FetchError::Render {
                url: url.to_string(),
                reason: "empty DOM output".to_string(),
            });
        }
        debug!(url, renderer = "chrome", bytes = html.len(), "Rendered");
        Ok(html)
    }
}
