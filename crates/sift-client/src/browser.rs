use std::path::PathBuf;
use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::Response;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use sift_core::error::AppError;
use sift_core::traits::{BrowserProvider, BrowserSession, NavigationResult};

use crate::sanitize::{DOCUMENT_SCRIPT, SANITIZE_SCRIPT, normalize_markup};

/// Headless Chromium driven over the Chrome DevTools Protocol.
///
/// One Chromium process is shared by all clones; every
/// [`BrowserProvider::acquire`] opens a fresh tab that lives as long as the
/// returned [`ChromeSession`].
///
/// # Example
///
/// ```rust,no_run
/// use sift_client::ChromeBrowser;
/// use sift_core::traits::{BrowserProvider, BrowserSession};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let browser = ChromeBrowser::launch().await?;
/// let session = browser.acquire().await?;
/// let nav = session.navigate("https://example.com").await?;
/// println!("{:?}", nav.status);
/// session.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChromeBrowser {
    browser: Arc<Browser>,
}

impl ChromeBrowser {
    /// Launch a local headless Chromium.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, the
    /// `CHROME_BIN` variable, or one of the well-known install locations.
    pub async fn launch() -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium rejects standard Chrome CLI flags, so prefer
        // the real binary inside the snap when present.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;
        Ok(Self::with_handler(browser, handler))
    }

    /// Attach to an already running browser through its DevTools websocket.
    pub async fn connect(ws_url: &str) -> Result<Self, AppError> {
        let (browser, handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to connect to {ws_url}: {e}")))?;
        Ok(Self::with_handler(browser, handler))
    }

    fn with_handler(browser: Browser, mut handler: chromiumoxide::Handler) -> Self {
        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Self {
            browser: Arc::new(browser),
        }
    }
}

/// Locate a usable Chrome/Chromium binary, or `None` to let chromiumoxide look.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl BrowserProvider for ChromeBrowser {
    type Session = ChromeSession;

    async fn acquire(&self) -> Result<ChromeSession, AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open tab: {e}")))?;
        Ok(ChromeSession { page: Some(page) })
    }
}

/// One browser tab. Closed explicitly by [`BrowserSession::close`], or in the
/// background when dropped (e.g. its task was aborted by a timeout).
pub struct ChromeSession {
    page: Option<Page>,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, AppError> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::BrowserError("session already closed".into()))
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::debug!("Dropped tab failed to close: {e}");
                    }
                });
            }
        }
    }
}

impl BrowserSession for ChromeSession {
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), AppError> {
        self.page()?
            .set_user_agent(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to set user agent: {e}")))?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<NavigationResult, AppError> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to navigate to {url}: {e}")))?;

        let request = page
            .wait_for_navigation_response()
            .await
            .map_err(|e| AppError::NetworkError(format!("No navigation response for {url}: {e}")))?;

        let Some(request) = request else {
            return Ok(NavigationResult {
                url: url.to_string(),
                ..NavigationResult::default()
            });
        };

        Ok(match &request.response {
            Some(response) => NavigationResult {
                status: u16::try_from(response.status).ok(),
                url: response.url.clone(),
                location: header(response, "location"),
            },
            None => NavigationResult {
                status: None,
                url: request.url.clone().unwrap_or_else(|| url.to_string()),
                location: None,
            },
        })
    }

    async fn sanitized_body(&self) -> Result<Option<String>, AppError> {
        let raw: Option<String> = self
            .page()?
            .evaluate_function(SANITIZE_SCRIPT)
            .await
            .map_err(|e| AppError::BrowserError(format!("Sanitize script failed: {e}")))?
            .into_value()
            .map_err(|e| AppError::BrowserError(format!("Unexpected sanitize result: {e}")))?;
        Ok(raw.map(|body| normalize_markup(&body)))
    }

    async fn document_html(&self) -> Result<Option<String>, AppError> {
        self.page()?
            .evaluate_function(DOCUMENT_SCRIPT)
            .await
            .map_err(|e| AppError::BrowserError(format!("Document capture failed: {e}")))?
            .into_value()
            .map_err(|e| AppError::BrowserError(format!("Unexpected document result: {e}")))
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!("Tab failed to close: {e}");
            }
        }
    }
}

/// Case-insensitive response header lookup.
fn header(response: &Response, name: &str) -> Option<String> {
    let headers = serde_json::to_value(&response.headers).ok()?;
    headers
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str())
        .map(String::from)
}
