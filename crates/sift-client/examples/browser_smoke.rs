/// Smoke-test for `ChromeBrowser` and `DomPruner`.
///
/// Launches a headless Chromium, navigates to <https://example.com>, reads the
/// sanitized body and prunes it.
///
/// Run with:
///   cargo run -p sift-client --example browser_smoke
use sift_client::{ChromeBrowser, DomPruner};
use sift_core::traits::{BrowserProvider, BrowserSession, Cleaner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let browser = ChromeBrowser::launch().await?;
    let session = browser.acquire().await?;

    let url = "https://example.com";
    let nav = session.navigate(url).await?;
    println!("Status {:?}, final URL {}", nav.status, nav.final_url(url));

    let body = session.sanitized_body().await?;
    session.close().await;

    let body = body.ok_or_else(|| anyhow::anyhow!("page has no body"))?;
    let cleaned = DomPruner::new().clean(&body)?;

    assert!(
        cleaned.contains("Example Domain"),
        "Expected heading not found in cleaned markup"
    );
    println!("OK: {} bytes after pruning", cleaned.len());
    println!("{cleaned}");

    Ok(())
}
