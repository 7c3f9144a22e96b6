use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};

use crate::error::{Error, Result};
use crate::util;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn user_agent() -> String {
    format!("Tactility Build Tool {TOOL_VERSION}")
}

pub fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))
}

/// Pass a successful response through; turn anything else into an error
/// carrying the status and the response body.
pub fn check_status(url: &str, res: Response) -> Result<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        return Err(Error::msg(format!("{url} failed with status {status}")));
    }
    Err(Error::msg(format!(
        "{url} failed with status {status}: {body}"
    )))
}

/// Download `url` to `path`; the target is only replaced once the whole body
/// has arrived.
pub fn download_to(client: &Client, url: &str, path: &Path) -> Result<()> {
    tracing::debug!("downloading {url} to {}", path.display());
    let res = client
        .get(url)
        .send()
        .map_err(|e| Error::msg(format!("failed to fetch {url}: {e}")))?;
    let res = check_status(url, res)?;
    let body = res
        .bytes()
        .map_err(|e| Error::msg(format!("failed to read body of {url}: {e}")))?;
    util::atomic_write(path, &body)
}
