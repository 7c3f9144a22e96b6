//! Device HTTP API: `/info`, `/app/run` and `/app/install`.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, multipart};

use crate::error::{Error, Result};
use crate::http;

#[derive(Debug, Clone)]
pub struct Device {
    base: String,
    client: Client,
}

/// `192.168.1.5` becomes `http://192.168.1.5`; an explicit scheme is kept.
pub fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

impl Device {
    pub fn new(address: &str) -> Result<Self> {
        Ok(Self {
            base: base_url(address),
            client: http::client(Duration::from_secs(60))?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn info(&self) -> Result<serde_json::Value> {
        let url = self.url("/info");
        let res = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::msg(format!("GET {url} failed: {e}")))?;
        let res = http::check_status(&url, res)?;
        res.json()
            .map_err(|e| Error::msg(format!("invalid JSON from {url}: {e}")))
    }

    pub fn run_app(&self, app_id: &str) -> Result<()> {
        let url = Url::parse_with_params(&self.url("/app/run"), &[("id", app_id)])
            .map_err(|e| Error::msg(format!("invalid device address {}: {e}", self.base)))?;
        let res = self
            .client
            .post(url.clone())
            .send()
            .map_err(|e| Error::msg(format!("POST {url} failed: {e}")))?;
        http::check_status(url.as_str(), res)?;
        Ok(())
    }

    pub fn install(&self, elf: &Path) -> Result<()> {
        let url = self.url("/app/install");
        let form = multipart::Form::new()
            .file("elf", elf)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", elf.display())))?;
        let res = self
            .client
            .put(&url)
            .multipart(form)
            .send()
            .map_err(|e| Error::msg(format!("PUT {url} failed: {e}")))?;
        http::check_status(&url, res)?;
        Ok(())
    }
}
