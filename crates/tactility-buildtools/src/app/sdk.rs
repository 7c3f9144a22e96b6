use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::app::{AppProject, PLATFORM_TARGETS};
use crate::cdn::sdk::unzip_to;
use crate::error::{Error, Result};
use crate::http::{self, TOOL_VERSION};
use crate::logging::print_warning;
use crate::util;

/// The CDN's `sdk.json`: tool release info plus the published SDK versions.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkJson {
    pub tool_version: Option<String>,
    pub tool_compatibility: Option<String>,
    pub tool_download_url: Option<String>,
    pub versions: Option<BTreeMap<String, SdkVersion>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SdkVersion {
    pub platforms: Vec<String>,
}

pub fn read_sdk_json(path: &Path) -> Result<SdkJson> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| Error::msg(format!("invalid SDK data in {}: {e}", path.display())))
}

/// A missing file is stale; so is one last modified more than `validity` ago.
pub fn is_stale(path: &Path, validity: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return true;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > validity)
}

/// Check the tool release fields against `our_version`. Returns the newer
/// published version when one exists.
pub fn validate_tool(json: &SdkJson, our_version: &str) -> Result<Option<String>> {
    let missing =
        |field: &str| Error::msg(format!("Server returned invalid SDK data format ({field} not found)"));
    let tool_version = json.tool_version.as_deref().ok_or_else(|| missing("toolVersion"))?;
    let compat = json
        .tool_compatibility
        .as_deref()
        .ok_or_else(|| missing("toolCompatibility"))?;
    json.tool_download_url
        .as_deref()
        .ok_or_else(|| missing("toolDownloadUrl"))?;

    let re = Regex::new(compat)
        .map_err(|e| Error::msg(format!("invalid toolCompatibility pattern '{compat}': {e}")))?;
    if !re.is_match(our_version) {
        return Err(Error::msg(
            "The tool is not compatible anymore. Run 'tt app updateself' to update.",
        ));
    }
    Ok((tool_version != our_version).then(|| tool_version.to_string()))
}

pub fn validate_version_and_platforms(
    json: &SdkJson,
    version: &str,
    platforms: &[&str],
) -> Result<()> {
    let versions = json
        .versions
        .as_ref()
        .ok_or_else(|| Error::msg("Version data not found in sdk.json"))?;
    let info = versions
        .get(version)
        .ok_or_else(|| Error::msg(format!("Version not found: {version}")))?;
    for platform in platforms {
        if !info.platforms.iter().any(|p| p == platform) {
            return Err(Error::msg(format!(
                "Platform {platform} is not available. Available ones: {}",
                info.platforms.join(", ")
            )));
        }
    }
    Ok(())
}

pub fn sdk_url(cdn: &str, version: &str, platform: &str) -> String {
    format!(
        "{}/TactilitySDK-{version}-{platform}.zip",
        cdn.trim_end_matches('/')
    )
}

/// Keeps the per-project SDK cache (`.tactility/`) in sync with the CDN.
pub struct SdkCache<'a> {
    pub project: &'a AppProject,
    pub client: &'a Client,
    pub cdn: &'a str,
}

impl SdkCache<'_> {
    fn url(&self, name: &str) -> String {
        format!("{}/{name}", self.cdn.trim_end_matches('/'))
    }

    /// Download any `sdkconfig.app.<platform>` not cached yet.
    pub fn fetch_sdkconfig_files(&self) -> Result<()> {
        for platform in PLATFORM_TARGETS {
            let target = self.project.sdkconfig_cache_path(platform);
            if target.exists() {
                continue;
            }
            let name = format!("sdkconfig.app.{platform}");
            http::download_to(self.client, &self.url(&name), &target).map_err(|e| {
                Error::msg(format!("Failed to download sdkconfig file for {platform}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Refresh `sdk.json` when stale and return its parsed content.
    pub fn sdk_json(&self) -> Result<SdkJson> {
        let path = self.project.sdk_json_path();
        if is_stale(&path, crate::app::SDK_JSON_VALIDITY) {
            http::download_to(self.client, &self.url(crate::app::SDK_JSON), &path)
                .map_err(|e| Error::msg(format!("Failed to retrieve SDK info: {e}")))?;
        } else {
            tracing::debug!("using cached {}", path.display());
        }
        read_sdk_json(&path)
    }

    pub fn ensure_sdks(&self, version: &str, platforms: &[&str]) -> Result<()> {
        for platform in platforms {
            if self.project.sdk_dir(version, platform).is_dir() {
                tracing::debug!("Using cached download for SDK version {version} and platform {platform}");
                continue;
            }
            self.download_sdk(version, platform)?;
        }
        Ok(())
    }

    fn download_sdk(&self, version: &str, platform: &str) -> Result<()> {
        let root = self.project.sdk_root_dir(version, platform);
        util::ensure_dir(&root)?;
        let archive = root.join(format!("{version}-{platform}.zip"));
        println!("Downloading SDK version {version} for {platform}");
        http::download_to(self.client, &sdk_url(self.cdn, version, platform), &archive)
            .map_err(|e| Error::msg(format!("Failed to download SDK for {platform}: {e}")))?;
        unzip_to(&archive, &self.project.sdk_dir(version, platform))
    }
}

/// Replace the running executable with the build published in `sdk.json`.
pub fn update_self(project: &AppProject, client: &Client) -> Result<PathBuf> {
    let json = read_sdk_json(&project.sdk_json_path())?;
    let url = json
        .tool_download_url
        .ok_or_else(|| Error::msg("Server returned invalid SDK data format (toolDownloadUrl not found)"))?;
    let exe = std::env::current_exe()
        .map_err(|e| Error::msg(format!("cannot locate current executable: {e}")))?;

    let res = client
        .get(&url)
        .send()
        .map_err(|e| Error::msg(format!("Update failed: {e}")))?;
    let body = http::check_status(&url, res)?
        .bytes()
        .map_err(|e| Error::msg(format!("Update failed: {e}")))?;
    replace_executable(&exe, &body)?;
    if let Some(version) = json.tool_version.as_deref().filter(|v| *v != TOOL_VERSION) {
        print_warning(&format!("Updated from {TOOL_VERSION} to {version}"));
    }
    Ok(exe)
}

fn replace_executable(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| Error::msg(format!("{} has no parent directory", target.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| Error::msg(format!("failed to create temp file in {}: {e}", parent.display())))?;
    tmp.write_all(data)
        .map_err(|e| Error::msg(format!("failed to write new executable: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o755))
            .map_err(|e| Error::msg(format!("failed to mark executable: {e}")))?;
    }
    tmp.persist(target)
        .map_err(|e| Error::msg(format!("failed to replace {}: {e}", target.display())))?;
    Ok(())
}
