//! External app tooling: SDK cache management, `idf.py` builds per platform
//! and the device HTTP API (info/run/install).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::properties::Properties;

pub mod build;
pub mod device;
pub mod sdk;

pub use build::BuildOptions;

/// Hardware targets an app can be built for.
pub const PLATFORM_TARGETS: [&str; 2] = ["esp32", "esp32s3"];
pub const PLATFORM_ALL: &str = "all";
pub const CACHE_DIR: &str = ".tactility";
pub const PROPERTIES_FILE: &str = "tactility.properties";
pub const DEFAULT_CDN_URL: &str = "https://cdn.tactility.one";
pub const SDK_JSON: &str = "sdk.json";
pub const SDK_JSON_VALIDITY: Duration = Duration::from_secs(3600);
const BUILD_DIR_PREFIX: &str = "build-";
const ELF_SUFFIX: &str = ".app.elf";

/// `all` expands to every target; anything else must name one.
pub fn resolve_platforms(arg: &str) -> Result<Vec<&'static str>> {
    if arg == PLATFORM_ALL {
        return Ok(PLATFORM_TARGETS.to_vec());
    }
    PLATFORM_TARGETS
        .iter()
        .find(|p| **p == arg)
        .map(|p| vec![*p])
        .ok_or_else(|| Error::msg("Invalid platform name"))
}

/// An app project directory (the one holding `tactility.properties`).
#[derive(Debug, Clone)]
pub struct AppProject {
    pub root: PathBuf,
}

impl AppProject {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    pub fn properties_path(&self) -> PathBuf {
        self.root.join(PROPERTIES_FILE)
    }

    pub fn sdk_json_path(&self) -> PathBuf {
        self.cache_dir().join(SDK_JSON)
    }

    pub fn sdkconfig_cache_path(&self, platform: &str) -> PathBuf {
        self.cache_dir().join(format!("sdkconfig.app.{platform}"))
    }

    /// Download root for one SDK version/platform pair.
    pub fn sdk_root_dir(&self, version: &str, platform: &str) -> PathBuf {
        self.cache_dir().join(format!("{version}-{platform}"))
    }

    pub fn sdk_dir(&self, version: &str, platform: &str) -> PathBuf {
        self.sdk_root_dir(version, platform).join("TactilitySDK")
    }

    pub fn build_dir_name(platform: &str) -> String {
        format!("{BUILD_DIR_PREFIX}{platform}")
    }

    pub fn build_dir(&self, platform: &str) -> PathBuf {
        self.root.join(Self::build_dir_name(platform))
    }

    /// First `*.app.elf` in the platform's build directory.
    pub fn find_elf(&self, platform: &str) -> Option<PathBuf> {
        let dir = self.build_dir(platform);
        let mut elves: Vec<PathBuf> = fs::read_dir(&dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(ELF_SUFFIX))
            })
            .collect();
        elves.sort();
        elves.into_iter().next()
    }

    pub fn properties(&self) -> Result<Properties> {
        let path = self.properties_path();
        if !path.is_file() {
            return Err(Error::msg(format!("{PROPERTIES_FILE} file not found")));
        }
        Properties::load(&path)
    }

    pub fn sdk_version(&self) -> Result<String> {
        self.properties()?
            .get("sdk", "version")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::msg(format!(
                    "Could not find 'version' in [sdk] section in {PROPERTIES_FILE}"
                ))
            })
    }

    pub fn app_id(&self) -> Result<String> {
        let props = self.properties()?;
        Ok(props.require("app", "id")?.trim().to_string())
    }
}

/// Remove every `build-*` directory; returns how many were removed.
pub fn clean(project: &AppProject) -> Result<usize> {
    let mut names = Vec::new();
    for entry in fs::read_dir(&project.root)
        .map_err(|e| Error::msg(format!("failed to list {}: {e}", project.root.display())))?
    {
        let entry = entry.map_err(|e| Error::msg(format!("read_dir entry error: {e}")))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(BUILD_DIR_PREFIX) && entry.path().is_dir() {
            names.push(name);
        }
    }
    names.sort();
    for name in &names {
        println!("Removing {name}/");
        remove_dir(&project.root.join(name))?;
    }
    if names.is_empty() {
        println!("Nothing to clean");
    }
    Ok(names.len())
}

/// Remove the SDK cache; returns whether there was one.
pub fn clear_cache(project: &AppProject) -> Result<bool> {
    let dir = project.cache_dir();
    if !dir.exists() {
        println!("Nothing to clear");
        return Ok(false);
    }
    println!("Removing {CACHE_DIR}/");
    remove_dir(&dir)?;
    Ok(true)
}

fn remove_dir(p: &Path) -> Result<()> {
    fs::remove_dir_all(p).map_err(|e| Error::msg(format!("failed to remove {}: {e}", p.display())))
}
