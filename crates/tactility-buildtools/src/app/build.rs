use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::app::sdk::{SdkCache, validate_tool, validate_version_and_platforms};
use crate::app::{AppProject, DEFAULT_CDN_URL, resolve_platforms};
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::http::{self, TOOL_VERSION};
use crate::logging::{print_failure, print_success, print_warning};
use crate::util;

pub const SDK_PATH_ENV: &str = "TACTILITY_SDK_PATH";
const IDF_PATH_ENV: &str = "IDF_PATH";

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub platform: String,
    pub local_sdk: bool,
    pub skip_build: bool,
    pub cdn_url: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            platform: "all".into(),
            local_sdk: false,
            skip_build: false,
            cdn_url: DEFAULT_CDN_URL.into(),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Checks that do not touch the network. Returns the local SDK path when
/// `--local-sdk` is in effect.
pub fn validate_environment(project: &AppProject, local_sdk: bool) -> Result<Option<PathBuf>> {
    if env_value(IDF_PATH_ENV).is_none() {
        return Err(Error::msg(
            "Cannot find the Espressif IDF SDK. Ensure it is installed and that it is activated via $PATH_TO_IDF_SDK/export.sh",
        ));
    }
    if !project.properties_path().is_file() {
        return Err(Error::msg(format!(
            "{} file not found",
            crate::app::PROPERTIES_FILE
        )));
    }
    match (local_sdk, env_value(SDK_PATH_ENV)) {
        (false, Some(_)) => {
            print_warning(&format!("{SDK_PATH_ENV} is set, but will be ignored by this command."));
            print_warning("If you want to use it, pass --local-sdk.");
            Ok(None)
        }
        (true, None) => Err(Error::msg(format!(
            "local build was requested, but {SDK_PATH_ENV} environment variable is not set."
        ))),
        (true, Some(path)) => Ok(Some(PathBuf::from(path))),
        (false, None) => Ok(None),
    }
}

pub fn run(project: &AppProject, opts: &BuildOptions, ctx: &ExecCtx) -> Result<()> {
    let platforms = resolve_platforms(&opts.platform)?;
    let local_sdk = validate_environment(project, opts.local_sdk)?;
    util::ensure_dir(&project.cache_dir())?;
    let version = project.sdk_version()?;

    if local_sdk.is_none() {
        let client = http::client(Duration::from_secs(120))?;
        let cache = SdkCache {
            project,
            client: &client,
            cdn: &opts.cdn_url,
        };
        cache.fetch_sdkconfig_files()?;
        let json = cache.sdk_json()?;
        if let Some(newer) = validate_tool(&json, TOOL_VERSION)? {
            print_warning(&format!(
                "New version available: {newer} (currently using {TOOL_VERSION})"
            ));
            print_warning("Run 'tt app updateself' to update.");
        }
        validate_version_and_platforms(&json, &version, &platforms)?;
        cache.ensure_sdks(&version, &platforms)?;
    }

    for platform in platforms {
        let sdk_dir = local_sdk
            .clone()
            .unwrap_or_else(|| project.sdk_dir(&version, platform));
        build_platform(project, platform, &sdk_dir, opts.skip_build, ctx)?;
    }
    Ok(())
}

/// `idf.py build` must run once before `idf.py elf` works, so the presence of
/// an app ELF decides which one runs.
fn build_platform(
    project: &AppProject,
    platform: &str,
    sdk_dir: &Path,
    skip_build: bool,
    ctx: &ExecCtx,
) -> Result<()> {
    tracing::debug!("Using SDK at {}", sdk_dir.display());
    let sdkconfig = project.sdkconfig_cache_path(platform);
    if !sdkconfig.is_file() {
        return Err(Error::msg(format!(
            "{} not found; run a build without --local-sdk once to fetch it",
            sdkconfig.display()
        )));
    }
    util::copy_file(&sdkconfig, &project.root.join("sdkconfig"))?;

    let first_build = project.find_elf(platform).is_none();
    if skip_build {
        return Ok(());
    }

    let action = if first_build { "build" } else { "elf" };
    if first_build {
        println!("Building first build");
    }
    let mut cmd = Command::new("idf.py");
    cmd.arg("-B")
        .arg(AppProject::build_dir_name(platform))
        .arg(action)
        .current_dir(&project.root)
        .env(SDK_PATH_ENV, sdk_dir);
    let out = ctx.run_with_spinner(cmd, &format!("Building for {platform}"))?;

    // The first `idf.py build` exits non-zero even when it produced the ELF.
    let ok = out.success() || (first_build && project.find_elf(platform).is_some());
    if ok {
        print_success(&format!("Building for {platform} ✅"));
        return Ok(());
    }
    for line in &out.lines {
        println!("{line}");
    }
    print_failure(&format!("Building for {platform} failed ❌"));
    Err(Error::msg(format!("Building for {platform} failed")))
}
