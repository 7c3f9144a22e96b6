use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;

use crate::cdn::INDEX_FILE;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::util;

pub const SDK_DIR_PREFIX: &str = "TactilitySDK-";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SdkIndex {
    pub version: String,
    pub created: String,
    pub git_commit: String,
    pub platforms: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SdkOptions {
    pub in_path: PathBuf,
    pub out_path: PathBuf,
    pub version: String,
    /// Commit to record; `git rev-parse HEAD` when absent.
    pub commit: Option<String>,
}

pub fn run(opts: &SdkOptions, ctx: &ExecCtx) -> Result<SdkIndex> {
    if !opts.in_path.exists() {
        return Err(Error::msg(format!(
            "Input path not found: {}",
            opts.in_path.display()
        )));
    }
    util::recreate_dir(&opts.out_path)?;

    let git_commit = match opts.commit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(c) => c.to_string(),
        None => git_commit_hash(ctx)?,
    };
    let mut index = SdkIndex {
        version: opts.version.clone(),
        created: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        git_commit,
        platforms: BTreeMap::new(),
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(&opts.in_path)
        .map_err(|e| Error::msg(format!("failed to list {}: {e}", opts.in_path.display())))?
    {
        let entry = entry.map_err(|e| Error::msg(format!("read_dir entry error: {e}")))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    for name in names {
        tracing::debug!("processing {}", opts.in_path.join(&name).display());
        if !opts.in_path.join(&name).is_dir() {
            continue;
        }
        let Some(platform) = name.strip_prefix(SDK_DIR_PREFIX) else {
            continue;
        };
        if platform.is_empty() {
            return Err(Error::msg(format!(
                "Cannot derive platform from directory name: {name}"
            )));
        }
        let archive_name = format!("{name}.zip");
        let archive = opts.out_path.join(&archive_name);
        tracing::debug!(
            "archiving {} to {}",
            opts.in_path.join(&name).display(),
            archive.display()
        );
        zip_dir(&opts.in_path.join(&name), &archive)?;
        index.platforms.insert(platform.to_string(), archive_name);
    }

    let index_path = opts.out_path.join(INDEX_FILE);
    tracing::debug!("generating {}", index_path.display());
    util::write_json_pretty(&index_path, &index)?;
    Ok(index)
}

fn git_commit_hash(ctx: &ExecCtx) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.arg("rev-parse").arg("HEAD");
    let out = ctx
        .run_capture(cmd)
        .map_err(|e| Error::msg(format!("failed to determine git commit: {e}")))?;
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Zip the contents of `src` (not `src` itself) into `dst`.
pub fn zip_dir(src: &Path, dst: &Path) -> Result<()> {
    let file = File::create(dst)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", dst.display())))?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let dir_options = SimpleFileOptions::default().unix_permissions(0o755);

    for entry in walkdir::WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::msg(format!("walkdir error: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
        // Zip entry names always use '/'.
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, dir_options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut f = File::open(entry.path()).map_err(|e| {
                Error::msg(format!("failed to open {}: {e}", entry.path().display()))
            })?;
            io::copy(&mut f, &mut zip)?;
        }
    }
    zip.finish()?;
    Ok(())
}

/// Extract `archive` into `dst`, creating it when needed.
pub fn unzip_to(archive: &Path, dst: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", archive.display())))?;
    let mut zip = zip::ZipArchive::new(file)?;
    util::ensure_dir(dst)?;
    zip.extract(dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_round_trip_keeps_relative_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("TactilitySDK-esp32");
        fs::create_dir_all(src.join("Libraries/lvgl")).unwrap();
        fs::write(src.join("version.txt"), "1.0.0").unwrap();
        fs::write(src.join("Libraries/lvgl/lv.h"), "#pragma once").unwrap();

        let archive = tmp.path().join("sdk.zip");
        zip_dir(&src, &archive).unwrap();
        let out = tmp.path().join("out");
        unzip_to(&archive, &out).unwrap();

        assert_eq!(fs::read_to_string(out.join("version.txt")).unwrap(), "1.0.0");
        assert_eq!(
            fs::read_to_string(out.join("Libraries/lvgl/lv.h")).unwrap(),
            "#pragma once"
        );
        assert!(!out.join("TactilitySDK-esp32").exists());
    }
}
