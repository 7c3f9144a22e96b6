use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
}

/// Delete `p` (if present) and create it again, empty.
pub fn recreate_dir(p: &Path) -> Result<()> {
    if p.exists() {
        fs::remove_dir_all(p)
            .map_err(|e| Error::msg(format!("failed to remove dir {}: {e}", p.display())))?;
    }
    ensure_dir(p)
}

pub fn write_text(p: &Path, s: &str) -> Result<()> {
    write_bytes(p, s.as_bytes())
}

pub fn write_bytes(p: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    fs::write(p, data).map_err(|e| Error::msg(format!("failed to write {}: {e}", p.display())))
}

pub fn write_json_pretty<T: Serialize>(p: &Path, v: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(v)
        .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
    write_text(p, &s)
}

/// Write through a temp file in the destination directory so readers never
/// observe a half-written file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        Error::msg(format!(
            "failed to create temp file in {}: {e}",
            parent.display()
        ))
    })?;
    tmp.write_all(data)
        .map_err(|e| Error::msg(format!("failed to write temp file for {}: {e}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| Error::msg(format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst).map_err(|e| {
        Error::msg(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

/// Parse `0x`-prefixed hex or plain decimal.
pub fn parse_int_auto(raw: &str) -> Result<u64> {
    let s = raw.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| Error::msg(format!("invalid number '{s}': {e}")))
}

/// Hex with an optional `0x` prefix, as esptool writes flash offsets.
pub fn parse_hex(raw: &str) -> Result<u64> {
    let s = raw.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| Error::msg(format!("invalid hex offset '{s}': {e}")))
}

/// Join `rel` under `base`, refusing absolute paths and `..` components.
pub fn join_contained(base: &Path, rel: &str) -> Result<PathBuf> {
    let rel = rel.trim();
    if rel.is_empty() {
        return Err(Error::msg("path is empty"));
    }
    let pb = Path::new(rel);
    if pb.is_absolute()
        || pb
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(Error::msg(format!(
            "path '{}' would resolve outside {}",
            rel,
            base.display()
        )));
    }
    Ok(base.join(pb))
}
