use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::util;

pub const FLASH_ARGS_FILENAME: &str = "flash_args";

static OFFSET_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(0x[0-9A-Fa-f]+|\d+)\s+(.+?)\s*$").expect("offset line regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashEntry {
    pub offset: u64,
    pub filename: String,
}

/// Parse the text `flash_args` written by ESP-IDF: `--option` lines and
/// anything that is not `<offset> <file>` are skipped. Entries come back
/// sorted by offset; entries sharing an offset keep their file order.
pub fn parse_flash_args(text: &str) -> Result<Vec<FlashEntry>> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("--") {
            tracing::debug!("skipping option line {lineno}: {line}");
            continue;
        }
        let Some(caps) = OFFSET_LINE.captures(line) else {
            tracing::debug!("ignoring unrecognized line {lineno}: {line}");
            continue;
        };
        let offset = util::parse_int_auto(&caps[1]).map_err(|e| {
            Error::msg(format!("could not parse offset on line {lineno}: {e}"))
        })?;
        entries.push(FlashEntry {
            offset,
            filename: caps[2].to_string(),
        });
    }
    entries.sort_by_key(|e| e.offset);
    for e in &entries {
        tracing::debug!("  0x{:X} -> {}", e.offset, e.filename);
    }
    Ok(entries)
}

pub fn flash_args_path(build_dir: &Path) -> PathBuf {
    build_dir.join(FLASH_ARGS_FILENAME)
}

pub fn read_flash_args(build_dir: &Path) -> Result<Vec<FlashEntry>> {
    let path = flash_args_path(build_dir);
    tracing::debug!("reading flash args from {}", path.display());
    let text = fs::read_to_string(&path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    parse_flash_args(&text)
}

/// Board id from a generated sdkconfig, if one is recorded there.
pub fn read_board_id(sdkconfig: &Path) -> Option<String> {
    let text = fs::read_to_string(sdkconfig).ok()?;
    board_id_from_sdkconfig(&text)
}

pub fn board_id_from_sdkconfig(text: &str) -> Option<String> {
    let mut legacy = None;
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim() {
            "CONFIG_TT_DEVICE_ID" => return Some(value.to_string()),
            "CONFIG_TT_BOARD_ID" if legacy.is_none() => legacy = Some(value.to_string()),
            _ => {}
        }
    }
    legacy
}

fn unquote(v: &str) -> &str {
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}
