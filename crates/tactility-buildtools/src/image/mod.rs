//! Single-file flash image: merge the partition binaries listed in an
//! ESP-IDF build's `flash_args` into one flat image.

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::util;

pub mod flash_args;
pub mod merge;

pub use flash_args::{FlashEntry, parse_flash_args, read_board_id, read_flash_args};
pub use merge::{Blob, DEFAULT_FILL, merge_blobs, parse_fill};

pub const DEFAULT_BUILD_CMD: &str = "idf.py build";
pub const DEFAULT_BUILD_DIR: &str = "build";
const UNKNOWN_BOARD: &str = "unknown-board";

pub mod exit_code {
    pub const BUILD_DIR_MISSING: i32 = 2;
    pub const FLASH_ARGS_MISSING: i32 = 3;
    pub const FLASH_ARGS_INVALID: i32 = 4;
    pub const INPUT_MISSING: i32 = 5;
    pub const OUTPUT_EXISTS: i32 = 6;
    pub const INVALID_FILL: i32 = 7;
    pub const MERGE_FAILED: i32 = 8;
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub build_cmd: String,
    pub build_dir: PathBuf,
    pub no_build: bool,
    pub out: Option<PathBuf>,
    pub fill: String,
    pub force: bool,
    pub sdkconfig: PathBuf,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            build_cmd: DEFAULT_BUILD_CMD.into(),
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
            no_build: false,
            out: None,
            fill: format!("0x{DEFAULT_FILL:X}"),
            force: false,
            sdkconfig: PathBuf::from("sdkconfig"),
        }
    }
}

/// Run the whole merge pipeline and return the written image path.
pub fn run(opts: &MergeOptions, ctx: &ExecCtx) -> Result<PathBuf> {
    let build_dir = &opts.build_dir;
    if !build_dir.is_dir() {
        return Err(Error::with_code(
            exit_code::BUILD_DIR_MISSING,
            format!("build directory not found: {}", build_dir.display()),
        ));
    }

    if opts.no_build {
        tracing::debug!("skipping build step (--no-build)");
    } else {
        println!("Running build command: {}", opts.build_cmd);
        let rc = ctx.run_shell(&opts.build_cmd)?;
        if rc != 0 {
            return Err(Error::with_code(
                rc,
                format!("Build command failed with exit code {rc}"),
            ));
        }
    }

    let args_path = flash_args::flash_args_path(build_dir);
    if !args_path.is_file() {
        return Err(Error::with_code(
            exit_code::FLASH_ARGS_MISSING,
            format!("Expected flash args file at: {}", args_path.display()),
        ));
    }
    let entries = read_flash_args(build_dir).map_err(|e| {
        Error::with_code(
            exit_code::FLASH_ARGS_INVALID,
            format!("Error parsing flash args: {e}"),
        )
    })?;

    let mut blobs = Vec::with_capacity(entries.len());
    for entry in &entries {
        let path = util::join_contained(build_dir, &entry.filename)
            .map_err(|e| Error::with_code(exit_code::INPUT_MISSING, e.to_string()))?;
        if !path.exists() {
            return Err(Error::with_code(
                exit_code::INPUT_MISSING,
                format!(
                    "Expected file in build dir but not found: {}",
                    path.display()
                ),
            ));
        }
        tracing::debug!("loading {} at 0x{:X}", path.display(), entry.offset);
        let data = fs::read(&path).map_err(|e| {
            Error::with_code(
                exit_code::INPUT_MISSING,
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        blobs.push(Blob {
            offset: entry.offset,
            data,
        });
    }

    let board_id = read_board_id(&opts.sdkconfig).unwrap_or_else(|| UNKNOWN_BOARD.into());
    let out_path = opts
        .out
        .clone()
        .unwrap_or_else(|| build_dir.join(format!("{board_id}-single_file.bin")));
    if out_path.exists() && !opts.force {
        return Err(Error::with_code(
            exit_code::OUTPUT_EXISTS,
            format!(
                "Output '{}' already exists. Use --force to overwrite.",
                out_path.display()
            ),
        ));
    }

    let fill = parse_fill(&opts.fill).map_err(|e| {
        Error::with_code(exit_code::INVALID_FILL, format!("Invalid --fill value: {e}"))
    })?;

    let size = merge_blobs(&blobs, fill)
        .and_then(|image| util::write_bytes(&out_path, &image).map(|()| image.len()))
        .map_err(|e| {
            Error::with_code(exit_code::MERGE_FAILED, format!("Failed to merge/write: {e}"))
        })?;
    println!(
        "Wrote merged image: {} ({size} bytes)",
        out_path.display()
    );
    Ok(out_path)
}
