use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cdn::INDEX_FILE;
use crate::error::{Error, Result};
use crate::properties::{Properties, Section};
use crate::util;

pub const DEFAULT_MAPPING_PATH: &str = "Buildscripts/CDN/devices.properties";
const RELEASE_DIR_PREFIX: &str = "Tactility-";
const SYMBOLS_SUFFIX: &str = "-symbols";
const FUNDING_URL: &str = "https://github.com/sponsors/ByteWelder";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub new_install_prompt_erase: String,
    pub funding_url: String,
    pub builds: Vec<ManifestBuild>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestBuild {
    pub chip_family: String,
    pub parts: Vec<ManifestBuildPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestBuildPart {
    pub path: String,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub incubating: bool,
    pub warning_message: Option<String>,
    pub info_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIndex {
    pub version: String,
    pub devices: Vec<IndexEntry>,
}

/// The subset of ESP-IDF's `flasher_args.json` needed for a web flasher manifest.
#[derive(Debug, Clone, Deserialize)]
struct FlasherArgs {
    flash_files: BTreeMap<String, String>,
    extra_esptool_args: ExtraEsptoolArgs,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtraEsptoolArgs {
    chip: String,
}

#[derive(Debug, Clone)]
pub struct FirmwareOptions {
    pub in_path: PathBuf,
    pub out_path: PathBuf,
    pub version: String,
    pub mapping: PathBuf,
}

pub fn manifest_chip_name(chip: &str) -> Result<&'static str> {
    Ok(match chip {
        "esp32" => "ESP32",
        "esp32s2" => "ESP32-S2",
        "esp32s3" => "ESP32-S3",
        "esp32c3" => "ESP32-C3",
        "esp32c5" => "ESP32-C5",
        "esp32c6" => "ESP32-C6",
        "esp32p4" => "ESP32-P4",
        other => {
            return Err(Error::msg(format!(
                "no manifest chip family known for '{other}'"
            )));
        }
    })
}

pub fn run(opts: &FirmwareOptions) -> Result<DeviceIndex> {
    if !opts.in_path.exists() {
        return Err(Error::msg(format!(
            "Input path not found: {}",
            opts.in_path.display()
        )));
    }
    if !opts.mapping.is_file() {
        return Err(Error::msg(format!(
            "Mapping file not found: {}",
            opts.mapping.display()
        )));
    }
    let mapping = Properties::load(&opts.mapping)?;
    util::recreate_dir(&opts.out_path)?;

    let mut index = DeviceIndex {
        version: opts.version.clone(),
        devices: Vec::new(),
    };
    for dir_name in sorted_entry_names(&opts.in_path)? {
        if dir_name.ends_with(SYMBOLS_SUFFIX) {
            tracing::debug!("skipping symbols directory {dir_name}");
            continue;
        }
        let Some(device_id) = dir_name.strip_prefix(RELEASE_DIR_PREFIX) else {
            return Err(Error::msg(format!(
                "release directory '{dir_name}' does not start with '{RELEASE_DIR_PREFIX}'"
            )));
        };
        let Some(device) = mapping.section(device_id) else {
            return Err(Error::msg(format!(
                "Mapping for {device_id} not found in mapping file"
            )));
        };

        let manifest = process_device(
            &opts.in_path.join(&dir_name),
            &opts.out_path,
            device_id,
            device,
            &opts.version,
        )?;
        util::write_json_pretty(&opts.out_path.join(format!("{device_id}.json")), &manifest)?;
        index.devices.extend(index_entries(device_id, device)?);
    }

    util::write_json_pretty(&opts.out_path.join(INDEX_FILE), &index)?;
    tracing::info!(
        "generated {} device entries in {}",
        index.devices.len(),
        opts.out_path.display()
    );
    Ok(index)
}

fn sorted_entry_names(dir: &Path) -> Result<Vec<String>> {
    let rd = fs::read_dir(dir)
        .map_err(|e| Error::msg(format!("failed to list {}: {e}", dir.display())))?;
    let mut names = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| Error::msg(format!("read_dir entry error: {e}")))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn mapping_value<'a>(device: &'a Section, key: &str) -> Result<&'a str> {
    device.get(key).ok_or_else(|| {
        Error::msg(format!(
            "Mapping for {} does not contain key: {key}",
            device.name
        ))
    })
}

fn process_device(
    device_dir: &Path,
    out_path: &Path,
    device_id: &str,
    device: &Section,
    version: &str,
) -> Result<Manifest> {
    let binaries = device_dir.join("Binaries");
    if !binaries.is_dir() {
        return Err(Error::msg(format!(
            "Binaries directory not found: {}",
            binaries.display()
        )));
    }
    let args_path = binaries.join("flasher_args.json");
    let raw = fs::read_to_string(&args_path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", args_path.display())))?;
    let args: FlasherArgs = serde_json::from_str(&raw)
        .map_err(|e| Error::msg(format!("invalid {}: {e}", args_path.display())))?;

    let vendor = mapping_value(device, "vendor")?;
    let board_name = mapping_value(device, "boardName")?;
    let mut build = ManifestBuild {
        chip_family: manifest_chip_name(&args.extra_esptool_args.chip)?.to_string(),
        parts: Vec::with_capacity(args.flash_files.len()),
    };

    for (offset_raw, rel) in &args.flash_files {
        let offset = util::parse_hex(offset_raw)
            .map_err(|e| Error::msg(format!("{}: {e}", args_path.display())))?;
        let src = util::join_contained(&binaries, rel)?;
        let basename = Path::new(rel)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::msg(format!("flash file '{rel}' has no file name")))?;
        let out_name = format!("{device_id}-{basename}");
        let dst = out_path.join(&out_name);
        tracing::debug!("copying {} -> {}", src.display(), dst.display());
        util::copy_file(&src, &dst)?;
        build.parts.push(ManifestBuildPart {
            path: out_name,
            offset,
        });
    }
    build.parts.sort_by_key(|p| p.offset);

    Ok(Manifest {
        name: format!("Tactility for {vendor} {board_name}"),
        version: version.to_string(),
        new_install_prompt_erase: "true".into(),
        funding_url: FUNDING_URL.into(),
        builds: vec![build],
    })
}

/// One index entry per comma-separated board name of a mapping section.
fn index_entries(device_id: &str, device: &Section) -> Result<Vec<IndexEntry>> {
    let vendor = mapping_value(device, "vendor")?;
    let incubating = device
        .get("incubating")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let warning_message = device.get("warningMessage").map(ToOwned::to_owned);
    let info_message = device.get("infoMessage").map(ToOwned::to_owned);

    Ok(mapping_value(device, "boardName")?
        .split(',')
        .map(|name| IndexEntry {
            id: device_id.to_string(),
            name: name.to_string(),
            vendor: vendor.to_string(),
            incubating,
            warning_message: warning_message.clone(),
            info_message: info_message.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_names_follow_web_flasher_families() {
        assert_eq!(manifest_chip_name("esp32").unwrap(), "ESP32");
        assert_eq!(manifest_chip_name("esp32s3").unwrap(), "ESP32-S3");
        assert_eq!(manifest_chip_name("esp32p4").unwrap(), "ESP32-P4");
        assert!(manifest_chip_name("esp8266").is_err());
    }

    #[test]
    fn board_names_split_into_entries() {
        let props = Properties::parse(
            Path::new("devices.properties"),
            "[cyd-2432s028r]\nvendor=CYD\nboardName=2432S028R,2432S028R v3\nincubating=True\n",
        )
        .unwrap();
        let section = props.section("cyd-2432s028r").unwrap();
        let entries = index_entries("cyd-2432s028r", section).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "2432S028R v3");
        assert!(entries.iter().all(|e| e.incubating));
        assert!(entries.iter().all(|e| e.warning_message.is_none()));
    }

    #[test]
    fn index_entry_serializes_missing_messages_as_null() {
        let entry = IndexEntry {
            id: "a".into(),
            name: "b".into(),
            vendor: "c".into(),
            incubating: false,
            warning_message: None,
            info_message: Some("hi".into()),
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["warningMessage"], serde_json::Value::Null);
        assert_eq!(v["infoMessage"], "hi");
    }
}
