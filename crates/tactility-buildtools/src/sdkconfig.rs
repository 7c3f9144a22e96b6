//! ESP-IDF `sdkconfig` generation from a device's `device.properties`.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::properties::Properties;
use crate::util;

pub const DEVICES_DIRECTORY: &str = "Devices";
pub const DEFAULTS_PATH: &str = "Buildscripts/sdkconfig/default.properties";

#[derive(Debug, Clone)]
pub struct SdkconfigOptions {
    pub device_id: String,
    pub dev: bool,
    pub devices_dir: PathBuf,
    pub defaults: PathBuf,
    pub out: PathBuf,
}

pub fn device_properties_path(devices_dir: &Path, device_id: &str) -> PathBuf {
    devices_dir.join(device_id).join("device.properties")
}

pub fn run(opts: &SdkconfigOptions) -> Result<()> {
    let props_path = device_properties_path(&opts.devices_dir, &opts.device_id);
    if !props_path.is_file() {
        return Err(Error::msg(format!(
            "{} is not a valid device identifier (could not find {})",
            opts.device_id,
            props_path.display()
        )));
    }
    let props = Properties::load(&props_path)?;
    let defaults = fs::read_to_string(&opts.defaults).map_err(|e| {
        Error::msg(format!(
            "failed to read defaults {}: {e}",
            opts.defaults.display()
        ))
    })?;

    // Render fully before touching the old file so a bad property leaves nothing half-written.
    let body = render(&props, &defaults, &opts.device_id, opts.dev)?;
    if opts.out.is_file() {
        fs::remove_file(&opts.out)
            .map_err(|e| Error::msg(format!("failed to remove {}: {e}", opts.out.display())))?;
    }
    util::write_text(&opts.out, &body)?;

    let postfix = if opts.dev { " in dev mode" } else { "" };
    println!("Created sdkconfig for {}{postfix}", opts.device_id);
    Ok(())
}

pub fn render(props: &Properties, defaults: &str, device_id: &str, dev: bool) -> Result<String> {
    let mut out = String::new();
    out.push_str(defaults);
    out.push_str("\n\n");
    write_tactility_variables(&mut out, props, device_id)?;
    write_core_variables(&mut out, props)?;
    write_flash_variables(&mut out, props)?;
    write_partition_table(&mut out, props, dev)?;
    write_spiram_variables(&mut out, props)?;
    write_lvgl_variables(&mut out, props)?;
    write_performance_improvements(&mut out, props)?;
    write_usb_variables(&mut out, props);
    write_custom_sdkconfig(&mut out, props);
    Ok(out)
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// `hardware.flashSize` as the bare number, e.g. `16MB` -> `16`.
fn flash_size_number(props: &Properties) -> Result<String> {
    let flash_size = props.require("hardware", "flashSize")?;
    flash_size
        .strip_suffix("MB")
        .filter(|n| !n.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            Error::msg("Flash size should be written as xMB or xxMB (e.g. 4MB, 16MB)")
        })
}

struct Target {
    upper: String,
    lower: String,
}

impl Target {
    fn from_props(props: &Properties) -> Result<Self> {
        let raw = props.require("hardware", "target")?.trim();
        Ok(Self {
            upper: raw.to_ascii_uppercase(),
            lower: raw.to_ascii_lowercase(),
        })
    }

    fn is_esp32s3(&self) -> bool {
        self.lower == "esp32s3"
    }
}

fn write_tactility_variables(out: &mut String, props: &Properties, device_id: &str) -> Result<()> {
    let selector = device_id.to_uppercase().replace('-', "_");
    let _ = writeln!(out, "CONFIG_TT_DEVICE_{selector}=y");
    let vendor = escape_quotes(props.require("general", "vendor")?);
    let name = escape_quotes(props.require("general", "name")?);
    if name == vendor || vendor.is_empty() {
        let _ = writeln!(out, "CONFIG_TT_DEVICE_NAME=\"{name}\"");
    } else {
        let _ = writeln!(out, "CONFIG_TT_DEVICE_NAME=\"{vendor} {name}\"");
    }
    let _ = writeln!(out, "CONFIG_TT_DEVICE_ID=\"{device_id}\"");
    Ok(())
}

fn write_core_variables(out: &mut String, props: &Properties) -> Result<()> {
    let target = Target::from_props(props)?;
    out.push_str("# Target\n");
    let _ = writeln!(out, "CONFIG_IDF_TARGET=\"{}\"", target.lower);
    out.push_str("# CPU\n");
    out.push_str("CONFIG_ESP_DEFAULT_CPU_FREQ_MHZ_240=y\n");
    out.push_str("CONFIG_ESP_DEFAULT_CPU_FREQ_MHZ=240\n");
    let _ = writeln!(out, "CONFIG_{}_DEFAULT_CPU_FREQ_240=y", target.upper);
    let _ = writeln!(out, "CONFIG_{}_DEFAULT_CPU_FREQ_MHZ=240", target.upper);
    Ok(())
}

fn write_flash_variables(out: &mut String, props: &Properties) -> Result<()> {
    let size = flash_size_number(props)?;
    out.push_str("# Flash\n");
    let _ = writeln!(out, "CONFIG_ESPTOOLPY_FLASHSIZE_{size}MB=y");
    let mode = props.get("hardware", "flashMode").unwrap_or("QIO");
    let _ = writeln!(out, "CONFIG_FLASHMODE_{mode}=y");
    if let Some(freq) = props.get("hardware", "esptoolFlashFreq") {
        let _ = writeln!(out, "CONFIG_ESPTOOLPY_FLASHFREQ_{freq}=y");
    }
    Ok(())
}

fn write_partition_table(out: &mut String, props: &Properties, dev: bool) -> Result<()> {
    let size = if dev {
        "4".to_string()
    } else {
        flash_size_number(props)?
    };
    out.push_str("# Partition Table\n");
    out.push_str("CONFIG_PARTITION_TABLE_CUSTOM=y\n");
    let _ = writeln!(
        out,
        "CONFIG_PARTITION_TABLE_CUSTOM_FILENAME=\"partitions-{size}mb.csv\""
    );
    let _ = writeln!(out, "CONFIG_PARTITION_TABLE_FILENAME=\"partitions-{size}mb.csv\"");
    Ok(())
}

fn write_spiram_variables(out: &mut String, props: &Properties) -> Result<()> {
    let target = Target::from_props(props)?;
    if props.require("hardware", "spiRam")? != "true" {
        return Ok(());
    }
    out.push_str("# SPIRAM\n");
    out.push_str("CONFIG_SPIRAM=y\n");
    let _ = writeln!(out, "CONFIG_{}_SPIRAM_SUPPORT=y", target.upper);
    let mode = props.require("hardware", "spiRamMode")?;
    if mode == "AUTO" {
        out.push_str("CONFIG_SPIRAM_TYPE_AUTO=y\n");
    } else {
        let _ = writeln!(out, "CONFIG_SPIRAM_MODE_{mode}=y");
    }
    let speed = props.require("hardware", "spiRamSpeed")?;
    let _ = writeln!(out, "CONFIG_SPIRAM_SPEED_{speed}=y");
    let _ = writeln!(out, "CONFIG_SPIRAM_SPEED={speed}");
    // Reduce IRAM usage
    out.push_str("CONFIG_SPIRAM_USE_MALLOC=y\n");
    out.push_str("CONFIG_SPIRAM_TRY_ALLOCATE_WIFI_LWIP=y\n");
    if target.is_esp32s3() {
        out.push_str("CONFIG_SPIRAM_FETCH_INSTRUCTIONS=y\n");
        out.push_str("CONFIG_SPIRAM_RODATA=y\n");
        out.push_str("CONFIG_SPIRAM_XIP_FROM_PSRAM=y\n");
    }
    Ok(())
}

fn write_lvgl_variables(out: &mut String, props: &Properties) -> Result<()> {
    let dpi = props.require("display", "dpi")?;
    out.push_str("# LVGL\n");
    out.push_str("CONFIG_LV_DISP_DEF_REFR_PERIOD=10\n");
    let _ = writeln!(out, "CONFIG_LV_DPI_DEF={dpi}");
    let depth = props.require("lvgl", "colorDepth")?;
    let _ = writeln!(out, "CONFIG_LV_COLOR_DEPTH={depth}");
    let _ = writeln!(out, "CONFIG_LV_COLOR_DEPTH_{depth}=y");
    match props.get("lvgl", "theme") {
        None | Some("DefaultDark") => out.push_str("CONFIG_LV_THEME_DEFAULT_DARK=y\n"),
        Some("DefaultLight") => out.push_str("CONFIG_LV_THEME_DEFAULT_LIGHT=y\n"),
        Some("Mono") => {
            out.push_str("CONFIG_LV_THEME_DEFAULT_DARK=y\n");
            out.push_str("CONFIG_LV_THEME_MONO=y\n");
        }
        Some(other) => return Err(Error::msg(format!("Unknown theme: {other}"))),
    }
    Ok(())
}

fn write_performance_improvements(out: &mut String, props: &Properties) -> Result<()> {
    let target = Target::from_props(props)?;
    out.push_str("# Free up IRAM\n");
    out.push_str("CONFIG_FREERTOS_PLACE_FUNCTIONS_INTO_FLASH=y\n");
    out.push_str("CONFIG_FREERTOS_PLACE_SNAPSHOT_FUNS_INTO_FLASH=y\n");
    out.push_str("CONFIG_HEAP_PLACE_FUNCTION_INTO_FLASH=y\n");
    out.push_str("CONFIG_RINGBUF_PLACE_FUNCTIONS_INTO_FLASH=y\n");
    out.push_str("# Boot speed optimization\n");
    out.push_str("CONFIG_SPIRAM_MEMTEST=n\n");
    if target.is_esp32s3() {
        out.push_str("# Performance improvement: Fixes glitches in the RGB display driver when rendering new screens/apps\n");
        out.push_str("CONFIG_ESP32S3_DATA_CACHE_LINE_64B=y\n");
    }
    Ok(())
}

fn write_usb_variables(out: &mut String, props: &Properties) {
    if props.get_bool_or_false("hardware", "tinyUsb") {
        out.push_str("# TinyUSB\n");
        out.push_str("CONFIG_TINYUSB_MSC_ENABLED=y\n");
        out.push_str("CONFIG_TINYUSB_MSC_MOUNT_PATH=\"/sdcard\"\n");
    }
}

fn write_custom_sdkconfig(out: &mut String, props: &Properties) {
    let Some(section) = props.section("sdkconfig") else {
        return;
    };
    out.push_str("# Custom\n");
    for (key, value) in section.iter() {
        let _ = writeln!(out, "{key}={}", escape_quotes(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(text: &str) -> Properties {
        Properties::parse(Path::new("device.properties"), text).unwrap()
    }

    const MINIMAL: &str = "[general]\nvendor=LilyGO\nname=T-Deck\n\
        [hardware]\ntarget=ESP32S3\nflashSize=16MB\nspiRam=false\n\
        [display]\ndpi=139\n[lvgl]\ncolorDepth=16\n";

    #[test]
    fn vendor_equal_to_name_is_not_repeated() {
        let p = props(
            "[general]\nvendor=Elecrow\nname=Elecrow\n[hardware]\ntarget=ESP32\n\
             flashSize=4MB\nspiRam=false\n[display]\ndpi=100\n[lvgl]\ncolorDepth=16\n",
        );
        let out = render(&p, "", "elecrow-basic", false).unwrap();
        assert!(out.contains("CONFIG_TT_DEVICE_NAME=\"Elecrow\"\n"));
        assert!(out.contains("CONFIG_TT_DEVICE_ELECROW_BASIC=y\n"));
    }

    #[test]
    fn dev_mode_forces_4mb_partition_table() {
        let out = render(&props(MINIMAL), "", "lilygo-tdeck", true).unwrap();
        assert!(out.contains("CONFIG_ESPTOOLPY_FLASHSIZE_16MB=y\n"));
        assert!(out.contains("CONFIG_PARTITION_TABLE_FILENAME=\"partitions-4mb.csv\"\n"));
    }

    #[test]
    fn rejects_flash_size_without_unit() {
        let p = props(&MINIMAL.replace("16MB", "16"));
        let err = render(&p, "", "x", false).unwrap_err().to_string();
        assert!(err.contains("Flash size should be written"), "{err}");
    }

    #[test]
    fn rejects_unknown_theme() {
        let p = props(&format!("{MINIMAL}theme=Neon\n"));
        let err = render(&p, "", "x", false).unwrap_err().to_string();
        assert_eq!(err, "Unknown theme: Neon");
    }

    #[test]
    fn spiram_auto_mode_and_s3_extras() {
        let p = props(&MINIMAL.replace(
            "spiRam=false",
            "spiRam=true\nspiRamMode=AUTO\nspiRamSpeed=80M",
        ));
        let out = render(&p, "", "x", false).unwrap();
        assert!(out.contains("CONFIG_ESP32S3_SPIRAM_SUPPORT=y\n"));
        assert!(out.contains("CONFIG_SPIRAM_TYPE_AUTO=y\n"));
        assert!(out.contains("CONFIG_SPIRAM_SPEED=80M\n"));
        assert!(out.contains("CONFIG_SPIRAM_XIP_FROM_PSRAM=y\n"));
        assert!(out.contains("CONFIG_ESP32S3_DATA_CACHE_LINE_64B=y\n"));
    }
}
