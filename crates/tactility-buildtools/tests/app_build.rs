#![cfg(unix)]

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use tactility_buildtools::app::build::{self, SDK_PATH_ENV};
use tactility_buildtools::app::{AppProject, BuildOptions};
use tactility_buildtools::executor::ExecCtx;

// Tests here mutate process-wide environment variables.
static ENV_LOCK: Mutex<()> = Mutex::new(());
static ORIGINAL_PATH: OnceLock<OsString> = OnceLock::new();

const PROPERTIES: &str = "[app]\nid=one.tactility.hello\n\n[sdk]\nversion=0.6.0\n";

/// Stand-in for `idf.py`: logs its arguments, exits 0 for `elf`, and for
/// `build` exits 1 after creating an ELF only when `produce-elf` exists.
const FAKE_IDF: &str = r#"#!/bin/sh
here="$(dirname "$0")"
echo "$* sdk=$TACTILITY_SDK_PATH" >> "$here/calls.log"
if [ "$3" = "elf" ]; then
    exit 0
fi
if [ -f "$here/produce-elf" ]; then
    mkdir -p "$2"
    echo elf > "$2/hello.app.elf"
fi
exit 1
"#;

struct Fixture {
    _guard: MutexGuard<'static, ()>,
    _tmp: tempfile::TempDir,
    bin: PathBuf,
    project: AppProject,
}

impl Fixture {
    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.bin.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn produce_elf(&self) {
        fs::write(self.bin.join("produce-elf"), "").unwrap();
    }
}

fn set_env(key: &str, value: Option<&Path>) {
    unsafe {
        match value {
            Some(v) => std::env::set_var(key, v),
            None => std::env::remove_var(key),
        }
    }
}

/// A project with properties and a cached esp32 sdkconfig, `idf.py` on PATH,
/// IDF_PATH set and TACTILITY_SDK_PATH pointing at a local SDK.
fn fixture() -> Fixture {
    let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let idf = bin.join("idf.py");
    fs::write(&idf, FAKE_IDF).unwrap();
    fs::set_permissions(&idf, fs::Permissions::from_mode(0o755)).unwrap();

    let root = tmp.path().join("hello");
    let project = AppProject::new(&root);
    fs::create_dir_all(project.cache_dir()).unwrap();
    fs::write(project.properties_path(), PROPERTIES).unwrap();
    fs::write(project.sdkconfig_cache_path("esp32"), "CONFIG_IDF_TARGET=\"esp32\"\n").unwrap();

    let original = ORIGINAL_PATH.get_or_init(|| std::env::var_os("PATH").unwrap_or_default());
    let mut dirs = vec![bin.clone()];
    dirs.extend(std::env::split_paths(original));
    let path = std::env::join_paths(dirs).unwrap();
    set_env("PATH", Some(Path::new(&path)));
    set_env("IDF_PATH", Some(&tmp.path().join("esp-idf")));
    set_env(SDK_PATH_ENV, Some(Path::new("/opt/tactility-sdk")));

    Fixture {
        _guard: guard,
        _tmp: tmp,
        bin,
        project,
    }
}

fn local(platform: &str) -> BuildOptions {
    BuildOptions {
        platform: platform.into(),
        local_sdk: true,
        ..BuildOptions::default()
    }
}

#[test]
fn first_build_succeeds_when_elf_appears_despite_exit_code() {
    let fx = fixture();
    fx.produce_elf();

    build::run(&fx.project, &local("esp32"), &ExecCtx::default()).unwrap();
    assert!(fx.project.find_elf("esp32").is_some());
    assert_eq!(
        fs::read_to_string(fx.project.root.join("sdkconfig")).unwrap(),
        "CONFIG_IDF_TARGET=\"esp32\"\n"
    );

    build::run(&fx.project, &local("esp32"), &ExecCtx::default()).unwrap();
    assert_eq!(
        fx.calls(),
        [
            "-B build-esp32 build sdk=/opt/tactility-sdk",
            "-B build-esp32 elf sdk=/opt/tactility-sdk",
        ]
    );
}

#[test]
fn failing_build_without_elf_is_an_error() {
    let fx = fixture();
    let err = build::run(&fx.project, &local("esp32"), &ExecCtx::default())
        .unwrap_err()
        .to_string();
    assert_eq!(err, "Building for esp32 failed");
    assert_eq!(fx.calls().len(), 1);
}

#[test]
fn skip_build_copies_sdkconfig_without_running_idf() {
    let fx = fixture();
    let opts = BuildOptions {
        skip_build: true,
        ..local("esp32")
    };
    build::run(&fx.project, &opts, &ExecCtx::default()).unwrap();
    assert!(fx.project.root.join("sdkconfig").is_file());
    assert!(fx.calls().is_empty());
}

#[test]
fn missing_cached_sdkconfig_is_reported() {
    let fx = fixture();
    fs::remove_file(fx.project.sdkconfig_cache_path("esp32")).unwrap();
    let err = build::run(&fx.project, &local("esp32"), &ExecCtx::default())
        .unwrap_err()
        .to_string();
    assert!(err.contains("sdkconfig.app.esp32 not found"), "{err}");
    assert!(fx.calls().is_empty());
}

#[test]
fn environment_is_checked_before_building() {
    let fx = fixture();
    let opts = local("esp32");

    set_env(SDK_PATH_ENV, None);
    let err = build::run(&fx.project, &opts, &ExecCtx::default())
        .unwrap_err()
        .to_string();
    assert_eq!(
        err,
        "local build was requested, but TACTILITY_SDK_PATH environment variable is not set."
    );

    set_env(SDK_PATH_ENV, Some(Path::new("/opt/tactility-sdk")));
    assert_eq!(
        build::validate_environment(&fx.project, true).unwrap(),
        Some(PathBuf::from("/opt/tactility-sdk"))
    );
    assert_eq!(build::validate_environment(&fx.project, false).unwrap(), None);

    fs::remove_file(fx.project.properties_path()).unwrap();
    let err = build::run(&fx.project, &opts, &ExecCtx::default())
        .unwrap_err()
        .to_string();
    assert_eq!(err, "tactility.properties file not found");

    set_env("IDF_PATH", None);
    let err = build::run(&fx.project, &opts, &ExecCtx::default())
        .unwrap_err()
        .to_string();
    assert!(err.contains("Cannot find the Espressif IDF SDK"), "{err}");
    assert!(fx.calls().is_empty());
}

#[test]
fn unknown_platform_is_rejected() {
    let fx = fixture();
    assert!(build::run(&fx.project, &local("esp32c6"), &ExecCtx::default()).is_err());
    assert!(fx.calls().is_empty());
}
