use std::fs;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tactility_buildtools::app::sdk::{self, SdkJson};
use tactility_buildtools::app::{self, AppProject, BuildOptions, SDK_JSON_VALIDITY};
use tactility_buildtools::executor::ExecCtx;

#[test]
fn sdk_json_goes_stale_after_validity_window() {
    let tmp = tempfile::tempdir().unwrap();
    let project = AppProject::new(tmp.path());
    let path = project.sdk_json_path();
    fs::create_dir_all(project.cache_dir()).unwrap();
    fs::write(&path, r#"{"toolVersion":"1.0.0"}"#).unwrap();
    assert!(!sdk::is_stale(&path, SDK_JSON_VALIDITY));

    let old = SystemTime::now() - SDK_JSON_VALIDITY - Duration::from_secs(60);
    filetime::set_file_mtime(&path, FileTime::from_system_time(old)).unwrap();
    assert!(sdk::is_stale(&path, SDK_JSON_VALIDITY));

    let json: SdkJson = sdk::read_sdk_json(&path).unwrap();
    assert_eq!(json.tool_version.as_deref(), Some("1.0.0"));
    assert!(json.versions.is_none());
}

#[test]
fn clean_removes_only_build_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let project = AppProject::new(tmp.path());
    assert_eq!(app::clean(&project).unwrap(), 0);

    fs::create_dir_all(project.build_dir("esp32").join("esp-idf")).unwrap();
    fs::create_dir_all(project.build_dir("esp32s3")).unwrap();
    fs::create_dir_all(tmp.path().join("main")).unwrap();
    fs::write(tmp.path().join("build-notes.txt"), "keep").unwrap();

    assert_eq!(app::clean(&project).unwrap(), 2);
    assert!(!project.build_dir("esp32").exists());
    assert!(!project.build_dir("esp32s3").exists());
    assert!(tmp.path().join("main").is_dir());
    assert!(tmp.path().join("build-notes.txt").is_file());
}

#[test]
fn clearcache_removes_sdk_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let project = AppProject::new(tmp.path());
    assert!(!app::clear_cache(&project).unwrap());

    fs::create_dir_all(project.sdk_dir("0.6.0", "esp32")).unwrap();
    assert!(app::clear_cache(&project).unwrap());
    assert!(!project.cache_dir().exists());
}

#[test]
fn build_rejects_unknown_platform_first() {
    let tmp = tempfile::tempdir().unwrap();
    let project = AppProject::new(tmp.path());
    let opts = BuildOptions {
        platform: "esp8266".into(),
        ..BuildOptions::default()
    };
    let err = app::build::run(&project, &opts, &ExecCtx::default())
        .unwrap_err()
        .to_string();
    assert_eq!(err, "Invalid platform name");
    assert!(!project.cache_dir().exists());
}
