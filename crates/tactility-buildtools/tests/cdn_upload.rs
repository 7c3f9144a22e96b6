use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;

use tactility_buildtools::cdn::upload::{self, UploadConfig, UploadOptions};
use tactility_buildtools::config;
use tactility_buildtools::executor::ExecCtx;

#[derive(Debug)]
struct Recorded {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

fn read_request(r: &mut impl BufRead) -> Option<Recorded> {
    let mut line = String::new();
    if r.read_line(&mut line).ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    let mut headers = BTreeMap::new();
    loop {
        let mut h = String::new();
        r.read_line(&mut h).ok()?;
        let h = h.trim_end();
        if h.is_empty() {
            break;
        }
        if let Some((k, v)) = h.split_once(':') {
            headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    let len = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; len];
    r.read_exact(&mut body).ok()?;
    Some(Recorded {
        method,
        path,
        headers,
        body,
    })
}

fn serve(listener: TcpListener, expected: usize) -> thread::JoinHandle<Vec<Recorded>> {
    thread::spawn(move || {
        let mut seen = Vec::new();
        for stream in listener.incoming() {
            let mut writer = stream.expect("accept");
            let mut reader = BufReader::new(writer.try_clone().expect("clone stream"));
            while seen.len() < expected {
                let Some(req) = read_request(&mut reader) else {
                    break;
                };
                writer
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                    .expect("respond");
                seen.push(req);
            }
            if seen.len() >= expected {
                break;
            }
        }
        seen
    })
}

fn artifacts(dir: &Path) {
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("index.json"), "{}").unwrap();
    fs::write(dir.join("lilygo-tdeck-Tactility.bin"), b"app").unwrap();
    fs::write(dir.join("TactilitySDK-esp32.zip"), b"PK").unwrap();
}

fn load_config(root: &Path, text: &str) -> UploadConfig {
    let path = root.join("cdn.toml");
    fs::write(&path, text).unwrap();
    UploadConfig::from_doc(&config::load(&path).unwrap()).unwrap()
}

#[test]
fn http_backend_puts_every_file_with_index_last() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    artifacts(&dir);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = serve(listener, 3);

    let cfg = load_config(
        tmp.path(),
        &format!(
            r#"
[upload]
backend = "local"
prefix = "/firmware/"

[upload.backends.http.local]
base_url = "http://127.0.0.1:{port}/cdn/"
token = "secret"
"#
        ),
    );
    let opts = UploadOptions {
        dir,
        backend: None,
        prefix: None,
        index_only: false,
    };
    assert_eq!(upload::run(&opts, &cfg, &ExecCtx::default()).unwrap(), 3);

    let seen = server.join().unwrap();
    let paths: Vec<&str> = seen.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        [
            "/cdn/firmware/TactilitySDK-esp32.zip",
            "/cdn/firmware/lilygo-tdeck-Tactility.bin",
            "/cdn/firmware/index.json",
        ]
    );
    assert!(seen.iter().all(|r| r.method == "PUT"));
    assert!(seen.iter().all(|r| r.headers["authorization"] == "Bearer secret"));
    assert_eq!(seen[0].headers["content-type"], "application/zip");
    assert_eq!(seen[1].headers["content-type"], "application/octet-stream");
    assert_eq!(seen[2].headers["content-type"], "application/json");
    assert_eq!(seen[1].body, b"app");
    assert!(
        seen.iter()
            .all(|r| r.headers["user-agent"].starts_with("Tactility Build Tool ")),
        "{:?}",
        seen[0].headers
    );
}

#[test]
fn dry_run_s3_with_cli_overrides() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    artifacts(&dir);
    let cfg = load_config(
        tmp.path(),
        r#"
[upload.backends.s3.release]
bucket = "tactility-cdn"
region = "auto"
"#,
    );

    let opts = UploadOptions {
        dir: dir.clone(),
        backend: Some("s3.release".into()),
        prefix: Some("0.6.0".into()),
        index_only: true,
    };
    assert_eq!(upload::run(&opts, &cfg, &ExecCtx::new(true)).unwrap(), 1);

    let missing = UploadOptions {
        backend: None,
        ..opts
    };
    let err = upload::run(&missing, &cfg, &ExecCtx::new(true))
        .unwrap_err()
        .to_string();
    assert!(err.contains("no upload backend selected"), "{err}");
}

#[test]
fn selection_orders_files_and_rejects_empty_dirs() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    artifacts(&dir);

    let names: Vec<String> = upload::select_files(&dir, false)
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        ["TactilitySDK-esp32.zip", "lilygo-tdeck-Tactility.bin", "index.json"]
    );

    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    assert!(upload::select_files(&empty, false).is_err());
    let err = upload::select_files(&empty, true).unwrap_err().to_string();
    assert!(err.contains("index.json not found"), "{err}");
}

#[test]
fn missing_config_file_means_no_backends() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = UploadConfig::load_or_default(&tmp.path().join("cdn.toml")).unwrap();
    assert!(cfg.backend.is_none());
    assert!(cfg.backends.s3.is_empty() && cfg.backends.http.is_empty());
}
