use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cdn::INDEX_FILE;
use crate::config::{
    self, ConfigDoc, resolve_env_ref, resolve_required_string_field, resolve_string_field,
};
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::http;

pub const DEFAULT_CONFIG_PATH: &str = "cdn.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct S3BackendConfig {
    pub bucket: String,
    pub bucket_env: Option<String>,
    pub region: Option<String>,
    pub region_env: Option<String>,
    pub endpoint_url: Option<String>,
    pub endpoint_url_env: Option<String>,
    pub profile: Option<String>,
    pub profile_env: Option<String>,
    pub aws_access_key_id_env: Option<String>,
    pub aws_secret_access_key_env: Option<String>,
    pub aws_session_token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub base_url_env: Option<String>,
    pub token: Option<String>,
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UploadBackendsConfig {
    pub s3: BTreeMap<String, S3BackendConfig>,
    pub http: BTreeMap<String, HttpBackendConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UploadConfig {
    pub backend: Option<String>,
    pub prefix: Option<String>,
    pub prefix_env: Option<String>,
    pub backends: UploadBackendsConfig,
}

impl UploadConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(doc.deserialize_path("upload")?.unwrap_or_default())
    }

    /// Load `path` when it exists; a missing file yields an empty config.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no upload config at {}", path.display());
            return Ok(Self::default());
        }
        Self::from_doc(&config::load(path)?)
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub dir: PathBuf,
    pub backend: Option<String>,
    pub prefix: Option<String>,
    pub index_only: bool,
}

#[derive(Debug)]
enum BackendResolved<'a> {
    S3(String, &'a S3BackendConfig),
    Http(String, &'a HttpBackendConfig),
}

fn resolve_backend<'a>(cfg: &'a UploadConfig, backend_ref: &str) -> Result<BackendResolved<'a>> {
    let backend_ref = backend_ref.trim();
    if backend_ref.is_empty() {
        return Err(Error::msg(
            "no upload backend selected (set upload.backend or pass --backend)",
        ));
    }

    if let Some((kind, name)) = backend_ref.split_once('.') {
        let found = match kind {
            "s3" => cfg
                .backends
                .s3
                .get(name)
                .map(|v| BackendResolved::S3(name.to_string(), v)),
            "http" => cfg
                .backends
                .http
                .get(name)
                .map(|v| BackendResolved::Http(name.to_string(), v)),
            _ => {
                return Err(Error::msg(format!(
                    "unknown upload backend kind '{kind}'; expected s3/http"
                )));
            }
        };
        return found
            .ok_or_else(|| Error::msg(format!("upload backend '{backend_ref}' is not configured")));
    }

    let mut hits = Vec::new();
    if let Some(v) = cfg.backends.s3.get(backend_ref) {
        hits.push(BackendResolved::S3(backend_ref.to_string(), v));
    }
    if let Some(v) = cfg.backends.http.get(backend_ref) {
        hits.push(BackendResolved::Http(backend_ref.to_string(), v));
    }
    match hits.len() {
        0 => Err(Error::msg(format!(
            "upload backend '{backend_ref}' is not configured"
        ))),
        1 => Ok(hits.remove(0)),
        _ => Err(Error::msg(format!(
            "upload backend '{backend_ref}' is ambiguous; use s3.{backend_ref} or http.{backend_ref}"
        ))),
    }
}

pub fn content_type_for(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Files to upload, in upload order: artifacts by name, then the index, so
/// a client never sees an index that points at files not yet present.
pub fn select_files(dir: &Path, index_only: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::msg(format!(
            "upload directory not found: {}",
            dir.display()
        )));
    }
    let index = dir.join(INDEX_FILE);
    if index_only {
        if !index.is_file() {
            return Err(Error::msg(format!("{} not found", index.display())));
        }
        return Ok(vec![index]);
    }

    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).map_err(|e| Error::msg(format!("failed to list {}: {e}", dir.display())))?
    {
        let entry = entry.map_err(|e| Error::msg(format!("read_dir entry error: {e}")))?;
        let path = entry.path();
        if path.is_file() && entry.file_name() != INDEX_FILE {
            files.push(path);
        }
    }
    files.sort();
    if index.is_file() {
        files.push(index);
    }
    if files.is_empty() {
        return Err(Error::msg(format!("nothing to upload in {}", dir.display())));
    }
    Ok(files)
}

pub fn object_key(prefix: Option<&str>, name: &str) -> String {
    match prefix.map(|p| p.trim().trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(p) => format!("{p}/{name}"),
        None => name.to_string(),
    }
}

pub fn run(opts: &UploadOptions, cfg: &UploadConfig, ctx: &ExecCtx) -> Result<usize> {
    let files = select_files(&opts.dir, opts.index_only)?;
    let backend_ref = opts
        .backend
        .as_deref()
        .or(cfg.backend.as_deref())
        .unwrap_or_default();
    let backend = resolve_backend(cfg, backend_ref)?;
    let prefix = opts
        .prefix
        .clone()
        .or_else(|| resolve_string_field(cfg.prefix.as_deref(), cfg.prefix_env.as_deref()));

    let http_client = match &backend {
        BackendResolved::Http(..) => Some(http::client(Duration::from_secs(300))?),
        BackendResolved::S3(..) => None,
    };

    for file in &files {
        let name = file
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::msg(format!("invalid upload path {}", file.display())))?;
        let key = object_key(prefix.as_deref(), &name);
        tracing::info!("uploading {} -> {key}", file.display());
        match (&backend, &http_client) {
            (BackendResolved::S3(cfg_name, b), _) => upload_with_s3(ctx, cfg_name, b, file, &key)?,
            (BackendResolved::Http(cfg_name, b), Some(client)) => {
                upload_with_http(ctx, client, cfg_name, b, file, &key)?
            }
            (BackendResolved::Http(..), None) => {
                return Err(Error::msg("HTTP client was not initialized"));
            }
        }
    }
    println!("Uploaded {} file(s)", files.len());
    Ok(files.len())
}

#[derive(Debug, Clone)]
struct S3ResolvedConfig {
    bucket: String,
    region: Option<String>,
    endpoint_url: Option<String>,
    profile: Option<String>,
    command_env: BTreeMap<String, String>,
}

fn resolve_s3_config(cfg_name: &str, cfg: &S3BackendConfig) -> Result<S3ResolvedConfig> {
    let bucket = resolve_required_string_field(
        &format!("upload.backends.s3.{cfg_name}.bucket"),
        Some(cfg.bucket.as_str()),
        cfg.bucket_env.as_deref(),
    )?;
    let mut command_env = BTreeMap::<String, String>::new();
    for (dst, src) in [
        ("AWS_ACCESS_KEY_ID", cfg.aws_access_key_id_env.as_deref()),
        ("AWS_SECRET_ACCESS_KEY", cfg.aws_secret_access_key_env.as_deref()),
        ("AWS_SESSION_TOKEN", cfg.aws_session_token_env.as_deref()),
    ] {
        if let Some(v) = resolve_env_ref(src) {
            command_env.insert(dst.to_string(), v);
        }
    }
    Ok(S3ResolvedConfig {
        bucket,
        region: resolve_string_field(cfg.region.as_deref(), cfg.region_env.as_deref()),
        endpoint_url: resolve_string_field(
            cfg.endpoint_url.as_deref(),
            cfg.endpoint_url_env.as_deref(),
        ),
        profile: resolve_string_field(cfg.profile.as_deref(), cfg.profile_env.as_deref()),
        command_env,
    })
}

fn s3_cp_command(cfg: &S3ResolvedConfig, file: &Path, key: &str) -> Command {
    let mut cmd = Command::new("aws");
    if let Some(profile) = cfg.profile.as_deref() {
        cmd.arg("--profile").arg(profile);
    }
    if let Some(region) = cfg.region.as_deref() {
        cmd.arg("--region").arg(region);
    }
    if let Some(endpoint) = cfg.endpoint_url.as_deref() {
        cmd.arg("--endpoint-url").arg(endpoint);
    }
    for (k, v) in &cfg.command_env {
        cmd.env(k, v);
    }
    cmd.arg("s3")
        .arg("cp")
        .arg(file)
        .arg(format!("s3://{}/{key}", cfg.bucket))
        .arg("--content-type")
        .arg(content_type_for(key));
    cmd
}

fn upload_with_s3(
    ctx: &ExecCtx,
    cfg_name: &str,
    cfg: &S3BackendConfig,
    file: &Path,
    key: &str,
) -> Result<()> {
    let resolved = resolve_s3_config(cfg_name, cfg)?;
    ctx.run_capture(s3_cp_command(&resolved, file, key))
        .map_err(|e| Error::msg(format!("S3 upload of {} failed: {e}", file.display())))?;
    Ok(())
}

fn upload_with_http(
    ctx: &ExecCtx,
    client: &reqwest::blocking::Client,
    cfg_name: &str,
    cfg: &HttpBackendConfig,
    file: &Path,
    key: &str,
) -> Result<()> {
    let base = resolve_required_string_field(
        &format!("upload.backends.http.{cfg_name}.base_url"),
        Some(cfg.base_url.as_str()),
        cfg.base_url_env.as_deref(),
    )?;
    let url = format!("{}/{key}", base.trim_end_matches('/'));
    if ctx.dry_run {
        tracing::info!("DRY-RUN: PUT {url}");
        return Ok(());
    }

    let body = fs::read(file)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", file.display())))?;
    let mut req = client
        .put(&url)
        .header(reqwest::header::CONTENT_TYPE, content_type_for(key))
        .body(body);
    if let Some(t) = resolve_string_field(cfg.token.as_deref(), cfg.token_env.as_deref()) {
        req = req.bearer_auth(t);
    }
    let res = req
        .send()
        .map_err(|e| Error::msg(format!("HTTP upload to {url} failed: {e}")))?;
    if res.status().is_success() {
        return Ok(());
    }
    Err(Error::msg(format!(
        "HTTP upload to {url} failed with status {}",
        res.status()
    )))
}
