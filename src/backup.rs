use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::cache::CACHE_FILE;

const MANIFEST_ENTRY: &str = "manifest.json";
const CACHE_ENTRY: &str = "cache/portal-cache.sqlite3";
pub const BUNDLE_FORMAT: &str = "coach-portal-cache-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub sha256: String,
}

fn sha256_file(path: &Path) -> anyhow::Result<(String, u64)> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let bytes = std::io::copy(&mut f, &mut hasher)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    Ok((hex::encode(hasher.finalize()), bytes))
}

pub fn export_cache_bundle(workspace_path: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let cache_path = workspace_path.join(CACHE_FILE);
    if !cache_path.is_file() {
        return Err(anyhow!(
            "portal cache not found: {}",
            cache_path.to_string_lossy()
        ));
    }
    let (sha256, bytes) = sha256_file(&cache_path)?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!("failed to create output file {}", out_path.to_string_lossy())
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "sha256": sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(CACHE_ENTRY, opts)
        .context("failed to start cache entry")?;
    let mut cache_file = File::open(&cache_path)
        .with_context(|| format!("failed to open cache {}", cache_path.to_string_lossy()))?;
    std::io::copy(&mut cache_file, &mut zip).context("failed to write cache entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    tracing::info!(out = %out_path.display(), bytes, "portal cache exported");
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        sha256,
        bytes,
    })
}

/// Restores a bundle (or a bare cache file) into `workspace_path`. The cache
/// must not be open while this runs.
pub fn import_cache_bundle(in_path: &Path, workspace_path: &Path) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!("failed to create workspace {}", workspace_path.to_string_lossy())
    })?;
    let dst = workspace_path.join(CACHE_FILE);

    if !is_zip_file(in_path)? {
        std::fs::copy(in_path, &dst).with_context(|| {
            format!(
                "failed to copy raw cache file from {} to {}",
                in_path.to_string_lossy(),
                dst.to_string_lossy()
            )
        })?;
        let (sha256, _) = sha256_file(&dst)?;
        return Ok(ImportSummary {
            bundle_format_detected: "raw-sqlite3".to_string(),
            sha256,
        });
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest.get("format").and_then(|v| v.as_str()).unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected = manifest
        .get("sha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json missing sha256"))?
        .to_string();

    let tmp_dst = workspace_path.join(format!("{}.importing", CACHE_FILE));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    let mut out = File::create(&tmp_dst).with_context(|| {
        format!("failed to create temp cache {}", tmp_dst.to_string_lossy())
    })?;
    {
        let mut entry = archive
            .by_name(CACHE_ENTRY)
            .context("bundle missing cache/portal-cache.sqlite3")?;
        std::io::copy(&mut entry, &mut out).context("failed to extract cache entry")?;
    }
    out.flush().context("failed to flush extracted cache")?;
    drop(out);

    let (actual, _) = sha256_file(&tmp_dst)?;
    if actual != expected {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(anyhow!(
            "checksum mismatch: manifest {} but extracted {}",
            expected,
            actual
        ));
    }

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!("failed to remove existing cache {}", dst.to_string_lossy())
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!("failed to move extracted cache to {}", dst.to_string_lossy())
    })?;

    tracing::info!(workspace = %workspace_path.display(), "portal cache imported");
    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT.to_string(),
        sha256: actual,
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
