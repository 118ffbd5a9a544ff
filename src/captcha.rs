// src/captcha.rs
use anyhow::{Context, Result};
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::page::{selectors, PageAutomation};

pub const DATA_URI_IMAGE_PREFIX: &str = "data:image";

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("captcha image element unavailable: {0:#}")]
    NotFound(anyhow::Error),
    #[error("captcha image has no src attribute")]
    MissingSource,
    #[error("captcha src is not an image data URI (starts with {preview:?})")]
    InvalidSource { preview: String },
}

/// Read the current captcha off the page as a full `data:image/...;base64,...` string.
pub async fn acquire_captcha<P: PageAutomation>(
    page: &P,
    timings: &Timings,
) -> Result<String, AcquireError> {
    debug!("reading captcha image #{}", selectors::CAPTCHA_IMAGE);
    let el = page
        .wait_for_present(&selectors::captcha_image(), timings.captcha_timeout)
        .await
        .map_err(AcquireError::NotFound)?;

    // src is filled in by script after the node appears
    sleep(timings.captcha_settle).await;

    let src = page
        .read_attribute(&el, "src")
        .await
        .map_err(AcquireError::NotFound)?
        .ok_or(AcquireError::MissingSource)?;

    check_data_uri(src)
}

fn check_data_uri(src: String) -> Result<String, AcquireError> {
    if src.starts_with(DATA_URI_IMAGE_PREFIX) {
        Ok(src)
    } else {
        Err(AcquireError::InvalidSource {
            preview: src.chars().take(100).collect(),
        })
    }
}

/// Base64 body of a data URI; input without a comma is returned as-is.
pub fn base64_payload(data_uri: &str) -> &str {
    match data_uri.split_once(',') {
        Some((_, body)) => body,
        None => {
            warn!("captcha data has no data URI header, using it verbatim");
            data_uri
        }
    }
}

pub fn snapshot_path(dir: &Path, attempt: u32) -> PathBuf {
    dir.join(format!("page_original_attempt_{attempt}.png"))
}

/// Decode the captcha and write it as PNG into `dir` for later inspection.
pub fn save_snapshot(dir: &Path, attempt: u32, data_uri: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create debug folder {}", dir.display()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_payload(data_uri).trim())
        .context("decode captcha base64")?;
    let img = image::load_from_memory(&bytes).context("decode captcha image")?;

    let path = snapshot_path(dir, attempt);
    img.save(&path)
        .with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "saved captcha snapshot");
    Ok(path)
}
