//! Utility functions
//!
use std::{fs::File, io::Cursor, path::PathBuf};

use anyhow::{Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<std::path::Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Directory the model bundles are cached in, created on demand.
pub fn model_cache_dir() -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .context("could not determine the cache directory")?
        .join("overlay_server")
        .join("models");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
