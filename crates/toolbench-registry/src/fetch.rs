use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use toolbench_security::sha512_hex;
use tracing::debug;

/// Transport used for feeds and package archives.
pub trait Fetcher {
    /// Stores the resource under `dest_dir` and returns the written file.
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;

    fn fetch_text(&self, url: &str) -> Result<String>;
}

/// `http(s)://` through reqwest; `file://` urls and plain paths are copied.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("toolbench/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        let destination = dest_dir.join(url_to_filename(url));

        if let Some(source) = local_path(url) {
            debug!(source = %source.display(), "copying local archive");
            fs::copy(&source, &destination).with_context(|| {
                format!(
                    "failed copying {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
            return Ok(destination);
        }

        debug!(url, "downloading");
        let part_path = destination.with_extension("part");
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to download {url}"))?;
        let mut file = File::create(&part_path)
            .with_context(|| format!("failed to create {}", part_path.display()))?;
        if let Err(err) = response.copy_to(&mut file) {
            let _ = fs::remove_file(&part_path);
            return Err(err).with_context(|| format!("failed to download {url}"));
        }
        drop(file);
        fs::rename(&part_path, &destination).with_context(|| {
            format!(
                "failed to move downloaded file into place: {}",
                destination.display()
            )
        })?;
        Ok(destination)
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        if let Some(path) = local_path(url) {
            return fs::read_to_string(&path)
                .with_context(|| format!("failed reading {}", path.display()));
        }
        self.client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .with_context(|| format!("failed to fetch {url}"))
    }
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Filesystem path behind a `file://` url or a plain path; `None` for
/// remote urls.
pub fn local_path(location: &str) -> Option<PathBuf> {
    if is_remote(location) {
        return None;
    }
    let path = location.strip_prefix("file://").unwrap_or(location);
    Some(PathBuf::from(path))
}

/// Last path segment of `url`, reduced to a safe file name.
pub fn url_to_filename(url: &str) -> String {
    let last = url.rsplit(['/', '\\']).next().unwrap_or(url);
    let last = last.split(['?', '#']).next().unwrap_or(last);
    let sanitized: String = last
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return format!("download-{}", &sha512_hex(url.as_bytes())[..16]);
    }
    sanitized
}
