//! Fetching the UEFI:NTFS boot-support image.

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name used when the URL has no usable last segment.
pub const BOOT_SUPPORT_IMAGE: &str = "uefi-ntfs.img";

/// Downloads the boot-support image into a directory.
pub trait BootSupportFetcher: Send + Sync {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Fetcher backed by a blocking HTTP client with a bounded wait.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn create_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("uniflash/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

fn file_name_for(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or(BOOT_SUPPORT_IMAGE)
        .to_string()
}

impl BootSupportFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL {}", url))?;
        let dest = dest_dir.join(file_name_for(&parsed));

        log::info!("Downloading {} -> {}", url, dest.display());
        let client = create_http_client(self.timeout)?;
        let mut response = client
            .get(parsed)
            .send()
            .with_context(|| format!("Failed to reach {}", url))?;
        if !response.status().is_success() {
            bail!("{} returned {}", url, response.status());
        }

        let mut file = File::create(&dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let bytes = io::copy(&mut response, &mut file)
            .with_context(|| format!("Failed to download {}", url))?;
        if bytes == 0 {
            bail!("{} returned an empty body", url);
        }
        log::debug!("Downloaded {} bytes", bytes);
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn fetch_writes_image_into_directory() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/res/uefi/uefi-ntfs.img");
            then.status(200).body(b"FAT12 image");
        });
        let dir = tempdir().unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        let path = fetcher
            .fetch(&server.url("/res/uefi/uefi-ntfs.img"), dir.path())
            .unwrap();

        mock.assert();
        assert_eq!(path, dir.path().join("uefi-ntfs.img"));
        assert_eq!(fs::read(path).unwrap(), b"FAT12 image");
    }

    #[test]
    fn http_errors_fail_the_fetch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/uefi-ntfs.img");
            then.status(404);
        });
        let dir = tempdir().unwrap();

        let err = HttpFetcher::new(Duration::from_secs(5))
            .fetch(&server.url("/uefi-ntfs.img"), dir.path())
            .unwrap_err();

        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn empty_bodies_are_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/img");
            then.status(200);
        });
        let dir = tempdir().unwrap();

        assert!(HttpFetcher::new(Duration::from_secs(5))
            .fetch(&server.url("/img"), dir.path())
            .is_err());
    }

    #[test]
    fn file_name_falls_back_for_bare_hosts() {
        let url = url::Url::parse("http://mirror.local/").unwrap();
        assert_eq!(file_name_for(&url), BOOT_SUPPORT_IMAGE);
        let url = url::Url::parse("http://mirror.local/a/b.img").unwrap();
        assert_eq!(file_name_for(&url), "b.img");
    }
}
