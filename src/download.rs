//! Remote bundle download
//!
//! Sockets installed from an `install_url` have their bundle fetched by the
//! worker before import. The transfer is bounded by a timeout and a byte cap.

use crate::config::{DownloadConfig, Limits};
use crate::{Error, Result};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};

pub struct BundleDownloader {
    client: reqwest::blocking::Client,
    max_size: u64,
}

impl BundleDownloader {
    pub fn new(config: &DownloadConfig, limits: &Limits) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            max_size: limits.max_zip_file_size,
        })
    }

    /// Fetch the bundle for `socket` from `url`.
    ///
    /// Any failure is reported against the socket; it is not retried.
    pub fn fetch(&self, socket: &str, url: &str) -> Result<Vec<u8>> {
        info!(socket = %socket, url = %url, "Downloading bundle");
        self.get(url).map_err(|cause| {
            Error::processing(format!(
                "Error downloading socket \"{}\" specification zip file: {}.",
                socket,
                cause.trim_end_matches('.')
            ))
        })
    }

    fn get(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                "Request timed out".to_string()
            } else {
                e.to_string()
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        if response.content_length().map(|len| len > self.max_size).unwrap_or(false) {
            return Err("Response too large".to_string());
        }

        // Content-Length may be missing or wrong; cap the body itself
        let mut body = Vec::new();
        response
            .take(self.max_size + 1)
            .read_to_end(&mut body)
            .map_err(|e| e.to_string())?;
        if body.len() as u64 > self.max_size {
            return Err("Response too large".to_string());
        }

        debug!(url = %url, bytes = body.len(), "Bundle downloaded");
        Ok(body)
    }
}
