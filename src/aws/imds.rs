use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use aws_config::imds::client::error::{ErrorResponse, ImdsError};
use crossbeam::utils::Backoff;
use tokio::runtime::Handle;

const METADATA_PREFIX: &str = "/latest/meta-data";

/// Blocking wrapper around [`ImdsClientAsync`].
#[derive(Clone, Debug)]
pub struct ImdsClient {
    rt: Handle,
    client: ImdsClientAsync,
}

impl ImdsClient {
    pub fn new(rt: Handle, client: aws_config::imds::Client) -> Self {
        Self {
            rt,
            client: ImdsClientAsync::new(client),
        }
    }

    pub fn get_metadata(&self, path: &str) -> Result<String> {
        self.rt.block_on(self.client.get_metadata(path))
    }

    pub fn get_optional_metadata(&self, path: &str) -> Result<Option<String>> {
        self.rt.block_on(self.client.get_optional_metadata(path))
    }

    pub fn list_metadata(&self, path: &str) -> Result<Vec<String>> {
        self.rt.block_on(self.client.list_metadata(path))
    }

    pub fn wait_for(&self, timeout: Duration) -> Result<()> {
        self.rt.block_on(self.client.wait_for(timeout))
    }
}

#[derive(Clone, Debug)]
pub struct ImdsClientAsync {
    client: aws_config::imds::Client,
}

impl ImdsClientAsync {
    pub fn new(client: aws_config::imds::Client) -> Self {
        Self { client }
    }

    pub async fn get_metadata(&self, path: &str) -> Result<String> {
        let full_path = format!("{}/{}", METADATA_PREFIX, path);
        self.client
            .get(&full_path)
            .await
            .map(String::from)
            .map_err(|e| anyhow!("failed to get {} from IMDS: {}", &full_path, e))
    }

    /// Like [`get_metadata`](Self::get_metadata), but a missing key is
    /// `None` rather than an error.
    pub async fn get_optional_metadata(&self, path: &str) -> Result<Option<String>> {
        let full_path = format!("{}/{}", METADATA_PREFIX, path);
        match self.client.get(&full_path).await {
            Ok(resp) => Ok(Some(resp.into())),
            Err(ImdsError::ErrorResponse(e)) if is_not_found(&e) => Ok(None),
            Err(e) => Err(anyhow!("failed to get {} from IMDS: {}", &full_path, e)),
        }
    }

    /// Entries of a metadata directory, without trailing slashes.
    pub async fn list_metadata(&self, path: &str) -> Result<Vec<String>> {
        let listing = self.get_metadata(path).await?;
        Ok(parse_listing(&listing))
    }

    pub async fn wait_for(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let backoff = Backoff::new();
        let path = format!("{}/instance-id", METADATA_PREFIX);
        loop {
            match self.client.get(&path).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if start.elapsed() >= timeout {
                        return Err(anyhow!("failed to wait for IMDS: {}", e));
                    }
                    backoff.snooze();
                }
            }
        }
    }
}

fn is_not_found(error: &ErrorResponse) -> bool {
    error.response().status().as_u16() == 404
}

fn parse_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(|line| line.trim().trim_end_matches('/'))
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
