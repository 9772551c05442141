use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Runtime};

use crate::aws::imds::ImdsClient;

/// Lazily built AWS clients. Nothing is initialized, not even the async
/// runtime, until a client is first requested.
#[derive(Debug, Default)]
pub struct AwsCtx {
    rt: OnceCell<Runtime>,
    imds: OnceCell<ImdsClient>,
}

impl AwsCtx {
    pub fn new() -> Self {
        Self::default()
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.rt.get_or_try_init(|| {
            Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| anyhow!("unable to start async runtime: {}", e))
        })
    }

    pub fn imds(&self) -> Result<&ImdsClient> {
        let rt = self.runtime()?;
        self.imds.get_or_try_init(|| {
            let _guard = rt.enter();
            let client = aws_config::imds::Client::builder().build();
            Ok(ImdsClient::new(rt.handle().clone(), client))
        })
    }
}
