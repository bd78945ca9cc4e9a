use std::sync::atomic::{AtomicUsize, Ordering};

use alloy::{
    providers::{ProviderBuilder, RootProvider},
    transports::http::reqwest::Url,
};

use crate::error::EngineError;

struct RpcEndpoint {
    url: Url,
    provider: RootProvider,
}

/// Round-robin pool of RPC endpoints.
///
/// Providers are built once per endpoint at startup so `rotate` never
/// re-parses URLs mid-run. There is no health tracking: rotation is
/// triggered externally when a caller observes a failure, and wraps around
/// to previously abandoned endpoints.
pub struct RpcPool {
    endpoints: Vec<RpcEndpoint>,
    cursor: AtomicUsize,
}

impl RpcPool {
    pub fn new(urls: &[String]) -> Result<Self, EngineError> {
        if urls.is_empty() {
            return Err(EngineError::RpcConfigError {
                message: "no RPC endpoints configured".to_string(),
            });
        }

        let endpoints = urls
            .iter()
            .map(|raw| {
                let url = Url::parse(raw).map_err(|e| EngineError::RpcConfigError {
                    message: format!("Failed to parse RPC URL {raw}: {e}"),
                })?;
                let provider = ProviderBuilder::new()
                    .disable_recommended_fillers()
                    .connect_http(url.clone());
                Ok(RpcEndpoint { url, provider })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn active(&self) -> &RpcEndpoint {
        let index = self.cursor.load(Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[index]
    }

    pub fn current(&self) -> &RootProvider {
        &self.active().provider
    }

    pub fn current_url(&self) -> &Url {
        &self.active().url
    }

    /// Advance the cursor and return the newly active provider.
    pub fn rotate(&self) -> &RootProvider {
        let previous = self.cursor.fetch_add(1, Ordering::Relaxed);
        let index = (previous + 1) % self.endpoints.len();
        let endpoint = &self.endpoints[index];
        tracing::debug!(rpc_url = %endpoint.url, "rotated to next RPC endpoint");
        &endpoint.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_is_a_setup_error() {
        let result = RpcPool::new(&[]);
        assert!(matches!(result, Err(EngineError::RpcConfigError { .. })));
    }

    #[test]
    fn rotation_is_round_robin() {
        let pool = RpcPool::new(&[
            "http://127.0.0.1:8545".to_string(),
            "http://127.0.0.1:8546".to_string(),
            "http://127.0.0.1:8547".to_string(),
        ])
        .unwrap();

        assert_eq!(pool.current_url().port(), Some(8545));
        pool.rotate();
        assert_eq!(pool.current_url().port(), Some(8546));
        pool.rotate();
        assert_eq!(pool.current_url().port(), Some(8547));
        pool.rotate();
        assert_eq!(pool.current_url().port(), Some(8545));
    }
}
