use std::time::Duration;

use crate::error::{ControlPointError, FetchError, Result};

/// Retrieves description documents, SCPDs and icons.
pub trait DescriptionFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

/// [`DescriptionFetcher`] over blocking reqwest
pub struct HttpDescriptionFetcher {
    client: reqwest::blocking::Client,
}

impl HttpDescriptionFetcher {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPointError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

impl DescriptionFetcher for HttpDescriptionFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().map_err(network)?;
        tracing::trace!(url, bytes = body.len(), "fetched document");
        Ok(body.to_vec())
    }
}
