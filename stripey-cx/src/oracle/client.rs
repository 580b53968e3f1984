//! CollateX HTTP client

use super::{AlignmentRequest, AlignmentResponse, OracleError, OracleTransport};
use std::time::Duration;

const USER_AGENT: &str = concat!("stripey/", env!("CARGO_PKG_VERSION"));

/// Client for a CollateX service listening on localhost
pub struct HttpOracleClient {
    http_client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpOracleClient {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, OracleError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            url: format!("http://localhost:{}/collate", port),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl OracleTransport for HttpOracleClient {
    async fn collate(&self, request: &AlignmentRequest) -> Result<AlignmentResponse, OracleError> {
        tracing::debug!(
            url = %self.url,
            algorithm = %request.algorithm,
            witnesses = request.witnesses.len(),
            "Querying CollateX"
        );

        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout)
                } else {
                    OracleError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OracleError::ApiError(status.as_u16(), error_text));
        }

        response
            .json::<AlignmentResponse>()
            .await
            .map_err(|e| OracleError::ParseError(e.to_string()))
    }
}
