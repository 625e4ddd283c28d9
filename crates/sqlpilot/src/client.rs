//! HTTP client for the text-to-SQL backend.
//!
//! One `reqwest::Client` is shared by every call. It carries only a connect
//! timeout; non-streaming calls add the configured request timeout per
//! request so that a long auto-execute stream is never cut off.

use orchestration::{Provider, ResultSet, RunRequest};
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

const AUTO_EXECUTE_PATH: &str = "/api/auto-execute";
const GENERATE_PATH: &str = "/api/generate";
const EXECUTE_PATH: &str = "/api/execute";
const PROVIDERS_PATH: &str = "/api/providers";
const HEALTH_PATH: &str = "/api/health";

#[derive(Serialize)]
struct AutoExecuteBody<'a> {
    #[serde(flatten)]
    request: &'a RunRequest,
    stream: bool,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    query: &'a str,
    provider: Provider,
    model_id: Option<&'a str>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    sql: String,
    #[serde(default)]
    cleaned_sql: Option<String>,
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    sql: &'a str,
}

/// A generation provider as advertised by `GET /api/providers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_model: String,
    pub available: bool,
    pub requires_api_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the auto-execute stream. The returned response has a 2xx status;
    /// its body is the `data:` frame stream.
    pub async fn auto_execute(&self, request: &RunRequest) -> Result<Response, ClientError> {
        debug!(
            provider = %request.provider,
            max_retries = request.max_retries,
            "Opening auto-execute stream"
        );
        let response = self
            .http
            .post(self.config.endpoint(AUTO_EXECUTE_PATH))
            .json(&AutoExecuteBody {
                request,
                stream: true,
            })
            .send()
            .await?;
        check_status(response).await
    }

    /// One-shot generation. Returns the cleaned SQL, or the raw SQL when the
    /// backend sent no cleaned form.
    pub async fn generate(
        &self,
        query: &str,
        provider: Provider,
        model_id: Option<&str>,
    ) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.config.endpoint(GENERATE_PATH))
            .timeout(self.config.request_timeout)
            .json(&GenerateBody {
                query: query.trim(),
                provider,
                model_id,
                stream: false,
            })
            .send()
            .await?;
        let body: GenerateResponse = decode(check_status(response).await?).await?;
        Ok(body
            .cleaned_sql
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(body.sql))
    }

    /// Execute `sql` as-is. Blank SQL is rejected before any request is made.
    pub async fn execute(&self, sql: &str) -> Result<ResultSet, ClientError> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(ClientError::EmptySql);
        }
        let response = self
            .http
            .post(self.config.endpoint(EXECUTE_PATH))
            .timeout(self.config.request_timeout)
            .json(&ExecuteBody { sql })
            .send()
            .await?;
        decode(check_status(response).await?).await
    }

    pub async fn providers(&self) -> Result<Vec<ProviderInfo>, ClientError> {
        self.get_json(PROVIDERS_PATH).await
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        self.get_json(HEALTH_PATH).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .get(self.config.endpoint(path))
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        decode(check_status(response).await?).await
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let err = ClientError::from_status(status, &body);
    warn!(%status, error = %err, "Backend request failed");
    Err(err)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
}
