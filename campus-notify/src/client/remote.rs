//! Remote notification API.
//!
//! The client-side view of the server: feed reads and the mutation
//! round-trips that confirm optimistic cache changes.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;
use url::Url;

use crate::domain::{CompositeKey, FeedQuery};
use crate::error::SourceFailure;
use crate::notification::{DeleteTarget, Feed};
use crate::utils::http_client::{HttpClientConfig, build_client};
use crate::{Error, Result};

/// Operations the client issues against the notification server.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn fetch(&self, query: &FeedQuery) -> Result<Feed>;

    async fn mark_read(&self, keys: &[CompositeKey]) -> Result<u64>;

    async fn mark_all_read(&self) -> Result<u64>;

    async fn mark_processed(&self, key: &CompositeKey) -> Result<u64>;

    async fn delete(&self, target: &DeleteTarget) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct MutationResponse {
    affected: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct KeysBody<'a> {
    keys: &'a [CompositeKey],
}

#[derive(Serialize)]
struct KeyBody<'a> {
    key: &'a CompositeKey,
}

#[derive(Serialize)]
struct DeleteBody<'a> {
    #[serde(skip_serializing_if = "no_keys")]
    keys: &'a [CompositeKey],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    all: bool,
}

fn no_keys(keys: &&[CompositeKey]) -> bool {
    keys.is_empty()
}

/// [`NotificationApi`] over HTTP with a Bearer token.
#[derive(Clone)]
pub struct HttpNotificationApi {
    client: Client,
    base_url: Url,
    token: String,
}

impl HttpNotificationApi {
    pub fn new(base_url: &str, token: impl Into<String>, config: &HttpClientConfig) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("Invalid server URL '{}': {}", base_url, e)))?;
        Ok(Self {
            client: build_client(config),
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// WebSocket URL of the push channel, token included.
    pub fn push_url(&self) -> Result<Url> {
        let mut url = self.endpoint("api/notifications/ws")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::config(format!("Cannot derive push URL from {}", self.base_url)))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::config(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self
            .client
            .request(method, self.endpoint(path)?)
            .bearer_auth(&self.token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %body, "Notification API request failed");
        Err(error_from_response(status, &body))
    }

    async fn mutate<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<u64> {
        let request = self.request(Method::POST, path)?.json(body);
        Ok(self.send::<MutationResponse>(request).await?.affected)
    }
}

/// Map a non-success response to the crate error taxonomy.
fn error_from_response(status: StatusCode, body: &str) -> Error {
    let body: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if body.message.is_empty() {
        status.to_string()
    } else {
        body.message
    };

    match (status, body.code.as_str()) {
        (_, "AGGREGATION_FAILED") => {
            let failures = body
                .details
                .and_then(|d| d.get("failures").cloned())
                .and_then(|f| serde_json::from_value::<Vec<SourceFailure>>(f).ok())
                .unwrap_or_default();
            Error::AggregationFailed { failures }
        }
        (StatusCode::UNAUTHORIZED, _) | (StatusCode::FORBIDDEN, _) => Error::Unauthorized(message),
        (StatusCode::NOT_FOUND, _) => Error::NotFound {
            entity_type: "Notification".to_string(),
            id: message,
        },
        (StatusCode::BAD_REQUEST, _) | (StatusCode::UNPROCESSABLE_ENTITY, _) => {
            Error::Validation(message)
        }
        _ => Error::Other(format!("{} ({}): {}", status, body.code, message)),
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch(&self, query: &FeedQuery) -> Result<Feed> {
        let request = self.request(Method::GET, "api/notifications")?.query(query);
        self.send(request).await
    }

    async fn mark_read(&self, keys: &[CompositeKey]) -> Result<u64> {
        self.mutate("api/notifications/read", &KeysBody { keys }).await
    }

    async fn mark_all_read(&self) -> Result<u64> {
        self.mutate("api/notifications/read-all", &serde_json::json!({}))
            .await
    }

    async fn mark_processed(&self, key: &CompositeKey) -> Result<u64> {
        self.mutate("api/notifications/processed", &KeyBody { key })
            .await
    }

    async fn delete(&self, target: &DeleteTarget) -> Result<u64> {
        let body = match target {
            DeleteTarget::All => DeleteBody {
                keys: &[],
                all: true,
            },
            DeleteTarget::Keys(keys) => DeleteBody { keys, all: false },
        };
        self.mutate("api/notifications/delete", &body).await
    }
}
