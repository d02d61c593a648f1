//! [`RemoteAccess`] backed by an HTTP link gateway.
//!
//! The gateway speaks plain JSON:
//! - `POST /public-node {link}` returns a node
//! - `POST /folder-login {link}` returns `{session}`
//! - `GET /folders/{session}/nodes` returns `{nodes: [...]}`
//!
//! Errors come back as `{code, message}` with a non-2xx status.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::ResolveError;
use super::remote::{FolderLogin, NodeTree, RemoteAccess, RemoteNode};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};

#[derive(Serialize)]
struct LinkRequest<'a> {
    link: &'a str,
}

#[derive(Deserialize)]
struct NodeListResponse {
    #[serde(default)]
    nodes: Vec<RemoteNode>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

pub struct GatewayRemote {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for GatewayRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRemote")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GatewayRemote {
    pub fn new(client: Client, base_url: &str, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Gateway URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ResolveError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ResolveError::Gateway(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ResolveError::Gateway(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request, retrying transient failures, and decode the body.
    async fn request<T, B>(&self, build: B) -> Result<T, ResolveError>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let build = &build;
        retry_with_backoff(
            &self.retry,
            |e: &ResolveError| RetryAction::when(e.is_retryable()),
            |_| async move {
                let response = build().send().await?;
                decode(response).await
            },
        )
        .await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ResolveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_response(status, &body))
}

/// Map a non-success gateway response onto a [`ResolveError`].
pub(crate) fn error_from_response(status: StatusCode, body: &str) -> ResolveError {
    let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => (err.code, err.message),
        Err(_) => (status.as_u16().to_string(), body.trim().to_string()),
    };
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    match status {
        StatusCode::BAD_REQUEST => ResolveError::InvalidLink(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ResolveError::AccessDenied(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => ResolveError::Unavailable(message),
        StatusCode::TOO_MANY_REQUESTS => ResolveError::Transient(message),
        s if s.is_server_error() => ResolveError::Transient(message),
        _ => ResolveError::Remote { code, message },
    }
}

#[async_trait]
impl RemoteAccess for GatewayRemote {
    async fn public_node(&self, link: &str) -> Result<RemoteNode, ResolveError> {
        let url = self.endpoint(&["public-node"])?;
        self.request(|| self.client.post(url.clone()).json(&LinkRequest { link }))
            .await
    }

    async fn login_to_folder(&self, link: &str) -> Result<FolderLogin, ResolveError> {
        let url = self.endpoint(&["folder-login"])?;
        self.request(|| self.client.post(url.clone()).json(&LinkRequest { link }))
            .await
    }

    async fn fetch_nodes(&self, login: &FolderLogin) -> Result<NodeTree, ResolveError> {
        let url = self.endpoint(&["folders", &login.session, "nodes"])?;
        let listing: NodeListResponse = self.request(|| self.client.get(url.clone())).await?;
        NodeTree::new(listing.nodes)
    }
}
