//! REST document store client
//!
//! Endpoints, relative to the configured base URL:
//! - `GET session` returns `{"principal": "..."}`
//! - `GET|PUT|DELETE documents/<path>` reads, writes or removes one document
//! - `GET documents?prefix=chunks/` returns `{"documents": ["chunks/<d>/<i>", ...]}`

use super::{
    check_document_size, ChunkDocument, ChunkKey, DocumentStore, Identity, SnapshotMetadata,
    CHUNK_PREFIX, METADATA_PATH,
};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<String>,
}

pub struct HttpStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
    max_document_bytes: usize,
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("store.url is required for the http backend".to_string()))?;
        Self::with_token(raw, config.token(), config.max_document_bytes, config.timeout_secs)
    }

    pub fn with_token(
        base_url: &str,
        token: Option<String>,
        max_document_bytes: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        // Url::join replaces the last segment unless the base ends with '/'
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
            max_document_bytes,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid store URL: {}", e)))
    }

    fn document_url(&self, path: &str) -> Result<Url> {
        self.endpoint(&format!("documents/{}", path))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// GET a JSON document, `None` on 404
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self.send(self.client.get(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, &url)?;
        let body = response
            .json::<T>()
            .await
            .map_err(|e| Error::Transport(format!("Malformed response from {}: {}", url, e)))?;
        Ok(Some(body))
    }

    async fn put_json(&self, path: &str, body: String) -> Result<()> {
        check_document_size(path, body.len(), self.max_document_bytes)?;
        let url = self.document_url(path)?;
        debug!("PUT {} ({} bytes)", url, body.len());

        let request = self
            .client
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let response = self.send(request).await?;
        check_status(response, &url)?;
        Ok(())
    }
}

/// Map a non-success status onto the store error classes
fn check_status(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::Auth(format!("{} returned {}", url, status)))
        }
        StatusCode::PAYLOAD_TOO_LARGE => Err(Error::Transport(format!(
            "{} rejected the document as too large",
            url
        ))),
        _ => Err(Error::Transport(format!("{} returned {}", url, status))),
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn connect(&self) -> Result<Identity> {
        let url = self.endpoint("session")?;
        self.get_json::<Identity>(url.clone())
            .await?
            .ok_or_else(|| Error::Transport(format!("{} returned 404", url)))
    }

    async fn get_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        let url = self.document_url(METADATA_PATH)?;
        self.get_json(url).await
    }

    async fn put_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        self.put_json(METADATA_PATH, serde_json::to_string(metadata)?)
            .await
    }

    async fn put_chunk(&self, key: ChunkKey, chunk: &ChunkDocument) -> Result<()> {
        self.put_json(&key.path(), serde_json::to_string(chunk)?)
            .await
    }

    async fn get_chunk(&self, key: ChunkKey) -> Result<ChunkDocument> {
        let url = self.document_url(&key.path())?;
        self.get_json(url).await?.ok_or_else(|| Error::ChunkNotFound {
            deployment_id: key.deployment_id.to_string(),
            index: key.index,
        })
    }

    async fn list_chunks(&self) -> Result<Vec<ChunkKey>> {
        let mut url = self.endpoint("documents")?;
        url.query_pairs_mut().append_pair("prefix", CHUNK_PREFIX);

        let list: DocumentList = self.get_json(url).await?.unwrap_or(DocumentList {
            documents: Vec::new(),
        });
        let mut keys: Vec<ChunkKey> = list
            .documents
            .iter()
            .filter_map(|path| ChunkKey::parse_path(path))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_chunk(&self, key: ChunkKey) -> Result<()> {
        let url = self.document_url(&key.path())?;
        let response = self.send(self.client.delete(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, &url)?;
        Ok(())
    }

    fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    fn describe(&self) -> String {
        self.base_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeploymentId;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpStore {
        HttpStore::with_token(
            &format!("{}/api", server.uri()),
            Some("secret".to_string()),
            1024,
            5,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/session"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"principal": "ops"})),
            )
            .mount(&server)
            .await;

        let identity = client(&server).connect().await.unwrap();
        assert_eq!(identity.principal, "ops");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/session"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/documents/metadata"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/documents/chunks/5/0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/documents/chunks/5/1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = client(&server);
        assert!(store.connect().await.unwrap_err().is_auth());
        assert!(store.get_metadata().await.unwrap().is_none());
        assert!(matches!(
            store.get_chunk(ChunkKey::new(DeploymentId::new(5), 0)).await,
            Err(Error::ChunkNotFound { index: 0, .. })
        ));
        assert!(matches!(
            store.get_chunk(ChunkKey::new(DeploymentId::new(5), 1)).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_put_and_list_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/documents/chunks/9/0"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/documents"))
            .and(query_param("prefix", "chunks/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "documents": ["chunks/9/1", "chunks/9/0", "metadata", "chunks/x/0"]
            })))
            .mount(&server)
            .await;

        let store = client(&server);
        let key = ChunkKey::new(DeploymentId::new(9), 0);
        store
            .put_chunk(key, &ChunkDocument { data: "abc".to_string() })
            .await
            .unwrap();

        let keys = store.list_chunks().await.unwrap();
        assert_eq!(keys, vec![key, ChunkKey::new(DeploymentId::new(9), 1)]);
    }

    #[tokio::test]
    async fn test_oversized_put_never_sent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let store = client(&server);
        let key = ChunkKey::new(DeploymentId::new(1), 0);
        let result = store
            .put_chunk(key, &ChunkDocument { data: "x".repeat(4096) })
            .await;
        assert!(matches!(result, Err(Error::DocumentTooLarge { .. })));
    }
}
