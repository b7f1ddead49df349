use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use url::Url;

use super::{Generation, UploadOptions, VersionedStore};
use crate::error::StoreError;

/// Cloud Storage JSON API client scoped to one bucket.
pub struct GcsStore {
    client: Client,
    base: Url,
    bucket: String,
    token: Option<String>,
}

impl GcsStore {
    pub fn new(
        endpoint: &str,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, StoreError> {
        let base = Url::parse(endpoint).map_err(|err| StoreError::Endpoint(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Endpoint(endpoint.to_string()));
        }
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base,
            bucket: bucket.into(),
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Endpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        self.url(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    fn auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, key: &str, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.auth(request).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::PRECONDITION_FAILED => Err(StoreError::Conflict {
                key: key.to_string(),
            }),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Status {
                    key: key.to_string(),
                    status,
                    body,
                })
            }
        }
    }
}

/// Generations arrive as decimal strings (int64 in JSON), but accept bare numbers too.
fn parse_generation(metadata: &Value) -> Result<Generation, StoreError> {
    let raw = metadata
        .get("generation")
        .ok_or_else(|| StoreError::Decode("object metadata missing generation".into()))?;
    let parsed = match raw {
        Value::String(text) => text.parse::<i64>().ok(),
        Value::Number(number) => number.as_i64(),
        _ => None,
    };
    parsed
        .map(Generation)
        .ok_or_else(|| StoreError::Decode(format!("unparseable generation: {raw}")))
}

async fn read_metadata(response: Response) -> Result<Value, StoreError> {
    response
        .json::<Value>()
        .await
        .map_err(|err| StoreError::Decode(err.to_string()))
}

#[async_trait]
impl VersionedStore for GcsStore {
    async fn generation(&self, key: &str) -> Result<Generation, StoreError> {
        let url = self.object_url(key)?;
        let response = self.send(key, self.client.get(url)).await?;
        parse_generation(&read_metadata(response).await?)
    }

    async fn download(&self, key: &str) -> Result<Bytes, StoreError> {
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self.send(key, self.client.get(url)).await?;
        Ok(response.bytes().await?)
    }

    async fn upload(
        &self,
        key: &str,
        content: Bytes,
        options: &UploadOptions,
    ) -> Result<Generation, StoreError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("uploadType", "media");
            query.append_pair("name", key);
            if let Some(generation) = options.if_generation_match {
                query.append_pair("ifGenerationMatch", &generation.to_string());
            }
        }
        let content_type = options
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(content);
        let response = self.send(key, request).await?;
        let generation = parse_generation(&read_metadata(response).await?)?;

        // Media uploads carry no metadata beyond the content type.
        if let Some(cache_control) = &options.cache_control {
            let url = self.object_url(key)?;
            self.send(
                key,
                self.client
                    .patch(url)
                    .json(&json!({ "cacheControl": cache_control })),
            )
            .await?;
        }

        tracing::debug!(%key, bucket = %self.bucket, %generation, "uploaded object");
        Ok(generation)
    }

    async fn grant_reader(&self, key: &str, user: &str) -> Result<(), StoreError> {
        let entity = format!("user-{user}");
        let url = self.url(&["storage", "v1", "b", &self.bucket, "o", key, "acl", &entity])?;
        self.send(
            key,
            self.client
                .put(url)
                .json(&json!({ "entity": entity, "role": "READER" })),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        self.send(key, self.client.delete(url)).await?;
        Ok(())
    }
}
