//! HTTP client for the remote category directory.
//!
//! Wire shape: `GET|POST {base}/v1/scopes/{scope}/categories` and
//! `PUT|DELETE {base}/v1/scopes/{scope}/categories/{id-or-slug}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use shopfront_core::TenantId;
use shopfront_taxonomy::ProviderCategoryRecord;

use super::{CategoryProvider, ProviderError};
use crate::config::{ConfigError, ENV_PROVIDER_URL, ProviderConfig};

#[derive(Debug, Serialize, Deserialize)]
struct CategoryDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    slug: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CategoryListDto {
    #[serde(default)]
    categories: Vec<CategoryDto>,
}

impl From<CategoryDto> for ProviderCategoryRecord {
    fn from(dto: CategoryDto) -> Self {
        Self {
            external_id: dto.id,
            slug: dto.slug,
            name: dto.name,
        }
    }
}

impl From<&ProviderCategoryRecord> for CategoryDto {
    fn from(record: &ProviderCategoryRecord) -> Self {
        Self {
            id: record.external_id.clone(),
            slug: record.slug.clone(),
            name: record.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpCategoryProvider {
    client: Client,
    base: Url,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpCategoryProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            key: ENV_PROVIDER_URL,
            value: config.base_url.clone(),
            reason,
        };

        let base = Url::parse(&config.base_url).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("URL cannot carry a path".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            client,
            base,
            api_token: config.api_token.clone(),
            timeout: config.timeout(),
        })
    }

    fn endpoint(&self, scope: TenantId, key: Option<&str>) -> Url {
        let mut url = self.base.clone();
        let scope = scope.to_string();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "scopes", scope.as_str(), "categories"]);
            if let Some(key) = key {
                segments.push(key);
            }
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))
    }

    /// Turn a non-success response into an error, unless `tolerated` says the
    /// status already means the desired end state.
    async fn check(
        response: reqwest::Response,
        tolerated: Option<StatusCode>,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() || Some(status) == tolerated {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// Item path key: the opaque id when known, else the slug.
fn record_key(record: &ProviderCategoryRecord) -> &str {
    record.external_id.as_deref().unwrap_or(&record.slug)
}

pub(crate) fn classify_status(status: StatusCode, body: String) -> ProviderError {
    let code = status.as_u16();
    match code {
        401 | 403 => ProviderError::Unauthorized,
        408 | 429 => ProviderError::unavailable(format!("{code}: {body}")),
        500..=599 => ProviderError::unavailable(format!("{code}: {body}")),
        _ => ProviderError::rejected(code, body),
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_builder() || err.is_redirect() {
        ProviderError::InvalidRequest {
            message: err.to_string(),
        }
    } else if err.is_timeout() {
        ProviderError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }
    } else if err.is_connect() {
        ProviderError::unavailable(err.to_string())
    } else if err.is_decode() {
        ProviderError::Decode {
            message: err.to_string(),
        }
    } else {
        ProviderError::Network {
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl CategoryProvider for HttpCategoryProvider {
    #[instrument(skip_all, fields(scope = %scope), err)]
    async fn list(&self, scope: TenantId) -> Result<Vec<ProviderCategoryRecord>, ProviderError> {
        let response = self.send(self.client.get(self.endpoint(scope, None))).await?;
        let response = Self::check(response, None).await?;
        let body: CategoryListDto = response.json().await.map_err(|e| ProviderError::Decode {
            message: e.to_string(),
        })?;
        debug!(count = body.categories.len(), "listed provider categories");
        Ok(body.categories.into_iter().map(Into::into).collect())
    }

    #[instrument(skip_all, fields(scope = %scope, slug = %record.slug), err)]
    async fn create(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError> {
        let request = self
            .client
            .post(self.endpoint(scope, None))
            .json(&CategoryDto::from(record));
        let response = self.send(request).await?;
        Self::check(response, Some(StatusCode::CONFLICT)).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(scope = %scope, slug = %from.slug), err)]
    async fn update(
        &self,
        scope: TenantId,
        from: &ProviderCategoryRecord,
        to: &ProviderCategoryRecord,
    ) -> Result<(), ProviderError> {
        let request = self
            .client
            .put(self.endpoint(scope, Some(record_key(from))))
            .json(&CategoryDto::from(to));
        let response = self.send(request).await?;
        Self::check(response, None).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(scope = %scope, slug = %record.slug), err)]
    async fn delete(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError> {
        let request = self.client.delete(self.endpoint(scope, Some(record_key(record))));
        let response = self.send(request).await?;
        Self::check(response, Some(StatusCode::NOT_FOUND)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base: &str) -> HttpCategoryProvider {
        HttpCategoryProvider::new(&ProviderConfig::new(base)).unwrap()
    }

    #[test]
    fn endpoints_are_scoped_and_escaped() {
        let p = provider("https://dir.example.test/api/");
        let scope = TenantId::new();

        let list = p.endpoint(scope, None);
        assert_eq!(
            list.as_str(),
            format!("https://dir.example.test/api/v1/scopes/{scope}/categories")
        );

        let item = p.endpoint(scope, Some("garden tools"));
        assert!(item.as_str().ends_with("/categories/garden%20tools"));
    }

    #[test]
    fn statuses_are_classified() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, String::new()).is_transient());
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            ProviderError::Unauthorized
        );
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad slug".into()),
            ProviderError::rejected(422, "bad slug")
        );
    }

    #[test]
    fn item_key_prefers_external_id() {
        let bare = ProviderCategoryRecord::new("tools", "Tools");
        assert_eq!(record_key(&bare), "tools");
        assert_eq!(record_key(&bare.clone().with_external_id("c-9")), "c-9");
    }

    #[test]
    fn rejects_base_without_path_support() {
        assert!(HttpCategoryProvider::new(&ProviderConfig::new("mailto:ops@example.test")).is_err());
    }

    #[tokio::test]
    async fn malformed_request_is_a_permanent_failure() {
        let mut config = ProviderConfig::new("https://dir.example.test");
        config.api_token = Some("line\nbreak".to_string());
        let p = HttpCategoryProvider::new(&config).unwrap();

        let err = p.list(TenantId::new()).await.unwrap_err();

        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn list_body_decodes() {
        let body = r#"{"categories":[{"id":"x1","slug":"Tools","name":"Tools"},{"slug":"garden","name":"Garden"}]}"#;
        let dto: CategoryListDto = serde_json::from_str(body).unwrap();
        let records: Vec<ProviderCategoryRecord> = dto.categories.into_iter().map(Into::into).collect();
        assert_eq!(records[0].external_id.as_deref(), Some("x1"));
        assert_eq!(records[1].external_id, None);
    }
}
