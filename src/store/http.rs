//! Flag store client over JSON/HTTP.
//!
//! Routes are resolved against the configured API root:
//! - `GET/POST   {base}/features`
//! - `GET/PUT    {base}/features/{id}`
//! - `POST       {base}/features/{id}/customers`
//! - `POST       {base}/features/request`
//! - `POST       {base}/archived_features`
//!
//! Instants travel as Unix milliseconds. Some store versions acknowledge
//! create/update without a body, in which case the record is read back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::{CustomerFeature, FlagRepository};
use crate::errors::{FlagError, FlagResult};
use crate::models::flag::{validate_fields, ArchiveFlagRequest, FlagPayload, UpdateFlagRequest};
use crate::models::{validate_for_create, FeatureFlag};

pub struct HttpFlagRepository {
    base: Url,
    http: Client,
}

impl HttpFlagRepository {
    /// Build a repository with its own HTTP client. Timeouts are enforced by
    /// the client and surface as `FlagError::Transport`.
    pub fn new(base: Url, timeout: Duration, connect_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("flagctl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(base, http)
    }

    pub fn with_client(base: Url, http: Client) -> anyhow::Result<Self> {
        if base.cannot_be_a_base() {
            anyhow::bail!("flag store url '{}' cannot be used as a base url", base);
        }
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected at construction
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: Url,
        body: &T,
    ) -> FlagResult<Response> {
        tracing::debug!(%method, %url, "flag store request");
        let resp = self
            .http
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(resp)
    }

    async fn get(&self, url: Url) -> FlagResult<Response> {
        tracing::debug!(method = "GET", %url, "flag store request");
        let resp = self.http.get(url).send().await.map_err(transport_error)?;
        Ok(resp)
    }

    /// Read back a freshly created flag. The listing is only used to learn
    /// the new id; it omits `customerIds`, so the record itself is fetched.
    async fn find_by_technical_name(&self, technical_name: &str) -> FlagResult<FeatureFlag> {
        let id = self
            .list()
            .await?
            .into_iter()
            .find(|f| f.technical_name == technical_name)
            .and_then(|f| f.id)
            .ok_or_else(|| FlagError::Unexpected {
                status: StatusCode::CREATED.as_u16(),
                body: format!("created flag '{}' missing from listing", technical_name),
            })?;
        self.fetch_one(id).await
    }

    /// The store answers 404 both for an unknown id and for a stale token
    /// that matched no row. Tell the two apart with a fresh read.
    async fn classify_missing_update(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
    ) -> FlagError {
        match self.fetch_one(id).await {
            Ok(current) if current.archived => FlagError::Archived,
            Ok(current) if current.updated_at != expected_updated_at => {
                tracing::warn!(
                    %id,
                    %expected_updated_at,
                    current_updated_at = %current.updated_at,
                    "update matched no row, flag moved on"
                );
                FlagError::Conflict(id.to_string())
            }
            Ok(_) => FlagError::NotFound(id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl FlagRepository for HttpFlagRepository {
    async fn list(&self) -> FlagResult<Vec<FeatureFlag>> {
        let resp = self.get(self.url(&["features"])).await?;
        let resp = ensure_success(resp, "features").await?;
        // An empty listing may come back as `null`.
        let flags = read_json::<Option<Vec<FeatureFlag>>>(resp).await?.flatten();
        Ok(flags
            .unwrap_or_default()
            .into_iter()
            .filter(|f| !f.archived)
            .collect())
    }

    async fn fetch_one(&self, id: Uuid) -> FlagResult<FeatureFlag> {
        let subject = id.to_string();
        let resp = self.get(self.url(&["features", subject.as_str()])).await?;
        let resp = ensure_success(resp, &subject).await?;
        read_json(resp).await?.ok_or_else(|| FlagError::Unexpected {
            status: StatusCode::OK.as_u16(),
            body: "empty flag record".to_string(),
        })
    }

    async fn create(&self, draft: &FeatureFlag) -> FlagResult<FeatureFlag> {
        validate_for_create(draft)?;

        let payload = FlagPayload::from(draft);
        let resp = self
            .send_json(reqwest::Method::POST, self.url(&["features"]), &payload)
            .await?;
        let resp = ensure_success(resp, &draft.technical_name).await?;

        let created = match read_json::<FeatureFlag>(resp).await? {
            Some(flag) => flag,
            None => self.find_by_technical_name(&draft.technical_name).await?,
        };
        tracing::info!(
            id = ?created.id,
            technical_name = %created.technical_name,
            "created flag"
        );
        Ok(created)
    }

    async fn update(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        edits: &FeatureFlag,
    ) -> FlagResult<FeatureFlag> {
        validate_fields(edits)?;

        let subject = id.to_string();
        let req = UpdateFlagRequest {
            last_updated_at: expected_updated_at,
            feature: FlagPayload::from(edits),
        };
        let resp = self
            .send_json(reqwest::Method::PUT, self.url(&["features", subject.as_str()]), &req)
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(self.classify_missing_update(id, expected_updated_at).await);
        }
        let resp = match ensure_success(resp, &subject).await {
            Err(FlagError::Conflict(s)) => {
                tracing::warn!(%id, %expected_updated_at, "update rejected, stale token");
                return Err(FlagError::Conflict(s));
            }
            other => other?,
        };

        let updated = match read_json::<FeatureFlag>(resp).await? {
            Some(flag) => flag,
            None => self.fetch_one(id).await?,
        };
        tracing::info!(%id, updated_at = %updated.updated_at, "updated flag");
        Ok(updated)
    }

    async fn archive(&self, id: Uuid) -> FlagResult<()> {
        let subject = id.to_string();
        let req = ArchiveFlagRequest { feature_id: id };
        let resp = self
            .send_json(
                reqwest::Method::POST,
                self.url(&["archived_features"]),
                &req,
            )
            .await?;
        ensure_success(resp, &subject).await?;
        tracing::info!(%id, "archived flag");
        Ok(())
    }

    async fn add_customers(&self, id: Uuid, customer_ids: &[String]) -> FlagResult<()> {
        if customer_ids.is_empty() {
            return Err(FlagError::invalid("no customer IDs given"));
        }
        let subject = id.to_string();
        let req = AddCustomersRequest { customer_ids };
        let resp = self
            .send_json(
                reqwest::Method::POST,
                self.url(&["features", subject.as_str(), "customers"]),
                &req,
            )
            .await?;
        ensure_success(resp, &subject).await?;
        tracing::info!(%id, count = customer_ids.len(), "added customers to flag");
        Ok(())
    }

    async fn request_as_customer(
        &self,
        customer_id: &str,
        technical_names: &[String],
    ) -> FlagResult<Vec<CustomerFeature>> {
        if technical_names.is_empty() {
            return Err(FlagError::invalid("no feature technical names given"));
        }
        if customer_id.trim().is_empty() {
            return Err(FlagError::invalid("customer id must not be blank"));
        }

        let req = FeatureRequestEnvelope {
            feature_request: FeatureRequest {
                customer_id,
                features: technical_names
                    .iter()
                    .map(|name| RequestedFeature { name })
                    .collect(),
            },
        };
        let resp = self
            .send_json(
                reqwest::Method::POST,
                self.url(&["features", "request"]),
                &req,
            )
            .await?;
        let resp = ensure_success(resp, customer_id).await?;
        let body: Option<CustomerFeaturesResponse> = read_json(resp).await?;
        Ok(body.map(|b| b.features).unwrap_or_default())
    }
}

// ── Request / response records ────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddCustomersRequest<'a> {
    customer_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureRequestEnvelope<'a> {
    feature_request: FeatureRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureRequest<'a> {
    customer_id: &'a str,
    features: Vec<RequestedFeature<'a>>,
}

#[derive(Serialize)]
struct RequestedFeature<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct CustomerFeaturesResponse {
    #[serde(default)]
    features: Vec<CustomerFeature>,
}

// ── Response handling ─────────────────────────────────────────

fn transport_error(e: reqwest::Error) -> FlagError {
    tracing::warn!("flag store unreachable: {}", e);
    FlagError::from(e)
}

/// Map a non-2xx response onto the error taxonomy. `subject` names the flag
/// (or customer) the request was about.
async fn ensure_success(resp: Response, subject: &str) -> FlagResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let err = match status {
        StatusCode::NOT_FOUND => FlagError::NotFound(subject.to_string()),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            FlagError::Conflict(subject.to_string())
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            FlagError::ValidationRejected(store_message(&body))
        }
        _ => FlagError::Unexpected {
            status: status.as_u16(),
            body,
        },
    };
    Err(err)
}

/// Decode a JSON body. An empty body (201/204 acknowledgements) reads as `None`.
async fn read_json<T: serde::de::DeserializeOwned>(resp: Response) -> FlagResult<Option<T>> {
    let status = resp.status();
    let body = resp.text().await.map_err(transport_error)?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| FlagError::Unexpected {
            status: status.as_u16(),
            body: format!("{}: {}", e, body.chars().take(200).collect::<String>()),
        })
}

/// Pull a human-readable message out of a store error body.
/// Accepts `{"error": "..."}`, `{"error": {"message": "..."}}`,
/// `{"message": "..."}`, or plain text.
fn store_message(body: &str) -> String {
    let fallback = || body.trim().to_string();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return fallback();
    };
    let found = value
        .get("error")
        .and_then(|e| e.as_str().or_else(|| e.get("message").and_then(|m| m.as_str())))
        .or_else(|| value.get("message").and_then(|m| m.as_str()));
    found.map(str::to_string).unwrap_or_else(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(base: &str) -> HttpFlagRepository {
        HttpFlagRepository::with_client(Url::parse(base).unwrap(), Client::new()).unwrap()
    }

    #[test]
    fn test_url_joins_segments_under_api_root() {
        let r = repo("http://flags.local:8080/api/v1");
        assert_eq!(
            r.url(&["features"]).as_str(),
            "http://flags.local:8080/api/v1/features"
        );

        let r = repo("http://flags.local:8080/api/v1/");
        assert_eq!(
            r.url(&["features", "abc", "customers"]).as_str(),
            "http://flags.local:8080/api/v1/features/abc/customers"
        );
    }

    #[test]
    fn test_rejects_non_base_url() {
        let res = HttpFlagRepository::with_client(
            Url::parse("mailto:ops@example.com").unwrap(),
            Client::new(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_store_message_shapes() {
        assert_eq!(
            store_message(r#"{"error":"'technicalName' must be at least 5 characters long"}"#),
            "'technicalName' must be at least 5 characters long"
        );
        assert_eq!(store_message(r#"{"error":{"message":"bad"}}"#), "bad");
        assert_eq!(store_message(r#"{"message":"nope"}"#), "nope");
        assert_eq!(store_message("plain failure\n"), "plain failure");
    }
}
