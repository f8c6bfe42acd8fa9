//! Edge-cache purging.
//!
//! Purges CDN-cached responses by tag through a Cloudflare-style
//! `POST {api_base}/zones/{zone_id}/purge_cache` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::EdgeSettings;

use super::error::InfraError;

/// Tags accepted by one purge request.
const MAX_TAGS_PER_REQUEST: usize = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("edge purge request failed: {0}")]
    Request(String),
    #[error("edge purge rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[async_trait]
pub trait EdgePurger: Send + Sync {
    async fn purge_tags(&self, tags: &[String]) -> Result<(), EdgeError>;

    async fn purge_everything(&self) -> Result<(), EdgeError>;
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
enum PurgeBody<'a> {
    Tags { tags: &'a [String] },
    Everything { purge_everything: bool },
}

#[derive(Debug, Clone)]
pub struct CloudflarePurger {
    client: Client,
    endpoint: Url,
    api_token: String,
}

impl CloudflarePurger {
    /// Build a purger when both zone and token are configured.
    pub fn from_settings(settings: &EdgeSettings) -> Result<Option<Self>, InfraError> {
        let (Some(zone_id), Some(api_token)) =
            (settings.zone_id.as_deref(), settings.api_token.as_deref())
        else {
            return Ok(None);
        };

        let endpoint = purge_endpoint(&settings.api_base, zone_id)?;
        let client = Client::builder()
            .user_agent(concat!("dashcache/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| InfraError::configuration(format!("edge http client: {err}")))?;

        info!(endpoint = %endpoint, "Edge cache purging enabled");
        Ok(Some(Self {
            client,
            endpoint,
            api_token: api_token.to_string(),
        }))
    }

    async fn send(&self, body: &PurgeBody<'_>) -> Result<(), EdgeError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
            .map_err(|err| EdgeError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EdgeError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EdgePurger for CloudflarePurger {
    async fn purge_tags(&self, tags: &[String]) -> Result<(), EdgeError> {
        for chunk in tags.chunks(MAX_TAGS_PER_REQUEST) {
            self.send(&PurgeBody::Tags { tags: chunk }).await?;
            debug!(tags = ?chunk, "Edge tags purged");
        }
        Ok(())
    }

    async fn purge_everything(&self) -> Result<(), EdgeError> {
        self.send(&PurgeBody::Everything {
            purge_everything: true,
        })
        .await?;
        info!("Edge zone purged");
        Ok(())
    }
}

fn purge_endpoint(api_base: &str, zone_id: &str) -> Result<Url, InfraError> {
    let base = api_base.trim_end_matches('/');
    Url::parse(&format!("{base}/zones/{zone_id}/purge_cache")).map_err(|err| {
        InfraError::configuration(format!("invalid edge.api_base `{api_base}`: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(zone_id: Option<&str>, api_token: Option<&str>) -> EdgeSettings {
        EdgeSettings {
            zone_id: zone_id.map(str::to_string),
            api_token: api_token.map(str::to_string),
            api_base: "https://api.cloudflare.com/client/v4/".to_string(),
        }
    }

    #[test]
    fn purger_requires_zone_and_token() {
        for (zone, token) in [(None, Some("t")), (Some("z"), None)] {
            let purger = CloudflarePurger::from_settings(&settings(zone, token)).unwrap();
            assert!(purger.is_none());
        }

        let purger = CloudflarePurger::from_settings(&settings(Some("zone-1"), Some("t")))
            .unwrap()
            .unwrap();
        assert_eq!(
            purger.endpoint.as_str(),
            "https://api.cloudflare.com/client/v4/zones/zone-1/purge_cache"
        );
    }

    #[test]
    fn purge_bodies_match_api_shape() {
        let tags = vec!["entity:1".to_string(), "run:2".to_string()];
        assert_eq!(
            serde_json::to_value(PurgeBody::Tags { tags: &tags }).unwrap(),
            json!({"tags": ["entity:1", "run:2"]})
        );
        assert_eq!(
            serde_json::to_value(PurgeBody::Everything {
                purge_everything: true
            })
            .unwrap(),
            json!({"purge_everything": true})
        );
    }

    #[test]
    fn invalid_api_base_is_a_configuration_error() {
        let mut bad = settings(Some("z"), Some("t"));
        bad.api_base = "not a url".into();
        assert!(CloudflarePurger::from_settings(&bad).is_err());
    }
}
