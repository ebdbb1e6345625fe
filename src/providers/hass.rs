//! Home Assistant REST API client -- the production live-state and history
//! sources.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use super::{EntityState, HistorySource, LiveStateSource, ProviderError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HassClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HassClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }
}

#[async_trait]
impl LiveStateSource for HassClient {
    async fn state(&self, entity_id: &str) -> Result<Option<EntityState>, ProviderError> {
        let response = self.get(&format!("/api/states/{entity_id}")).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let state: EntityState = response.json().await?;
        Ok(Some(state))
    }

    async fn all_states(&self) -> Result<Vec<EntityState>, ProviderError> {
        let response = self.get("/api/states").send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let states: Vec<EntityState> = response.json().await?;
        debug!(count = states.len(), "fetched entity registry snapshot");
        Ok(states)
    }
}

#[async_trait]
impl HistorySource for HassClient {
    async fn history(
        &self,
        entity_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<String>>, ProviderError> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let start_iso = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end_iso = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let response = self
            .get(&format!("/api/history/period/{start_iso}"))
            .query(&[
                ("end_time", end_iso.as_str()),
                ("filter_entity_id", &entity_ids.join(",")),
                ("minimal_response", ""),
                ("no_attributes", ""),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        // The recorder answers with one list per entity; with
        // minimal_response only the first element carries the entity_id.
        let series: Vec<Vec<Value>> = response.json().await?;
        let mut histories = HashMap::new();
        for entity_series in series {
            let Some(entity_id) = entity_series
                .first()
                .and_then(|s| s.get("entity_id"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let values: Vec<String> = entity_series
                .iter()
                .filter_map(|s| s.get("state").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            histories.insert(entity_id.to_string(), values);
        }

        debug!(
            requested = entity_ids.len(),
            returned = histories.len(),
            "fetched history batch"
        );
        Ok(histories)
    }
}
