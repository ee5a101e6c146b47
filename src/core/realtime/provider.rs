//! HTTP client for the AI voice provider's management API.
//!
//! Two resource families: assistants (per-company configuration living on
//! the provider side) and realtime calls (one per phone call, yielding the
//! websocket URLs the session leg connects to).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{RealtimeError, RealtimeResult};

/// Provider endpoint + credentials, loaded from configuration.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Management API base, e.g. `https://api.provider.example/v1`
    pub base_url: String,
    pub api_key: String,
}

/// Remote assistant resource.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantResource {
    pub id: String,
    pub name: String,
}

/// Assistant configuration sent on create/update.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantSpec {
    pub name: String,
    pub instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub tools: Vec<Value>,
}

/// Audio transport requested for a realtime call.
#[derive(Debug, Clone, Serialize)]
pub struct CallTransport {
    pub encoding: &'static str,
    pub sample_rate: u32,
}

impl CallTransport {
    /// Carrier-leg native format: G.711 mu-law at 8 kHz.
    pub fn mulaw_8k() -> Self {
        Self {
            encoding: "mulaw",
            sample_rate: 8000,
        }
    }
}

/// Realtime call resource returned by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeCallResource {
    pub id: String,
    /// Primary websocket URL
    #[serde(rename = "joinUrl", default)]
    pub join_url: Option<String>,
    /// Fallback websocket URLs, attempted in order after the primary
    #[serde(rename = "alternateUrls", default)]
    pub alternate_urls: Vec<String>,
}

impl RealtimeCallResource {
    /// All candidate connection URLs in preference order, deduplicated.
    pub fn candidate_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(1 + self.alternate_urls.len());
        if let Some(primary) = &self.join_url {
            urls.push(primary.clone());
        }
        for alt in &self.alternate_urls {
            if !urls.contains(alt) {
                urls.push(alt.clone());
            }
        }
        urls
    }
}

/// Thin reqwest wrapper over the provider's management endpoints.
pub struct ProviderClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl ProviderClient {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// Update an existing assistant in place.
    pub async fn update_assistant(
        &self,
        assistant_id: &str,
        spec: &AssistantSpec,
    ) -> RealtimeResult<AssistantResource> {
        let response = self
            .http
            .patch(self.url(&format!("/assistants/{assistant_id}")))
            .bearer_auth(&self.settings.api_key)
            .json(spec)
            .send()
            .await
            .map_err(|e| RealtimeError::ProviderRequest(e.to_string()))?;

        Self::parse(response, "assistant update").await
    }

    /// Look an assistant up by its exact name. `Ok(None)` when absent.
    pub async fn find_assistant_by_name(
        &self,
        name: &str,
    ) -> RealtimeResult<Option<AssistantResource>> {
        let response = self
            .http
            .get(self.url("/assistants"))
            .query(&[("name", name)])
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .map_err(|e| RealtimeError::ProviderRequest(e.to_string()))?;

        let listing: Vec<AssistantResource> = Self::parse(response, "assistant listing").await?;
        Ok(listing.into_iter().find(|a| a.name == name))
    }

    /// Create a new assistant resource.
    pub async fn create_assistant(&self, spec: &AssistantSpec) -> RealtimeResult<AssistantResource> {
        let response = self
            .http
            .post(self.url("/assistants"))
            .bearer_auth(&self.settings.api_key)
            .json(spec)
            .send()
            .await
            .map_err(|e| RealtimeError::ProviderRequest(e.to_string()))?;

        Self::parse(response, "assistant creation").await
    }

    /// Request a realtime call resource for the given assistant.
    pub async fn create_realtime_call(
        &self,
        assistant_id: &str,
        transport: CallTransport,
    ) -> RealtimeResult<RealtimeCallResource> {
        let body = json!({
            "assistantId": assistant_id,
            "transport": transport,
        });

        let response = self
            .http
            .post(self.url("/calls"))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RealtimeError::ProviderRequest(e.to_string()))?;

        Self::parse(response, "realtime call creation").await
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> RealtimeResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RealtimeError::ProviderRequest(format!(
                "{context} failed with {status}: {body}"
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RealtimeError::MalformedResponse(format!("{context}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_urls_dedupe_and_order() {
        let call = RealtimeCallResource {
            id: "rc_1".into(),
            join_url: Some("wss://a.example/ws".into()),
            alternate_urls: vec![
                "wss://b.example/ws".into(),
                "wss://a.example/ws".into(),
                "wss://c.example/ws".into(),
            ],
        };
        assert_eq!(
            call.candidate_urls(),
            vec![
                "wss://a.example/ws".to_string(),
                "wss://b.example/ws".to_string(),
                "wss://c.example/ws".to_string()
            ]
        );
    }

    #[test]
    fn test_candidate_urls_empty_resource() {
        let call = RealtimeCallResource {
            id: "rc_2".into(),
            join_url: None,
            alternate_urls: vec![],
        };
        assert!(call.candidate_urls().is_empty());
    }

    #[test]
    fn test_transport_defaults() {
        let transport = CallTransport::mulaw_8k();
        assert_eq!(transport.encoding, "mulaw");
        assert_eq!(transport.sample_rate, 8000);
    }

    #[test]
    fn test_call_resource_deserializes_wire_names() {
        let call: RealtimeCallResource = serde_json::from_value(serde_json::json!({
            "id": "rc_3",
            "joinUrl": "wss://x.example/ws",
            "alternateUrls": ["wss://y.example/ws"],
        }))
        .unwrap();
        assert_eq!(call.join_url.as_deref(), Some("wss://x.example/ws"));
        assert_eq!(call.alternate_urls.len(), 1);
    }
}
