//! External cache tier
//!
//! [`ExternalStore`] abstracts a shared key-value store so several service
//! instances see the same cached listings. [`RestKvStore`] speaks the
//! Upstash-style Redis REST protocol: each command is POSTed as a JSON
//! array and the reply is `{"result": ...}` or `{"error": "..."}`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::types::{AppError, Result};

/// Shared key-value store used as the first cache tier
#[async_trait]
pub trait ExternalStore: Send + Sync {
    /// Short name for logs and stats
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remaining lifetime of `key`, when the store can report it
    async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Redis over HTTP
pub struct RestKvStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
    /// Prepended to every key so the store can be shared between apps
    namespace: String,
}

impl RestKvStore {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build cache client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            namespace: "roadwise:".to_string(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Run one Redis command
    async fn command(&self, args: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Cache store unreachable: {}", e)))?;

        let status = response.status();
        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Cache store reply unreadable: {}", e)))?;

        if let Some(error) = reply.error {
            return Err(AppError::Internal(format!("Cache store error: {}", error)));
        }
        if !status.is_success() {
            return Err(AppError::Internal(format!("Cache store returned {}", status)));
        }
        Ok(reply.result)
    }
}

#[async_trait]
impl ExternalStore for RestKvStore {
    fn name(&self) -> &'static str {
        "redis-rest"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.command(json!(["GET", self.namespaced(key)])).await? {
            Value::String(s) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        // PTTL is -2 for a missing key and -1 for one without expiry
        match self.command(json!(["PTTL", self.namespaced(key)])).await? {
            Value::Number(n) => Ok(n.as_u64().map(Duration::from_millis)),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1);
        self.command(json!(["SET", self.namespaced(key), value, "EX", secs]))
            .await
            .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.command(json!(["DEL", self.namespaced(key)]))
            .await
            .map(|_| ())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}*", self.namespaced(prefix));
        let mut cursor = "0".to_string();
        let mut removed = 0u64;

        loop {
            let reply = self
                .command(json!(["SCAN", cursor, "MATCH", pattern, "COUNT", 100]))
                .await?;

            // SCAN replies with [next_cursor, [keys...]]
            let (next, keys) = match reply {
                Value::Array(mut parts) if parts.len() == 2 => {
                    let keys = parts.pop().unwrap_or_default();
                    let next = parts.pop().unwrap_or_default();
                    (next, keys)
                }
                other => {
                    return Err(AppError::Internal(format!(
                        "Unexpected SCAN reply: {}",
                        other
                    )))
                }
            };

            let keys: Vec<String> = match keys {
                Value::Array(items) => items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };

            if !keys.is_empty() {
                let mut del = vec![Value::from("DEL")];
                del.extend(keys.iter().cloned().map(Value::from));
                if let Value::Number(n) = self.command(Value::Array(del)).await? {
                    removed += n.as_u64().unwrap_or(0);
                }
            }

            cursor = match next {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => "0".to_string(),
            };
            if cursor == "0" {
                break;
            }
        }

        debug!(prefix, removed, "External cache prefix deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> RestKvStore {
        RestKvStore::new(&server.uri(), "test-token").unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_namespaced_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!(["GET", "roadwise:courses:list"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "[1,2]"})))
            .expect(1)
            .mount(&server)
            .await;

        let value = store(&server).await.get("courses:list").await.unwrap();
        assert_eq!(value.as_deref(), Some("[1,2]"));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
            .mount(&server)
            .await;

        assert!(store(&server).await.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_uses_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!(["SET", "roadwise:k", "v", "EX", 300])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .await
            .set("k", "v", Duration::from_secs(300))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ttl_reads_remaining_millis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!(["PTTL", "roadwise:courses:list"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 4500})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!(["PTTL", "roadwise:forever"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": -1})))
            .mount(&server)
            .await;

        let store = store(&server).await;
        assert_eq!(store.ttl("courses:list").await.unwrap(), Some(Duration::from_millis(4500)));
        assert_eq!(store.ttl("forever").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_reply_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "WRONGPASS invalid token"})),
            )
            .mount(&server)
            .await;

        assert!(store(&server).await.get("k").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_prefix_scans_and_deletes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!(["SCAN", "0", "MATCH", "roadwise:courses:*", "COUNT", 100])))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"result": ["0", ["roadwise:courses:list", "roadwise:courses:item:a"]]}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!(["DEL", "roadwise:courses:list", "roadwise:courses:item:a"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 2})))
            .expect(1)
            .mount(&server)
            .await;

        let removed = store(&server).await.delete_prefix("courses:").await.unwrap();
        assert_eq!(removed, 2);
    }
}
