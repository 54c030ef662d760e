use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::model::{Policy, Secret};
use crate::replication::{ReplicationError, ReplicationSource, Versioned};

#[derive(Clone, Debug)]
pub struct HttpReplicationConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpReplicationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            token: None,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Pulls secrets and policies from a remote primary over HTTP+JSON.
pub struct HttpReplicationClient {
    client: Client,
    config: HttpReplicationConfig,
}

impl HttpReplicationClient {
    pub fn new(config: HttpReplicationConfig) -> Result<Self, ReplicationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ReplicationError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, ReplicationError> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(map_reqwest_err)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ReplicationError::Transport(format!(
                "{} returned {}",
                path, status
            )));
        }
        let body = response.bytes().await.map_err(map_reqwest_err)?;
        serde_json::from_slice(&body).map_err(|err| ReplicationError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl ReplicationSource for HttpReplicationClient {
    async fn list_secrets(&self) -> Result<Versioned<Vec<Secret>>, ReplicationError> {
        self.fetch("/v1/replication/secrets").await
    }

    async fn list_policies(&self) -> Result<Versioned<Vec<Policy>>, ReplicationError> {
        self.fetch("/v1/replication/policies").await
    }
}

fn map_reqwest_err(err: reqwest::Error) -> ReplicationError {
    if err.is_timeout() {
        ReplicationError::Timeout
    } else {
        ReplicationError::Transport(err.to_string())
    }
}
