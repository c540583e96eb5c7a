/**
 * HTTP Document Service Client
 *
 * `RemoteService` over a REST document API:
 *
 * - `PUT    /collections/{collection}/documents/{id}`  create (upsert)
 * - `PATCH  /collections/{collection}/documents/{id}`  update
 * - `DELETE /collections/{collection}/documents/{id}`  delete (404 counts as done)
 * - `GET    /collections/{collection}/documents?field=value`  query
 *
 * Live subscriptions poll `query` and emit when the result set changes.
 */

use crate::client::config::Config;
use crate::client::remote::{ChangeCallback, ErrorCallback, Filter, RemoteService};
use crate::client::subscription::Subscription;
use crate::shared::entity::Document;
use crate::shared::error::RemoteError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Error body the service returns on failure
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// REST client for the remote document service
#[derive(Debug, Clone)]
pub struct HttpRemote {
    config: Config,
    client: Client,
    poll_interval: Duration,
}

impl HttpRemote {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: Client::new(),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Interval between polls of a live subscription
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        self.config.api_url(&format!("/collections/{collection}/documents/{id}"))
    }

    fn collection_url(&self, collection: &str) -> String {
        self.config.api_url(&format!("/collections/{collection}/documents"))
    }

    async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(status_error(response).await)
    }

    async fn fetch(client: &Client, url: &str, filters: &[Filter]) -> Result<Vec<Document>, RemoteError> {
        let params: Vec<(String, String)> = filters
            .iter()
            .map(|f| (f.field.clone(), query_value(&f.value)))
            .collect();

        let response = Self::send(client.get(url).query(&params)).await?;
        response
            .json::<Vec<Document>>()
            .await
            .map_err(|e| RemoteError::new(format!("malformed query response: {e}")))
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    let remote = RemoteError::new(format!("network error: {error}"));
    if error.is_connect() || error.is_timeout() {
        remote.with_code("network-error")
    } else {
        remote
    }
}

async fn status_error(response: Response) -> RemoteError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.message),
        Err(_) => (None, None),
    };
    let message = message.unwrap_or_else(|| {
        if text.is_empty() {
            status.to_string()
        } else {
            format!("{status} - {text}")
        }
    });

    let mut error = RemoteError::new(message).with_status(status.as_u16());
    error.code = code;
    error
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn create(&self, collection: &str, id: &str, payload: &Document) -> Result<(), RemoteError> {
        Self::send(self.client.put(self.document_url(collection, id)).json(payload)).await?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, payload: &Document) -> Result<(), RemoteError> {
        Self::send(self.client.patch(self.document_url(collection, id)).json(payload)).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        match Self::send(self.client.delete(self.document_url(collection, id))).await {
            Ok(_) => Ok(()),
            Err(e) if e.status == Some(StatusCode::NOT_FOUND.as_u16()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, RemoteError> {
        Self::fetch(&self.client, &self.collection_url(collection), filters).await
    }

    fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Subscription {
        let client = self.client.clone();
        let url = self.collection_url(collection);
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut last: Option<Vec<Document>> = None;
            let mut interval = tokio::time::interval(poll_interval);

            loop {
                interval.tick().await;
                match Self::fetch(&client, &url, &filters).await {
                    Ok(documents) => {
                        if last.as_ref() != Some(&documents) {
                            last = Some(documents.clone());
                            on_change(documents);
                        }
                    }
                    Err(error) => {
                        tracing::debug!(url = %url, error = %error, "Subscription poll failed");
                        on_error(error);
                    }
                }
            }
        });

        Subscription::new(move || handle.abort())
    }
}
