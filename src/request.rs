use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::source::{PageRequest, PageSource};
use crate::{RemoteError, Result};

const DEFAULT_ITEMS_KEY: &str = "results";

/// A JSON API paginated with `limit` and `offset` query parameters.
///
/// Every page is requested as `GET {url}?limit={limit}&offset={offset}` and the
/// items are read from the array under `items_key`. A body that is itself an
/// array is taken as is.
#[derive(Debug, Clone)]
pub struct HttpSource {
    // Client uses Arc so every worker shares one connection pool.
    client: Client,
    url: Url,
    items_key: String,
}

impl HttpSource {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: &str) -> Result<Self> {
        Ok(Self {
            client,
            url: Url::parse(url)?,
            items_key: DEFAULT_ITEMS_KEY.into(),
        })
    }

    pub fn items_key(mut self, key: impl Into<String>) -> Self {
        self.items_key = key.into();
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Requests a page and returns the parsed JSON body.
    async fn request_page_json(
        &self,
        request: PageRequest,
    ) -> core::result::Result<Value, RemoteError> {
        let res = self
            .client
            .get(self.url.clone())
            .query(&[("limit", request.limit), ("offset", request.offset)])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status));
        }

        let body = res.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    fn extract_items(&self, body: Value) -> core::result::Result<Vec<Value>, RemoteError> {
        match body {
            Value::Array(items) => Ok(items),
            Value::Object(mut map) => match map.remove(&self.items_key) {
                Some(Value::Array(items)) => Ok(items),
                Some(other) => Err(RemoteError::Decode(format!(
                    "{:?} is not an array but {}",
                    self.items_key,
                    json_kind(&other)
                ))),
                None => Err(RemoteError::Decode(format!(
                    "the page has no {:?} field",
                    self.items_key
                ))),
            },
            other => Err(RemoteError::Decode(format!(
                "expected an object or array, got {}",
                json_kind(&other)
            ))),
        }
    }
}

#[async_trait]
impl PageSource for HttpSource {
    type Item = Value;

    async fn fetch(&self, request: PageRequest) -> core::result::Result<Vec<Value>, RemoteError> {
        let body = self.request_page_json(request).await?;
        self.extract_items(body)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
