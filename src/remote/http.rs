//! HTTP binding for the remote service
//!
//! Thin `reqwest` implementation of [`RemoteClient`] against the service's
//! REST surface. Authentication is a pre-issued bearer token supplied by the
//! caller; retry machinery beyond long-running-operation polling lives
//! outside this crate.

use super::{
    CollectionSummary, ItemDefinition, ItemSummary, OperationPoll, OperationStatus, Page,
    RemoteClient, RemoteFault, Submitted,
};
use crate::error::OverlayError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, LOCATION, RETRY_AFTER};
use reqwest::{Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

/// Remote client over HTTP.
pub struct HttpRemoteClient {
    base: Url,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateItemBody<'a> {
    display_name: &'a str,
    #[serde(rename = "type")]
    item_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    definition: Option<&'a ItemDefinition>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMetadataBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize, Deserialize)]
struct DefinitionEnvelope {
    definition: ItemDefinition,
}

#[derive(Deserialize)]
struct OperationBody {
    status: OperationStatus,
    #[serde(default)]
    error: Option<RemoteFault>,
}

impl HttpRemoteClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, OverlayError> {
        let base = Url::parse(base_url)
            .map_err(|e| OverlayError::Config(format!("invalid remote base URL: {}", e)))?;
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| OverlayError::Config(format!("invalid bearer token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self { base, client })
    }

    fn url(&self, path: &str) -> Result<Url, OverlayError> {
        self.base
            .join(path)
            .map_err(|e| OverlayError::Config(format!("invalid remote path {}: {}", path, e)))
    }

    /// Map a non-success response to an overlay error, carrying the remote's
    /// message and raw body through verbatim.
    async fn fail(resp: Response) -> OverlayError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return OverlayError::NotFound(body);
        }
        match serde_json::from_str::<RemoteFault>(&body) {
            Ok(fault) => OverlayError::Remote {
                message: fault.message,
                detail: Some(body),
            },
            Err(_) => OverlayError::Remote {
                message: format!("HTTP {}", status),
                detail: if body.is_empty() { None } else { Some(body) },
            },
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, OverlayError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        Ok(resp.json().await?)
    }
}

fn location_of(resp: &Response) -> Option<String> {
    resp.headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn list_collections(
        &self,
        continuation: Option<&str>,
    ) -> Result<Page<CollectionSummary>, OverlayError> {
        let mut url = self.url("collections")?;
        if let Some(token) = continuation {
            url.query_pairs_mut().append_pair("continuationToken", token);
        }
        self.get_json(url).await
    }

    async fn get_collection(&self, id: &str) -> Result<CollectionSummary, OverlayError> {
        let url = self.url(&format!("collections/{}", id))?;
        self.get_json(url).await
    }

    async fn list_items(
        &self,
        collection_id: &str,
        item_type: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<Page<ItemSummary>, OverlayError> {
        let mut url = self.url(&format!("collections/{}/items", collection_id))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(item_type) = item_type {
                pairs.append_pair("type", item_type);
            }
            if let Some(token) = continuation {
                pairs.append_pair("continuationToken", token);
            }
        }
        self.get_json(url).await
    }

    async fn get_item(
        &self,
        collection_id: &str,
        item_id: &str,
    ) -> Result<ItemSummary, OverlayError> {
        let url = self.url(&format!("collections/{}/items/{}", collection_id, item_id))?;
        self.get_json(url).await
    }

    async fn get_item_definition(
        &self,
        collection_id: &str,
        item_id: &str,
        format: Option<&str>,
    ) -> Result<ItemDefinition, OverlayError> {
        let mut url = self.url(&format!(
            "collections/{}/items/{}/getDefinition",
            collection_id, item_id
        ))?;
        if let Some(format) = format {
            url.query_pairs_mut().append_pair("format", format);
        }
        let resp = self.client.post(url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        let envelope: DefinitionEnvelope = resp.json().await?;
        Ok(envelope.definition)
    }

    async fn update_item_definition(
        &self,
        collection_id: &str,
        item_id: &str,
        definition: &ItemDefinition,
    ) -> Result<Submitted<()>, OverlayError> {
        let url = self.url(&format!(
            "collections/{}/items/{}/updateDefinition",
            collection_id, item_id
        ))?;
        let resp = self
            .client
            .post(url)
            .json(&DefinitionEnvelope {
                definition: definition.clone(),
            })
            .send()
            .await?;
        if resp.status() == StatusCode::ACCEPTED {
            let location = location_of(&resp).ok_or_else(|| {
                OverlayError::remote("accepted response without operation location", None)
            })?;
            return Ok(Submitted::Pending { location });
        }
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        Ok(Submitted::Complete(()))
    }

    async fn create_item(
        &self,
        collection_id: &str,
        display_name: &str,
        item_type: &str,
        definition: Option<&ItemDefinition>,
    ) -> Result<Submitted<ItemSummary>, OverlayError> {
        let url = self.url(&format!("collections/{}/items", collection_id))?;
        let resp = self
            .client
            .post(url)
            .json(&CreateItemBody {
                display_name,
                item_type,
                definition,
            })
            .send()
            .await?;
        if resp.status() == StatusCode::ACCEPTED {
            let location = location_of(&resp).ok_or_else(|| {
                OverlayError::remote("accepted response without operation location", None)
            })?;
            return Ok(Submitted::Pending { location });
        }
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        Ok(Submitted::Complete(resp.json().await?))
    }

    async fn update_item_metadata(
        &self,
        collection_id: &str,
        item_id: &str,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), OverlayError> {
        let url = self.url(&format!("collections/{}/items/{}", collection_id, item_id))?;
        let resp = self
            .client
            .patch(url)
            .json(&UpdateMetadataBody {
                display_name,
                description,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        Ok(())
    }

    async fn delete_item(&self, collection_id: &str, item_id: &str) -> Result<(), OverlayError> {
        let url = self.url(&format!("collections/{}/items/{}", collection_id, item_id))?;
        let resp = self.client.delete(url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        Ok(())
    }

    async fn poll_operation(&self, location: &str) -> Result<OperationPoll, OverlayError> {
        let url = Url::parse(location)
            .map_err(|e| OverlayError::Config(format!("invalid operation location: {}", e)))?;
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        let next_location = location_of(&resp);
        let retry_after_secs = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body: OperationBody = resp.json().await?;
        Ok(OperationPoll {
            status: body.status,
            location: next_location,
            retry_after_secs,
            error: body.error,
        })
    }

    async fn operation_result(&self, location: &str) -> Result<ItemSummary, OverlayError> {
        let url = Url::parse(location)
            .map_err(|e| OverlayError::Config(format!("invalid operation location: {}", e)))?;
        self.get_json(url).await
    }
}
