//! Linode v4 REST client implementing the collaborator traits.

use crate::config::ApiConfig;
use crate::models::PricingEntry;
use crate::source::{EventPage, EventSource, PricingSource, RawEvent, ResourceMetadata};
use crate::timestamp_parser::TimestampParser;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

const MIN_PAGE_SIZE: u32 = 25;
const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    data: Vec<T>,
    page: u32,
    pages: u32,
}

#[derive(Debug, Deserialize)]
struct TypePrice {
    hourly: f64,
    monthly: f64,
}

#[derive(Debug, Deserialize)]
struct LinodeType {
    id: String,
    price: TypePrice,
}

impl From<LinodeType> for PricingEntry {
    fn from(t: LinodeType) -> Self {
        PricingEntry::new(t.id, t.price.hourly, t.price.monthly)
    }
}

#[derive(Debug, Deserialize)]
struct Instance {
    #[serde(rename = "type")]
    rate_class: Option<String>,
}

pub struct LinodeApi {
    client: Client,
    base_url: String,
    token: String,
    max_retries: u32,
    storage_base_fee: f64,
}

impl LinodeApi {
    pub fn new(config: &ApiConfig, storage_base_fee: f64) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .context("Linode API token is not configured (set LINODE_TOKEN)")?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            max_retries: config.max_retries,
            storage_base_fee,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    /// Send, retrying transport failures up to `max_retries` times.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Linode API request failed, retrying");
                }
                Err(e) => return Err(e).context("Linode API request failed"),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Option<T>> {
        let response = self.send(build).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "Linode API returned 404");
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("Linode API error for {}", path))?;
        let body = response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse Linode API response for {}", path))?;
        Ok(Some(body))
    }
}

/// `X-Filter` header value selecting events created at or after `since`.
fn created_filter(since: DateTime<Utc>) -> String {
    serde_json::json!({
        "created": { "+gte": TimestampParser::format_filter(since) },
        "+order_by": "created",
        "+order": "desc",
    })
    .to_string()
}

fn clamp_page_size(page_size: u32) -> u32 {
    page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

#[async_trait]
impl EventSource for LinodeApi {
    async fn fetch_events(
        &self,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<EventPage> {
        let query = [("page", page), ("page_size", clamp_page_size(page_size))];
        let filter = since.map(created_filter);
        let body: Option<Paginated<RawEvent>> = self
            .get_json("/account/events", || {
                let request = self.get("/account/events").query(&query);
                match &filter {
                    Some(filter) => request.header("X-Filter", filter.as_str()),
                    None => request,
                }
            })
            .await?;

        let body = body.context("Linode events endpoint not found")?;
        Ok(EventPage {
            events: body.data,
            page: body.page,
            total_pages: body.pages,
        })
    }
}

#[async_trait]
impl PricingSource for LinodeApi {
    async fn fetch_rates(&self) -> Result<Vec<PricingEntry>> {
        let mut rates = Vec::new();
        let mut page = 1;
        loop {
            let query = [("page", page), ("page_size", MAX_PAGE_SIZE)];
            let body: Paginated<LinodeType> = self
                .get_json("/linode/types", || self.get("/linode/types").query(&query))
                .await?
                .context("Linode types endpoint not found")?;
            let pages = body.pages;
            rates.extend(body.data.into_iter().map(PricingEntry::from));
            if page >= pages {
                break;
            }
            page += 1;
        }
        info!(rate_classes = rates.len(), "Fetched Linode instance types");
        Ok(rates)
    }

    async fn get_rate(&self, rate_class_id: &str) -> Result<Option<PricingEntry>> {
        let path = format!("/linode/types/{}", rate_class_id);
        let found: Option<LinodeType> = self.get_json(&path, || self.get(&path)).await?;
        Ok(found.map(PricingEntry::from))
    }

    async fn storage_base_fee(&self) -> Result<f64> {
        Ok(self.storage_base_fee)
    }
}

#[async_trait]
impl ResourceMetadata for LinodeApi {
    async fn current_rate_class(&self, resource_id: u64) -> Result<Option<String>> {
        let path = format!("/linode/instances/{}", resource_id);
        let instance: Option<Instance> = self.get_json(&path, || self.get(&path)).await?;
        Ok(instance.and_then(|i| i.rate_class))
    }
}
