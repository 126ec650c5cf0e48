//! HTTP client for the blockchain indexing API (position event history).

use super::{DataSourceError, EventHistorySource};
use crate::domain::{NftId, RawEvent};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Event-history source backed by the indexer's REST API.
///
/// `GET {base_url}/positions/{chain_id}/{nft_id}/events?fromBlock=&toBlock=`
/// returns a JSON array of raw events.
#[derive(Debug, Clone)]
pub struct IndexerEventSource {
    client: Client,
    base_url: String,
}

impl IndexerEventSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn events_url(&self, chain_id: u64, nft_id: &NftId) -> String {
        format!(
            "{}/positions/{}/{}/events",
            self.base_url,
            chain_id,
            nft_id.as_str()
        )
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, DataSourceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl EventHistorySource for IndexerEventSource {
    async fn fetch_events(
        &self,
        chain_id: u64,
        nft_id: &NftId,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<RawEvent>, DataSourceError> {
        debug!(
            "Fetching events for chain={}, nft={}, from_block={:?}, to_block={:?}",
            chain_id, nft_id, from_block, to_block
        );

        let mut query = Vec::new();
        if let Some(from) = from_block {
            query.push(("fromBlock", from.to_string()));
        }
        if let Some(to) = to_block {
            query.push(("toBlock", to.to_string()));
        }

        let url = self.events_url(chain_id, nft_id);
        let response = self.get_json(&url, &query).await?;
        parse_events(response, chain_id, nft_id)
    }
}

/// Parse the indexer response. A malformed event fails the whole fetch: a
/// silently skipped event would corrupt every running total after it.
pub fn parse_events(
    response: serde_json::Value,
    chain_id: u64,
    nft_id: &NftId,
) -> Result<Vec<RawEvent>, DataSourceError> {
    let events_json = match response {
        serde_json::Value::Array(items) => items,
        _ => {
            return Err(DataSourceError::ParseError(
                "Expected array response".to_string(),
            ))
        }
    };

    let mut events = Vec::with_capacity(events_json.len());
    for event_json in events_json {
        let event: RawEvent = serde_json::from_value(event_json)
            .map_err(|e| DataSourceError::ParseError(format!("Invalid event: {}", e)))?;
        if event.chain_id != chain_id || &event.token_id != nft_id {
            warn!(
                "Dropping event {} for chain={} nft={} returned for chain={} nft={}",
                event.transaction_hash, event.chain_id, event.token_id, chain_id, nft_id
            );
            continue;
        }
        events.push(event);
    }

    Ok(events)
}
