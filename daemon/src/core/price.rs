// CoinMarketCap price client with a TTL cache.
//
// One quote per chain slug; a stale cache entry is refreshed in place
// and failures fall back to the last known quote.

use std::collections::HashMap;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use vigil_common::time::{get_current_time_in_millis, TimestampMillis};

const QUOTES_URL: &str = "https://pro-api.coinmarketcap.com/v2/cryptocurrency/quotes/latest";
const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub slug: String,
    pub symbol: String,
    pub currency: String,
    pub price: f64,
    pub last_updated: TimestampMillis,
}

pub struct PriceCache {
    client: Client,
    token: Option<String>,
    currency: String,
    ttl: TimestampMillis,
    cache: RwLock<HashMap<String, PriceQuote>>,
}

impl PriceCache {
    pub fn new(client: Client, token: Option<String>, currency: &str, ttl: TimestampMillis) -> Self {
        Self {
            client,
            token,
            currency: currency.to_string(),
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn quote(&self, slug: &str) -> Option<PriceQuote> {
        let now = get_current_time_in_millis();
        {
            let cache = self.cache.read().await;
            if let Some(quote) = cache.get(slug) {
                if now.saturating_sub(quote.last_updated) < self.ttl {
                    return Some(quote.clone());
                }
            }
        }

        match self.fetch(slug, now).await {
            Ok(quote) => {
                self.cache
                    .write()
                    .await
                    .insert(slug.to_string(), quote.clone());
                Some(quote)
            }
            Err(e) => {
                warn!("price lookup for '{}' failed: {:#}", slug, e);
                // a stale quote beats none at all
                self.cache.read().await.get(slug).cloned()
            }
        }
    }

    async fn fetch(&self, slug: &str, now: TimestampMillis) -> anyhow::Result<PriceQuote> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no CoinMarketCap token configured"))?;

        let body: Value = self
            .client
            .get(QUOTES_URL)
            .header(API_KEY_HEADER, token)
            .query(&[("slug", slug), ("convert", self.currency.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_quote(&body, slug, &self.currency, now)
            .ok_or_else(|| anyhow::anyhow!("unexpected quote response for '{}'", slug))
    }
}

// The v2 response keys entries by numeric CMC id, so find ours by slug
fn parse_quote(
    body: &Value,
    slug: &str,
    currency: &str,
    now: TimestampMillis,
) -> Option<PriceQuote> {
    let data = body.get("data")?.as_object()?;
    let entry = data
        .values()
        .find(|entry| entry.get("slug").and_then(Value::as_str) == Some(slug))?;
    let price = entry
        .get("quote")?
        .get(currency)?
        .get("price")?
        .as_f64()?;
    Some(PriceQuote {
        slug: slug.to_string(),
        symbol: entry
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        currency: currency.to_string(),
        price,
        last_updated: now,
    })
}
