//! CoinGecko price and metadata source.

use async_trait::async_trait;
use chrono::DateTime;
use coincache_core::error::UpstreamError;
use coincache_core::traits::PriceSource;
use coincache_core::types::{CoinProfile, PriceQuote, PriceQuotes};
use reqwest::{header, Client, Response, StatusCode, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// CoinGecko API configuration.
#[derive(Debug, Clone)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Bound on every upstream call
    pub timeout: Duration,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl CoinGeckoConfig {
    /// Create config directly.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            timeout,
        }
    }

    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let base_url = std::env::var("COINGECKO_API_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("COINGECKO_API_KEY").ok().filter(|k| !k.is_empty());

        Self {
            base_url,
            api_key,
            ..Self::default()
        }
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let invalid = || UpstreamError::Configuration(format!("invalid base url `{}`", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// One entry of the `/simple/price` response.
#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<Decimal>,
    usd_market_cap: Option<Decimal>,
    usd_24h_vol: Option<Decimal>,
    usd_24h_change: Option<Decimal>,
    last_updated_at: Option<i64>,
}

/// CoinGecko client.
pub struct CoinGeckoSource {
    config: CoinGeckoConfig,
    client: Client,
}

impl CoinGeckoSource {
    /// Create a new CoinGecko client.
    pub fn new(config: CoinGeckoConfig) -> Result<Self, UpstreamError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            headers.insert(
                API_KEY_HEADER,
                header::HeaderValue::from_str(key)
                    .map_err(|e| UpstreamError::Configuration(e.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Configuration(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, UpstreamError> {
        Self::new(CoinGeckoConfig::from_env())
    }

    fn transport_error(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout(self.config.timeout.as_secs())
        } else {
            UpstreamError::Connection(e.to_string())
        }
    }

    async fn check_status(resp: Response, coin_id: Option<&str>) -> Result<Response, UpstreamError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        Err(match (status, coin_id) {
            (StatusCode::TOO_MANY_REQUESTS, _) => UpstreamError::RateLimited,
            (StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST, Some(id)) => {
                UpstreamError::NotFound(id.to_string())
            }
            _ => UpstreamError::Api(format!("{}: {}", status, text)),
        })
    }
}

/// Convert a `/simple/price` body into quotes.
///
/// Entries without a USD price are dropped, the same as ids upstream omits.
fn parse_simple_prices(body: HashMap<String, SimplePrice>) -> PriceQuotes {
    body.into_iter()
        .filter_map(|(coin_id, p)| {
            let Some(usd) = p.usd else {
                warn!(%coin_id, "Upstream returned no USD price");
                return None;
            };
            let last_updated_at = p.last_updated_at.and_then(|ts| DateTime::from_timestamp(ts, 0));
            Some((
                coin_id,
                PriceQuote {
                    usd,
                    usd_market_cap: p.usd_market_cap,
                    usd_24h_vol: p.usd_24h_vol,
                    usd_24h_change: p.usd_24h_change,
                    last_updated_at,
                },
            ))
        })
        .collect()
}

/// Build a profile from a `/coins/{id}` body.
fn parse_profile(coin_id: &str, body: &Value) -> Result<CoinProfile, UpstreamError> {
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| UpstreamError::Parse(format!("missing `{}` for {}", name, coin_id)))
    };

    let links = body.get("links").cloned().unwrap_or(Value::Null);
    let link = |name: &str| links.get(name).cloned().unwrap_or(Value::Null);
    let link_list = |name: &str| links.get(name).cloned().unwrap_or_else(|| json!([]));

    let metadata = json!({
        "description": body.pointer("/description/en").cloned().unwrap_or(Value::Null),
        "website_url": links.pointer("/homepage/0").cloned().unwrap_or(Value::Null),
        "blockchain": body.get("asset_platform_id").cloned().unwrap_or(Value::Null),
        "smart_contract_address": body.get("contract_address").cloned().unwrap_or(Value::Null),
        "genesis_date": body.get("genesis_date").cloned().unwrap_or(Value::Null),
        "categories": body.get("categories").cloned().unwrap_or_else(|| json!([])),
        "platforms": body.get("platforms").cloned().unwrap_or_else(|| json!({})),
        "links": {
            "homepage": link_list("homepage"),
            "blockchain_site": link_list("blockchain_site"),
            "official_forum_url": link_list("official_forum_url"),
            "chat_url": link_list("chat_url"),
            "announcement_url": link_list("announcement_url"),
            "twitter_screen_name": link("twitter_screen_name"),
            "facebook_username": link("facebook_username"),
            "subreddit_url": link("subreddit_url"),
            "repos_url": links.get("repos_url").cloned().unwrap_or_else(|| json!({})),
        },
    });

    Ok(CoinProfile {
        coin_id: coin_id.to_string(),
        symbol: field("symbol")?,
        name: field("name")?,
        metadata: Some(metadata),
    })
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn batch_price(&self, coin_ids: &[String]) -> Result<PriceQuotes, UpstreamError> {
        if coin_ids.is_empty() {
            return Ok(PriceQuotes::new());
        }

        let ids = coin_ids.join(",");
        let resp = self
            .client
            .get(self.config.url(&["simple", "price"])?)
            .query(&[
                ("ids", ids.as_str()),
                ("vs_currencies", "usd"),
                ("include_market_cap", "true"),
                ("include_24hr_vol", "true"),
                ("include_24hr_change", "true"),
                ("include_last_updated_at", "true"),
                ("precision", "4"),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let resp = Self::check_status(resp, None).await?;
        let body: HashMap<String, SimplePrice> = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let quotes = parse_simple_prices(body);
        debug!(requested = coin_ids.len(), quoted = quotes.len(), "Fetched batch prices");
        Ok(quotes)
    }

    async fn lookup_metadata(&self, coin_id: &str) -> Result<CoinProfile, UpstreamError> {
        let resp = self
            .client
            .get(self.config.url(&["coins", coin_id])?)
            .query(&[
                ("localization", "false"),
                ("tickers", "false"),
                ("market_data", "false"),
                ("community_data", "false"),
                ("developer_data", "false"),
                ("sparkline", "false"),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let resp = Self::check_status(resp, Some(coin_id)).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        parse_profile(coin_id, &body)
    }

    fn name(&self) -> &str {
        "CoinGecko"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_simple_prices() {
        let body: HashMap<String, SimplePrice> = serde_json::from_value(json!({
            "bitcoin": {
                "usd": 67187.3358,
                "usd_market_cap": 1317802988326.25,
                "usd_24h_vol": 31260929299.5248,
                "usd_24h_change": -3.6387,
                "last_updated_at": 1711356300
            },
            "ethereum": {}
        }))
        .unwrap();

        let quotes = parse_simple_prices(body);
        assert_eq!(quotes.len(), 1);

        let btc = &quotes["bitcoin"];
        assert_eq!(btc.usd, dec!(67187.3358));
        assert_eq!(btc.usd_24h_change, Some(dec!(-3.6387)));
        assert_eq!(btc.last_updated_at.unwrap().timestamp(), 1711356300);
    }

    #[test]
    fn test_parse_profile_extracts_metadata() {
        let body = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "asset_platform_id": null,
            "genesis_date": "2009-01-03",
            "categories": ["Cryptocurrency", "Layer 1 (L1)"],
            "description": { "en": "Bitcoin is the first decentralized cryptocurrency." },
            "links": {
                "homepage": ["http://www.bitcoin.org", "", ""],
                "subreddit_url": "https://www.reddit.com/r/Bitcoin/",
                "repos_url": { "github": ["https://github.com/bitcoin/bitcoin"] }
            }
        });

        let profile = parse_profile("bitcoin", &body).unwrap();
        assert_eq!(profile.symbol, "btc");
        assert_eq!(profile.name, "Bitcoin");

        let metadata = profile.metadata.unwrap();
        assert_eq!(metadata["website_url"], "http://www.bitcoin.org");
        assert_eq!(metadata["genesis_date"], "2009-01-03");
        assert_eq!(metadata["categories"][1], "Layer 1 (L1)");
        assert_eq!(metadata["links"]["subreddit_url"], "https://www.reddit.com/r/Bitcoin/");
        assert_eq!(metadata["links"]["chat_url"], json!([]));
        assert!(metadata["blockchain"].is_null());
    }

    #[test]
    fn test_parse_profile_requires_symbol_and_name() {
        let err = parse_profile("mystery", &json!({ "id": "mystery" })).unwrap_err();
        assert!(matches!(err, UpstreamError::Parse(_)));
    }

    #[test]
    fn test_config_url_joins_cleanly() {
        let config = CoinGeckoConfig::new("https://example.test/api/v3/", None, Duration::from_secs(5));
        assert_eq!(
            config.url(&["simple", "price"]).unwrap().as_str(),
            "https://example.test/api/v3/simple/price"
        );
    }

    #[test]
    fn test_coin_id_stays_one_path_segment() {
        let config = CoinGeckoConfig::default();
        let url = config.url(&["coins", "bitcoin?x=1#frag/y"]).unwrap();
        assert_eq!(url.path(), "/api/v3/coins/bitcoin%3Fx=1%23frag%2Fy");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_bad_base_url_is_a_configuration_error() {
        let config = CoinGeckoConfig::new("not a url", None, Duration::from_secs(5));
        let err = config.url(&["simple", "price"]).unwrap_err();
        assert!(matches!(err, UpstreamError::Configuration(_)));
    }

    #[test]
    fn test_client_builds_with_api_key() {
        let config = CoinGeckoConfig {
            api_key: Some("demo-key".into()),
            ..CoinGeckoConfig::default()
        };
        let source = CoinGeckoSource::new(config).unwrap();
        assert_eq!(source.name(), "CoinGecko");
    }
}
