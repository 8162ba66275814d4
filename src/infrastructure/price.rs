use crate::domain::payment::Currency;
use crate::domain::ports::PriceOracle;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;

/// Price oracle backed by a CoinGecko-compatible `simple/price` endpoint.
#[derive(Clone)]
pub struct HttpPriceOracle {
    http: reqwest::Client,
    base_url: String,
    coin_id: String,
}

impl HttpPriceOracle {
    pub fn new(base_url: impl Into<String>, coin_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            coin_id: coin_id.into(),
        })
    }
}

fn extract_rate(body: &Value, coin_id: &str, currency: &str) -> Result<Decimal> {
    let unavailable = || GatewayError::UpstreamUnavailable(format!("no price available for {currency}"));
    let price = body
        .get(coin_id)
        .and_then(|coin| coin.get(currency))
        .and_then(Value::as_f64)
        .ok_or_else(unavailable)?;
    let rate = Decimal::try_from(price).map_err(|_| unavailable())?;
    if rate <= Decimal::ZERO {
        return Err(unavailable());
    }
    Ok(rate)
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn get_rate(&self, currency: &Currency) -> Result<Decimal> {
        let vs = currency.as_str().to_ascii_lowercase();
        let url = format!("{}/simple/price", self.base_url);
        let body: Value = self
            .http
            .get(url)
            .query(&[("ids", self.coin_id.as_str()), ("vs_currencies", vs.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        extract_rate(&body, &self.coin_id, &vs)
    }
}
