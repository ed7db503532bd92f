//! Thin retrying REST client against the exchange public API.
//!
//! 5xx and transport failures retry with exponential backoff (100ms to 1s,
//! three retries); 4xx responses surface the decoded error envelope without
//! retry. Every trader call carries the agent's `X-API-Key`.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    AccountDto, Company, CreateOrderRequest, HoldingDto, OrderDto, SubmitOrderResponse, TradeDto,
};
use crate::services::market::MarketData;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("exchange returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            ClientError::Transport(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    code: String,
    message: String,
}

#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ExchangeClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<F>(&self, build: F) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = build(&self.http)
                .header("X-API-Key", &self.api_key)
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            };
            if retryable && attempt < MAX_RETRIES {
                let backoff = BACKOFF_BASE
                    .saturating_mul(2_u32.saturating_pow(attempt))
                    .min(BACKOFF_CAP);
                tracing::debug!(attempt, ?backoff, "retrying exchange request");
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            let response = result?;
            if response.status().is_success() {
                return Ok(response);
            }
            return Err(Self::decode_error(response).await);
        }
    }

    async fn decode_error(response: reqwest::Response) -> ClientError {
        let status = response.status();
        match response.json::<WireError>().await {
            Ok(wire) => ClientError::Api {
                status: status.as_u16(),
                code: wire.error.code,
                message: wire.error.message,
            },
            Err(_) => ClientError::Api {
                status: status.as_u16(),
                code: if status == StatusCode::TOO_MANY_REQUESTS {
                    "RATE_LIMITED".to_string()
                } else {
                    "INTERNAL_ERROR".to_string()
                },
                message: format!("undecodable error body (status {status})"),
            },
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        let response = self.send(|http| http.get(&url)).await?;
        Ok(response.json().await?)
    }

    // ------------------------------------------------------------------
    // Market data
    // ------------------------------------------------------------------

    pub async fn companies(&self) -> Result<Vec<Company>, ClientError> {
        self.get_json("/companies").await
    }

    pub async fn market_data(&self, ticker: &str) -> Result<MarketData, ClientError> {
        self.get_json(&format!("/market-data/{ticker}")).await
    }

    pub async fn recent_trades(
        &self,
        ticker: &str,
        limit: usize,
    ) -> Result<Vec<TradeDto>, ClientError> {
        self.get_json(&format!("/trades/{ticker}?limit={limit}")).await
    }

    // ------------------------------------------------------------------
    // Trader surface
    // ------------------------------------------------------------------

    pub async fn account(&self) -> Result<AccountDto, ClientError> {
        self.get_json("/account").await
    }

    pub async fn holdings(&self) -> Result<Vec<HoldingDto>, ClientError> {
        self.get_json("/holdings").await
    }

    pub async fn orders(&self) -> Result<Vec<OrderDto>, ClientError> {
        self.get_json("/orders").await
    }

    pub async fn place_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<SubmitOrderResponse, ClientError> {
        let url = self.url("/orders");
        let response = self.send(|http| http.post(&url).json(request)).await?;
        Ok(response.json().await?)
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderDto, ClientError> {
        let url = self.url(&format!("/orders/{order_id}"));
        let response = self.send(|http| http.delete(&url)).await?;
        Ok(response.json().await?)
    }
}
