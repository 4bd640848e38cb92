//! KIS (Korea Investment & Securities) OpenAPI REST adapter
//!
//! Pure HTTP layer. Callers pass a valid access token with every call;
//! obtaining and sharing that token is the token broker's concern, and
//! spacing/caching of quote lookups is the request coordinator's.

use chrono::{DateTime, Local, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::KisConfig;
use crate::domain::{OrderReceipt, OrderSide};
use crate::error::{Result, ScoopError};

const TR_CURRENT_PRICE: &str = "FHKST01010100";
const TR_DAILY_PRICES: &str = "FHKST03010100";
const TR_BUY_REAL: &str = "TTTC0802U";
const TR_BUY_PAPER: &str = "VTTC0802U";
const TR_SELL_REAL: &str = "TTTC0801U";
const TR_SELL_PAPER: &str = "VTTC0801U";

/// Freshly issued OAuth2 credential with its true expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct KisClient {
    http: Client,
    base_url: String,
    app_key: String,
    app_secret: String,
    /// Account number split into CANO / ACNT_PRDT_CD
    cano: String,
    acnt_prdt_cd: String,
    real_account: bool,
}

impl KisClient {
    pub fn new(cfg: &KisConfig) -> Result<Self> {
        let (cano, acnt_prdt_cd) = split_account(&cfg.account_number)?;

        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("scoop/0.1")
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            app_key: cfg.app_key.clone(),
            app_secret: cfg.app_secret.clone(),
            cano,
            acnt_prdt_cd,
            real_account: cfg.real_account,
        })
    }

    /// Issue a fresh OAuth2 token (client_credentials grant).
    ///
    /// The issuance endpoint rejects near-simultaneous requests from
    /// processes sharing one app key with 403; that surfaces as
    /// [`ScoopError::RateLimited`] so the broker can retry.
    pub async fn issue_token(&self) -> Result<IssuedToken> {
        let url = format!("{}/oauth2/tokenP", self.base_url);
        let body = json!({
            "grant_type": "client_credentials",
            "appkey": self.app_key,
            "appsecret": self.app_secret,
        });

        info!("Requesting new KIS OAuth2 token");
        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let text = resp.text().await.unwrap_or_default();
            return Err(ScoopError::RateLimited(format!(
                "token issuance rejected ({status}): {text}"
            )));
        }
        let data: Value = resp.error_for_status()?.json().await?;

        let access_token = data["access_token"]
            .as_str()
            .ok_or_else(|| ScoopError::Auth("token response missing access_token".into()))?
            .to_string();
        let expires_in = data["expires_in"].as_i64().unwrap_or(86_400);
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in);

        info!("KIS OAuth2 token issued, expires at {expires_at}");
        Ok(IssuedToken {
            access_token,
            expires_at,
        })
    }

    /// Real-time quote for a symbol; returns the raw `output` payload.
    pub async fn current_price(&self, token: &str, symbol: &str) -> Result<Value> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-price",
            self.base_url
        );

        let data: Value = self
            .http
            .get(&url)
            .header("authorization", format!("Bearer {token}"))
            .header("appkey", &self.app_key)
            .header("appsecret", &self.app_secret)
            .header("tr_id", TR_CURRENT_PRICE)
            .header("custtype", "P")
            .query(&[("FID_COND_MRKT_DIV_CODE", "J"), ("FID_INPUT_ISCD", symbol)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_envelope(&data)?;
        debug!(%symbol, "fetched current price");
        Ok(data["output"].clone())
    }

    /// Daily bars for the last `days` trading days, most recent first.
    pub async fn daily_prices(&self, token: &str, symbol: &str, days: usize) -> Result<Value> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
            self.base_url
        );
        // Fetch twice the span in calendar days to cover weekends/holidays.
        let end_date = Local::now().format("%Y%m%d").to_string();
        let start_date = (Local::now() - chrono::Duration::days(days as i64 * 2))
            .format("%Y%m%d")
            .to_string();

        let data: Value = self
            .http
            .get(&url)
            .header("authorization", format!("Bearer {token}"))
            .header("appkey", &self.app_key)
            .header("appsecret", &self.app_secret)
            .header("tr_id", TR_DAILY_PRICES)
            .header("custtype", "P")
            .query(&[
                ("FID_COND_MRKT_DIV_CODE", "J"),
                ("FID_INPUT_ISCD", symbol),
                ("FID_INPUT_DATE_1", start_date.as_str()),
                ("FID_INPUT_DATE_2", end_date.as_str()),
                ("FID_PERIOD_DIV_CODE", "D"),
                ("FID_ORG_ADJ_PRC", "0"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_envelope(&data)?;
        let mut bars = data["output2"].as_array().cloned().unwrap_or_default();
        bars.truncate(days);
        debug!(%symbol, count = bars.len(), "fetched daily prices");
        Ok(Value::Array(bars))
    }

    /// Submit a cash market order (ORD_DVSN "01", unit price 0).
    pub async fn submit_order(
        &self,
        token: &str,
        symbol: &str,
        quantity: i64,
        side: OrderSide,
    ) -> Result<OrderReceipt> {
        if quantity <= 0 {
            return Err(ScoopError::OrderSubmission(format!(
                "refusing {side} order for {symbol} with quantity {quantity}"
            )));
        }

        let url = format!(
            "{}/uapi/domestic-stock/v1/trading/order-cash",
            self.base_url
        );
        let body = json!({
            "CANO": self.cano,
            "ACNT_PRDT_CD": self.acnt_prdt_cd,
            "PDNO": symbol,
            "ORD_DVSN": "01",
            "ORD_QTY": quantity.to_string(),
            "ORD_UNPR": "0",
        });

        let data: Value = self
            .http
            .post(&url)
            .header("authorization", format!("Bearer {token}"))
            .header("appkey", &self.app_key)
            .header("appsecret", &self.app_secret)
            .header("tr_id", order_tr_id(side, self.real_account))
            .header("custtype", "P")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_envelope(&data)?;

        let output = &data["output"];
        let order_id = format!(
            "{}{}",
            output["KRX_FWDG_ORD_ORGNO"].as_str().unwrap_or(""),
            output["ODNO"].as_str().unwrap_or("")
        );
        let message = data["msg1"].as_str().unwrap_or("").trim().to_string();

        info!(%symbol, %side, quantity, %order_id, "order submitted");
        Ok(OrderReceipt { order_id, message })
    }
}

#[async_trait::async_trait]
impl crate::auth::TokenIssuer for KisClient {
    async fn issue_token(&self) -> Result<IssuedToken> {
        KisClient::issue_token(self).await
    }
}

fn order_tr_id(side: OrderSide, real_account: bool) -> &'static str {
    match (side, real_account) {
        (OrderSide::Buy, true) => TR_BUY_REAL,
        (OrderSide::Buy, false) => TR_BUY_PAPER,
        (OrderSide::Sell, true) => TR_SELL_REAL,
        (OrderSide::Sell, false) => TR_SELL_PAPER,
    }
}

fn split_account(raw: &str) -> Result<(String, String)> {
    match raw.split_once('-') {
        Some((cano, prdt)) if !cano.is_empty() && !prdt.is_empty() => {
            Ok((cano.to_string(), prdt.to_string()))
        }
        _ => Err(ScoopError::Validation(format!(
            "invalid account number format: {raw}"
        ))),
    }
}

/// Validate the brokerage response envelope (`rt_cd == "0"`).
fn check_envelope(data: &Value) -> Result<()> {
    let rt_cd = data["rt_cd"].as_str().unwrap_or("");
    if rt_cd == "0" {
        return Ok(());
    }
    Err(ScoopError::Api {
        code: data["msg_cd"]
            .as_str()
            .filter(|c| !c.is_empty())
            .unwrap_or(if rt_cd.is_empty() { "unknown" } else { rt_cd })
            .to_string(),
        message: data["msg1"].as_str().unwrap_or("unknown error").trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_number_splits_into_parts() {
        let (cano, prdt) = split_account("12345678-01").unwrap();
        assert_eq!(cano, "12345678");
        assert_eq!(prdt, "01");
    }

    #[test]
    fn malformed_account_number_is_rejected() {
        for raw in ["1234567801", "12345678-", "-01", ""] {
            assert!(
                matches!(split_account(raw), Err(ScoopError::Validation(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn envelope_passes_on_rt_cd_zero() {
        let data = json!({"rt_cd": "0", "output": {"stck_prpr": "70100"}});
        assert!(check_envelope(&data).is_ok());
    }

    #[test]
    fn envelope_failure_carries_code_and_message() {
        let data = json!({"rt_cd": "1", "msg_cd": "EGW00123", "msg1": "기간이 만료된 token 입니다."});
        match check_envelope(&data) {
            Err(ScoopError::Api { code, message }) => {
                assert_eq!(code, "EGW00123");
                assert!(message.contains("token"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn order_tr_id_selects_by_side_and_account() {
        assert_eq!(order_tr_id(OrderSide::Buy, true), "TTTC0802U");
        assert_eq!(order_tr_id(OrderSide::Buy, false), "VTTC0802U");
        assert_eq!(order_tr_id(OrderSide::Sell, true), "TTTC0801U");
        assert_eq!(order_tr_id(OrderSide::Sell, false), "VTTC0801U");
    }
}
