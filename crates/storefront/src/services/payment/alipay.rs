//! Alipay open-platform client.
//!
//! Requests are signed with RSA2: PKCS#1 v1.5 over SHA-256 of the sorted
//! `key=value&...` string of every parameter except `sign`, base64-encoded.
//!
//! Replies are signed the same way by Alipay's key, over the exact JSON text
//! of the `*_response` object. A reply whose signature does not verify is
//! rejected before its trade status is read.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset, Utc};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use serde_json::value::RawValue;
use sha2::Sha256;
use tracing::instrument;

use freshmart_core::{Money, OrderId};

use super::{GatewayError, PaymentGateway, TradeQuery};
use crate::config::AlipayConfig;

const PAGE_PAY_METHOD: &str = "alipay.trade.page.pay";
const QUERY_METHOD: &str = "alipay.trade.query";
const PRODUCT_CODE: &str = "FAST_INSTANT_TRADE_PAY";

/// The gateway expects timestamps in China Standard Time.
const GATEWAY_UTC_OFFSET_SECS: i32 = 8 * 3600;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct QueryEnvelope<'a> {
    #[serde(borrow)]
    alipay_trade_query_response: &'a RawValue,
    #[serde(default)]
    sign: Option<String>,
}

/// Signed client for the Alipay gateway.
pub struct AlipayClient {
    app_id: String,
    gateway_url: String,
    signing_key: SigningKey<Sha256>,
    alipay_key: VerifyingKey<Sha256>,
    http: reqwest::Client,
}

impl std::fmt::Debug for AlipayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlipayClient")
            .field("app_id", &self.app_id)
            .field("gateway_url", &self.gateway_url)
            .field("signing_key", &"[REDACTED]")
            .field("alipay_key", &"RSA public key")
            .finish_non_exhaustive()
    }
}

impl AlipayClient {
    /// Load the merchant key and Alipay's public key from the configured files.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Key` if a file can't be read or parsed.
    pub fn from_config(config: &AlipayConfig) -> Result<Self, GatewayError> {
        let private_pem = read_pem(&config.private_key_path)?;
        let public_pem = read_pem(&config.alipay_public_key_path)?;
        Self::from_pem(&config.app_id, &config.gateway_url, &private_pem, &public_pem)
    }

    /// Build a client from the merchant's PKCS#8 or PKCS#1 PEM private key and
    /// Alipay's SPKI or PKCS#1 PEM public key.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Key` if either PEM is not an RSA key of the
    /// expected kind.
    pub fn from_pem(
        app_id: &str,
        gateway_url: &str,
        private_pem: &str,
        alipay_public_pem: &str,
    ) -> Result<Self, GatewayError> {
        let key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| GatewayError::Key(e.to_string()))?;
        let alipay_key = RsaPublicKey::from_public_key_pem(alipay_public_pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(alipay_public_pem))
            .map_err(|e| GatewayError::Key(format!("alipay public key: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(GatewayError::Http)?;

        Ok(Self {
            app_id: app_id.to_string(),
            gateway_url: gateway_url.to_string(),
            signing_key: SigningKey::<Sha256>::new(key),
            alipay_key: VerifyingKey::<Sha256>::new(alipay_key),
            http,
        })
    }

    fn common_params(
        &self,
        method: &str,
        biz_content: String,
        now: DateTime<Utc>,
    ) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("app_id", self.app_id.clone()),
            ("method", method.to_string()),
            ("format", "JSON".to_string()),
            ("charset", "utf-8".to_string()),
            ("sign_type", "RSA2".to_string()),
            ("timestamp", gateway_timestamp(now)),
            ("version", "1.0".to_string()),
            ("biz_content", biz_content),
        ])
    }

    fn sign(&self, content: &str) -> String {
        let signature = self.signing_key.sign(content.as_bytes());
        STANDARD.encode(signature.to_bytes())
    }

    /// Verify the reply's `sign` over the raw response object, then parse it.
    fn verified_query(&self, body: &str) -> Result<TradeQuery, GatewayError> {
        let envelope: QueryEnvelope<'_> =
            serde_json::from_str(body).map_err(|e| GatewayError::Response(e.to_string()))?;
        let content = envelope.alipay_trade_query_response.get();

        let sign = envelope.sign.as_deref().ok_or(GatewayError::Signature)?;
        let bytes = STANDARD
            .decode(sign)
            .map_err(|_| GatewayError::Signature)?;
        let signature =
            Signature::try_from(bytes.as_slice()).map_err(|_| GatewayError::Signature)?;
        self.alipay_key
            .verify(content.as_bytes(), &signature)
            .map_err(|_| GatewayError::Signature)?;

        serde_json::from_str(content).map_err(|e| GatewayError::Response(e.to_string()))
    }

    /// Parameters plus their `sign`.
    fn signed(&self, mut params: BTreeMap<&'static str, String>) -> BTreeMap<&'static str, String> {
        let sign = self.sign(&signing_string(&params));
        params.insert("sign", sign);
        params
    }

    fn page_pay_url_at(
        &self,
        order_id: OrderId,
        total: Money,
        subject: &str,
        now: DateTime<Utc>,
    ) -> String {
        let biz_content = serde_json::json!({
            "out_trade_no": order_id.to_string(),
            "total_amount": total.to_string(),
            "subject": subject,
            "product_code": PRODUCT_CODE,
        })
        .to_string();

        let params = self.signed(self.common_params(PAGE_PAY_METHOD, biz_content, now));
        format!("{}?{}", self.gateway_url, encode_query(&params))
    }
}

#[async_trait]
impl PaymentGateway for AlipayClient {
    fn page_pay_url(
        &self,
        order_id: OrderId,
        total: Money,
        subject: &str,
    ) -> Result<String, GatewayError> {
        Ok(self.page_pay_url_at(order_id, total, subject, Utc::now()))
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn query_trade(&self, order_id: OrderId) -> Result<TradeQuery, GatewayError> {
        let biz_content = serde_json::json!({ "out_trade_no": order_id.to_string() }).to_string();
        let params = self.signed(self.common_params(QUERY_METHOD, biz_content, Utc::now()));

        let body = self
            .http
            .post(&self.gateway_url)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let query = self.verified_query(&body)?;
        tracing::debug!(
            code = %query.code,
            trade_status = ?query.trade_status,
            "Trade query answered"
        );
        Ok(query)
    }
}

/// `key=value` pairs in key order joined by `&`, values unescaped.
#[must_use]
pub fn signing_string(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .filter(|(k, v)| **k != "sign" && !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn read_pem(path: &std::path::Path) -> Result<String, GatewayError> {
    std::fs::read_to_string(path).map_err(|e| GatewayError::Key(format!("{}: {e}", path.display())))
}

fn encode_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn gateway_timestamp(now: DateTime<Utc>) -> String {
    let local = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS)
        .map_or_else(|| now.naive_utc(), |tz| now.with_timezone(&tz).naive_local());
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
