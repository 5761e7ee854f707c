//! Online payment through a third-party gateway.
//!
//! `pay` hands the browser a signed gateway URL. `check` then polls the
//! gateway's trade query until the trade settles, fails, hits the configured
//! deadline, or the server starts shutting down.
//!
//! | code | meaning |
//! |------|---------|
//! | 1 | missing or malformed order id |
//! | 2 | order not found, not the user's, or not payable online |
//! | 3 | success |
//! | 4 | payment failed |
//! | 5 | gave up waiting |
//! | 6 | server shutting down |

pub mod alipay;

pub use alipay::AlipayClient;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use freshmart_core::{Money, OrderId, OrderStatus, UserId};

use crate::config::PaymentPollConfig;
use crate::db::{OrderRepository, RepositoryError};
use crate::error::{ApiReply, AppError};
use crate::models::OrderInfo;

/// Code of a successful payment call.
pub const PAYMENT_OK: u8 = 3;

const CODE_SUCCESS: &str = "10000";
const CODE_TRADE_NOT_EXIST: &str = "40004";

/// Errors talking to the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("merchant key error: {0}")]
    Key(String),

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected gateway response: {0}")]
    Response(String),

    #[error("gateway response signature is invalid")]
    Signature,
}

/// The gateway's answer to a trade query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeQuery {
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub sub_code: Option<String>,
    #[serde(default)]
    pub trade_no: Option<String>,
    #[serde(default)]
    pub trade_status: Option<String>,
}

/// Where a trade stands according to one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeState {
    Paid { trade_no: String },
    /// Not created yet at the gateway, or waiting for the buyer.
    Pending,
    Failed,
}

impl TradeQuery {
    #[must_use]
    pub fn classify(&self) -> TradeState {
        let status = self.trade_status.as_deref();
        match self.code.as_str() {
            CODE_SUCCESS if matches!(status, Some("TRADE_SUCCESS" | "TRADE_FINISHED")) => {
                TradeState::Paid {
                    trade_no: self.trade_no.clone().unwrap_or_default(),
                }
            }
            CODE_SUCCESS if status == Some("WAIT_BUYER_PAY") => TradeState::Pending,
            CODE_TRADE_NOT_EXIST => TradeState::Pending,
            _ => TradeState::Failed,
        }
    }
}

/// A payment gateway that can start a browser checkout and report trade status.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// URL that sends the buyer to the gateway's checkout page.
    ///
    /// # Errors
    ///
    /// Returns an error if the request can't be signed.
    fn page_pay_url(
        &self,
        order_id: OrderId,
        total: Money,
        subject: &str,
    ) -> Result<String, GatewayError>;

    /// Current state of the trade for `order_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway can't be reached or answers garbage.
    async fn query_trade(&self, order_id: OrderId) -> Result<TradeQuery, GatewayError>;
}

/// How a payment poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Paid { trade_no: String },
    Failed,
    TimedOut,
    Cancelled,
}

/// Query the gateway every `poll.interval` until the trade leaves the pending
/// state, `poll.deadline` would be overrun, or `cancel` fires.
///
/// # Errors
///
/// Returns the first gateway error.
pub async fn poll_until_settled(
    gateway: &dyn PaymentGateway,
    order_id: OrderId,
    poll: PaymentPollConfig,
    cancel: &CancellationToken,
) -> Result<PollOutcome, GatewayError> {
    let deadline = Instant::now() + poll.deadline;

    loop {
        match gateway.query_trade(order_id).await?.classify() {
            TradeState::Paid { trade_no } => return Ok(PollOutcome::Paid { trade_no }),
            TradeState::Failed => return Ok(PollOutcome::Failed),
            TradeState::Pending => {}
        }

        let wake = Instant::now() + poll.interval;
        if wake > deadline {
            return Ok(PollOutcome::TimedOut);
        }

        tokio::select! {
            () = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            () = tokio::time::sleep_until(wake) => {}
        }
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid order id")]
    InvalidOrderId,

    #[error("order is not payable online")]
    NotPayable,

    #[error("payment failed")]
    Failed,

    #[error("payment not settled before the deadline")]
    TimedOut,

    #[error("payment check interrupted by shutdown")]
    Cancelled,

    #[error("online payment is not configured")]
    Unavailable,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PaymentError {
    /// Render as a reply. Gateway errors answer "payment failed"; database
    /// errors and a missing gateway escalate.
    ///
    /// # Errors
    ///
    /// Returns the infrastructure error as an `AppError`.
    pub fn into_reply(self) -> Result<ApiReply, AppError> {
        let (code, message) = match self {
            Self::InvalidOrderId => (1, "invalid order id"),
            Self::NotPayable => (2, "order cannot be paid online"),
            Self::Failed => (4, "payment failed"),
            Self::TimedOut => (5, "payment not confirmed yet, please check again later"),
            Self::Cancelled => (6, "server is restarting, please check again later"),
            Self::Gateway(e) => {
                tracing::error!(error = %e, "Payment gateway error");
                (4, "payment failed")
            }
            Self::Unavailable => return Err(AppError::Internal(Self::Unavailable.to_string())),
            Self::Repository(e) => return Err(e.into()),
        };
        Ok(ApiReply::error(code, message))
    }
}

/// A new payment may only be started for an unpaid order.
#[must_use]
pub const fn can_start_payment(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Unpaid)
}

/// A trade may be settled for any order that is allowed to become paid.
#[must_use]
pub const fn can_settle_payment(status: OrderStatus) -> bool {
    status.can_transition_to(OrderStatus::Paid)
}

/// Payment service.
pub struct PaymentService<'a> {
    orders: OrderRepository<'a>,
    gateway: Option<&'a dyn PaymentGateway>,
    poll: PaymentPollConfig,
    shutdown: &'a CancellationToken,
}

impl<'a> PaymentService<'a> {
    #[must_use]
    pub const fn new(
        orders: OrderRepository<'a>,
        gateway: Option<&'a dyn PaymentGateway>,
        poll: PaymentPollConfig,
        shutdown: &'a CancellationToken,
    ) -> Self {
        Self {
            orders,
            gateway,
            poll,
            shutdown,
        }
    }

    /// The user's online-payable order named by `raw_order_id`, if its
    /// status passes `accepts`.
    async fn payable_order(
        &self,
        user: UserId,
        raw_order_id: Option<&str>,
        accepts: fn(OrderStatus) -> bool,
    ) -> Result<OrderInfo, PaymentError> {
        let order_id = raw_order_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(PaymentError::InvalidOrderId)?
            .parse::<OrderId>()
            .map_err(|_| PaymentError::InvalidOrderId)?;

        let order = self
            .orders
            .get_owned(user, order_id)
            .await?
            .ok_or(PaymentError::NotPayable)?;

        if !accepts(order.status) || !order.pay_method.is_online_payable() {
            return Err(PaymentError::NotPayable);
        }
        Ok(order)
    }

    fn gateway(&self) -> Result<&'a dyn PaymentGateway, PaymentError> {
        self.gateway.ok_or(PaymentError::Unavailable)
    }

    /// Signed checkout URL for an unpaid order.
    ///
    /// # Errors
    ///
    /// Returns a `PaymentError` naming the failed check.
    pub async fn pay(
        &self,
        user: UserId,
        raw_order_id: Option<&str>,
    ) -> Result<String, PaymentError> {
        let order = self
            .payable_order(user, raw_order_id, can_start_payment)
            .await?;
        let gateway = self.gateway()?;

        let subject = format!("FreshMart order {}", order.order_id);
        let url = gateway.page_pay_url(order.order_id, order.total_pay(), &subject)?;

        tracing::info!(order_id = %order.order_id, total = %order.total_pay(), "Payment started");
        Ok(url)
    }

    /// Wait for the gateway to settle the trade and record the result.
    ///
    /// # Errors
    ///
    /// Returns a `PaymentError` unless the trade was paid.
    pub async fn check(
        &self,
        user: UserId,
        raw_order_id: Option<&str>,
    ) -> Result<(), PaymentError> {
        let order = self
            .payable_order(user, raw_order_id, can_settle_payment)
            .await?;
        let gateway = self.gateway()?;

        let outcome = poll_until_settled(gateway, order.order_id, self.poll, self.shutdown).await?;
        tracing::info!(order_id = %order.order_id, ?outcome, "Payment poll finished");

        match outcome {
            PollOutcome::Paid { trade_no } => {
                // Another check may have recorded it first
                if !self.orders.mark_paid(user, order.order_id, &trade_no).await? {
                    tracing::debug!(order_id = %order.order_id, "Order already marked paid");
                }
                Ok(())
            }
            PollOutcome::Failed => Err(PaymentError::Failed),
            PollOutcome::TimedOut => Err(PaymentError::TimedOut),
            PollOutcome::Cancelled => Err(PaymentError::Cancelled),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    fn query(code: &str, status: Option<&str>) -> TradeQuery {
        TradeQuery {
            code: code.to_string(),
            trade_no: Some("T100".to_string()),
            trade_status: status.map(String::from),
            ..TradeQuery::default()
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            query("10000", Some("TRADE_SUCCESS")).classify(),
            TradeState::Paid {
                trade_no: "T100".to_string()
            }
        );
        assert!(matches!(
            query("10000", Some("TRADE_FINISHED")).classify(),
            TradeState::Paid { .. }
        ));
        assert_eq!(
            query("10000", Some("WAIT_BUYER_PAY")).classify(),
            TradeState::Pending
        );
        assert_eq!(query("40004", None).classify(), TradeState::Pending);
        assert_eq!(
            query("10000", Some("TRADE_CLOSED")).classify(),
            TradeState::Failed
        );
        assert_eq!(query("20000", None).classify(), TradeState::Failed);
    }

    /// Answers trade queries from a script; repeats the last answer forever.
    struct ScriptedGateway {
        answers: Mutex<VecDeque<TradeQuery>>,
        queries: Mutex<u32>,
    }

    impl ScriptedGateway {
        fn new(answers: Vec<TradeQuery>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                queries: Mutex::new(0),
            }
        }

        fn queries(&self) -> u32 {
            *self.queries.lock().unwrap()
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        fn page_pay_url(&self, order_id: OrderId, _: Money, _: &str) -> Result<String, GatewayError> {
            Ok(format!("https://gateway.test/?out_trade_no={order_id}"))
        }

        async fn query_trade(&self, _: OrderId) -> Result<TradeQuery, GatewayError> {
            *self.queries.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.pop_front()
            } else {
                answers.front().cloned()
            };
            answer.ok_or_else(|| GatewayError::Response("no answer".to_string()))
        }
    }

    fn poll_config() -> PaymentPollConfig {
        PaymentPollConfig {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(20),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_pending_then_paid() {
        let gateway = ScriptedGateway::new(vec![
            query("40004", None),
            query("10000", Some("WAIT_BUYER_PAY")),
            query("10000", Some("TRADE_SUCCESS")),
        ]);
        let started = Instant::now();

        let outcome = poll_until_settled(
            &gateway,
            OrderId::generate(),
            poll_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Paid {
                trade_no: "T100".to_string()
            }
        );
        assert_eq!(gateway.queries(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_stops_at_once() {
        let gateway = ScriptedGateway::new(vec![query("10000", Some("TRADE_CLOSED"))]);
        let outcome = poll_until_settled(
            &gateway,
            OrderId::generate(),
            poll_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Failed);
        assert_eq!(gateway.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_at_deadline() {
        let gateway = ScriptedGateway::new(vec![query("10000", Some("WAIT_BUYER_PAY"))]);
        let started = Instant::now();

        let outcome = poll_until_settled(
            &gateway,
            OrderId::generate(),
            poll_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::TimedOut);
        // Queries at 0, 5, 10, 15 and 20 seconds; the next wake would overrun
        assert_eq!(gateway.queries(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_cancel() {
        let gateway = ScriptedGateway::new(vec![query("40004", None)]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let outcome = poll_until_settled(&gateway, OrderId::generate(), poll_config(), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(gateway.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_propagates_gateway_error() {
        let gateway = ScriptedGateway::new(Vec::new());
        let result = poll_until_settled(
            &gateway,
            OrderId::generate(),
            poll_config(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::Response(_))));
    }

    #[test]
    fn test_payment_status_gates() {
        assert!(can_start_payment(OrderStatus::Unpaid));
        assert!(!can_start_payment(OrderStatus::PaidPending));
        assert!(!can_start_payment(OrderStatus::Paid));

        assert!(can_settle_payment(OrderStatus::Unpaid));
        assert!(can_settle_payment(OrderStatus::PaidPending));
        assert!(!can_settle_payment(OrderStatus::Paid));
        assert!(!can_settle_payment(OrderStatus::Reviewed));
    }

    #[test]
    fn test_payment_error_codes() {
        assert_eq!(PaymentError::InvalidOrderId.into_reply().unwrap().code(), 1);
        assert_eq!(PaymentError::NotPayable.into_reply().unwrap().code(), 2);
        assert_eq!(PaymentError::Failed.into_reply().unwrap().code(), 4);
        assert_eq!(PaymentError::TimedOut.into_reply().unwrap().code(), 5);
        assert_eq!(PaymentError::Cancelled.into_reply().unwrap().code(), 6);
        assert_eq!(
            PaymentError::Gateway(GatewayError::Response("x".to_string()))
                .into_reply()
                .unwrap()
                .code(),
            4
        );
        assert_eq!(
            PaymentError::Gateway(GatewayError::Signature)
                .into_reply()
                .unwrap()
                .code(),
            4
        );
        assert!(PaymentError::Unavailable.into_reply().is_err());
    }
}
