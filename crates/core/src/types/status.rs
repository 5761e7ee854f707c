//! Status enums for orders and payments.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// Orders start out [`OrderStatus::Unpaid`] at commit time and only move
/// forward along the edges accepted by [`OrderStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Unpaid,
    /// Paid at the gateway, settlement not yet confirmed.
    PaidPending,
    Paid,
    Delivered,
    /// Received and waiting for the buyer's review.
    Reviewable,
    Reviewed,
}

impl OrderStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Unpaid,
        Self::PaidPending,
        Self::Paid,
        Self::Delivered,
        Self::Reviewable,
        Self::Reviewed,
    ];

    /// Whether the order may move from `self` to `next`.
    ///
    /// A paid order can be reviewed before it ships or is received.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unpaid, Self::PaidPending | Self::Paid)
                | (Self::PaidPending, Self::Paid)
                | (Self::Paid, Self::Delivered | Self::Reviewable | Self::Reviewed)
                | (Self::Delivered, Self::Reviewable | Self::Reviewed)
                | (Self::Reviewable, Self::Reviewed)
        )
    }

    /// Statuses from which an order may move to `next`.
    pub fn preceding(next: Self) -> impl Iterator<Item = Self> {
        Self::ALL
            .into_iter()
            .filter(move |from| from.can_transition_to(next))
    }

    /// Whether the buyer may leave comments on the order's lines.
    ///
    /// Commenting always moves the order to [`OrderStatus::Reviewed`].
    #[must_use]
    pub const fn can_comment(self) -> bool {
        self.can_transition_to(Self::Reviewed)
    }

    /// Human-readable label shown in the user center.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unpaid => "Awaiting payment",
            Self::PaidPending => "Payment processing",
            Self::Paid => "Awaiting shipment",
            Self::Delivered => "Awaiting receipt",
            Self::Reviewable => "Awaiting review",
            Self::Reviewed => "Completed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unpaid => "unpaid",
            Self::PaidPending => "paid_pending",
            Self::Paid => "paid",
            Self::Delivered => "delivered",
            Self::Reviewable => "reviewable",
            Self::Reviewed => "reviewed",
        };
        f.write_str(s)
    }
}

/// Payment method chosen when the order is placed.
///
/// Forms submit the numeric code (`1`-`4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.pay_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PayMethod {
    CashOnDelivery,
    Wechat,
    Alipay,
    Unionpay,
}

impl PayMethod {
    /// Look up a method by its form code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::CashOnDelivery),
            2 => Some(Self::Wechat),
            3 => Some(Self::Alipay),
            4 => Some(Self::Unionpay),
            _ => None,
        }
    }

    /// The form code for this method.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::CashOnDelivery => 1,
            Self::Wechat => 2,
            Self::Alipay => 3,
            Self::Unionpay => 4,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CashOnDelivery => "Cash on delivery",
            Self::Wechat => "WeChat Pay",
            Self::Alipay => "Alipay",
            Self::Unionpay => "UnionPay",
        }
    }

    /// Only Alipay orders can be paid through the gateway bridge.
    #[must_use]
    pub const fn is_online_payable(self) -> bool {
        matches!(self, Self::Alipay)
    }
}

impl std::str::FromStr for PayMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| format!("invalid pay method: {s}"))
    }
}
