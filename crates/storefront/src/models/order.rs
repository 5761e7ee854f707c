//! Order types and the computed views shown on cart and order pages.

use chrono::{DateTime, Utc};
use serde::Serialize;

use freshmart_core::{AddressId, Money, OrderId, OrderStatus, PayMethod, SkuId, UserId};

use super::catalog::Sku;

/// An order header.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderInfo {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub pay_method: PayMethod,
    pub total_count: i32,
    pub total_price: Money,
    pub transit_price: Money,
    pub status: OrderStatus,
    pub trade_no: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderInfo {
    /// Amount charged: goods plus shipping.
    #[must_use]
    pub fn total_pay(&self) -> Money {
        self.total_price + self.transit_price
    }
}

/// An order line joined with its SKU, with the line amount computed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderLineView {
    pub sku_id: SkuId,
    pub sku_name: String,
    pub image: String,
    pub unit: String,
    /// Unit price at commit time
    pub price: Money,
    pub count: i32,
    pub comment: String,
    #[sqlx(skip)]
    pub amount: Money,
}

impl OrderLineView {
    /// Fill in `amount` after loading from the database.
    #[must_use]
    pub fn with_amount(mut self) -> Self {
        self.amount = self.price.times(self.count);
        self
    }
}

/// An order with its lines, as listed in the user center.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub info: OrderInfo,
    pub lines: Vec<OrderLineView>,
    pub status_label: &'static str,
    pub total_pay: Money,
}

impl OrderView {
    #[must_use]
    pub fn new(info: OrderInfo, lines: Vec<OrderLineView>) -> Self {
        Self {
            status_label: info.status.label(),
            total_pay: info.total_pay(),
            info,
            lines,
        }
    }

    /// Whether the order list offers a "pay" button.
    #[must_use]
    pub fn awaiting_payment(&self) -> bool {
        crate::services::payment::can_start_payment(self.info.status)
            && self.info.pay_method.is_online_payable()
    }

    /// Whether the order list offers a "review" link.
    #[must_use]
    pub const fn reviewable(&self) -> bool {
        self.info.status.can_comment()
    }
}

/// A cart line for display: the SKU, the quantity and the subtotal.
#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    pub sku: Sku,
    pub count: i32,
    pub amount: Money,
}

impl CartLineView {
    #[must_use]
    pub fn new(sku: Sku, count: i32) -> Self {
        let amount = sku.price.times(count);
        Self { sku, count, amount }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn order(status: OrderStatus, pay_method: PayMethod) -> OrderView {
        let info = OrderInfo {
            order_id: OrderId::generate(),
            user_id: UserId::new(1),
            address_id: AddressId::new(1),
            pay_method,
            total_count: 2,
            total_price: Money::from_units(20),
            transit_price: Money::from_units(10),
            status,
            trade_no: None,
            created_at: Utc::now(),
        };
        OrderView::new(info, Vec::new())
    }

    #[test]
    fn test_order_view_totals() {
        let view = order(OrderStatus::Unpaid, PayMethod::Alipay);
        assert_eq!(view.total_pay, Money::from_units(30));
        assert_eq!(view.status_label, OrderStatus::Unpaid.label());
    }

    #[test]
    fn test_awaiting_payment() {
        assert!(order(OrderStatus::Unpaid, PayMethod::Alipay).awaiting_payment());
        assert!(!order(OrderStatus::PaidPending, PayMethod::Alipay).awaiting_payment());
        assert!(!order(OrderStatus::Paid, PayMethod::Alipay).awaiting_payment());
        assert!(!order(OrderStatus::Unpaid, PayMethod::CashOnDelivery).awaiting_payment());
    }

    #[test]
    fn test_reviewable() {
        assert!(order(OrderStatus::Reviewable, PayMethod::Alipay).reviewable());
        assert!(!order(OrderStatus::Reviewed, PayMethod::Alipay).reviewable());
    }
}
