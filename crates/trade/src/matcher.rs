use bullpen_core::trade::entity::{Fill, Order, OrderStatus};
use bullpen_core::trade::port::MatcherPort;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// 佣金保留的小数位
const COMMISSION_SCALE: u32 = 2;

/// # Summary
/// 模拟盘的本地撮合引擎。
/// 游戏只支持市价单，所有订单均以传入的当前价格一次性全量成交。
pub struct LocalMatchEngine {
    // 按成交金额收取的佣金比例，0 表示免佣
    commission_rate: Decimal,
}

impl Default for LocalMatchEngine {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}

impl LocalMatchEngine {
    pub fn new(commission_rate: Decimal) -> Self {
        Self {
            commission_rate: commission_rate.max(Decimal::ZERO),
        }
    }
}

impl MatcherPort for LocalMatchEngine {
    /// # Logic
    /// 1. 只接受 `Pending` 且价格为正的订单。
    /// 2. 以传入价格全量成交，按比例计算佣金。
    /// 3. 订单状态迁移为 `Executed` 并记录成交价。
    fn execute(&self, order: &mut Order, price: Decimal, now: DateTime<Utc>) -> Option<Fill> {
        if !order.is_pending() || price <= Decimal::ZERO || order.shares <= 0 {
            return None;
        }

        let gross = price * Decimal::from(order.shares);
        let commission = self.commission(gross);

        order.status = OrderStatus::Executed;
        order.execution_price = Some(price);
        order.updated_at = now;

        Some(Fill {
            order_id: order.id.clone(),
            account_id: order.account_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            shares: order.shares,
            commission,
            executed_at: now,
        })
    }

    fn commission(&self, gross: Decimal) -> Decimal {
        (gross * self.commission_rate).round_dp(COMMISSION_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bullpen_core::trade::entity::{AccountId, OrderId, OrderSide};
    use rust_decimal_macros::dec;

    fn order(side: OrderSide) -> Order {
        Order::new(
            OrderId("o1".into()),
            AccountId("alice".into()),
            "AAPL".into(),
            side,
            10,
            dec!(150),
            Utc::now(),
        )
    }

    #[test]
    fn test_execute_full_fill_with_commission() {
        let engine = LocalMatchEngine::new(dec!(0.001));
        let mut o = order(OrderSide::Buy);
        let now = Utc::now();

        let fill = engine.execute(&mut o, dec!(151.5), now).unwrap();
        assert_eq!(fill.shares, 10);
        assert_eq!(fill.price, dec!(151.5));
        assert_eq!(fill.commission, dec!(1.52));
        assert_eq!(fill.cash_delta(), dec!(-1516.52));
        assert_eq!(o.status, OrderStatus::Executed);
        assert_eq!(o.execution_price, Some(dec!(151.5)));

        // 已成交订单不能再次撮合
        assert!(engine.execute(&mut o, dec!(151.5), now).is_none());
    }

    #[test]
    fn test_rejects_invalid_price() {
        let engine = LocalMatchEngine::default();
        let mut o = order(OrderSide::Sell);
        assert!(engine.execute(&mut o, dec!(0), Utc::now()).is_none());
        assert!(o.is_pending());

        let fill = engine.execute(&mut o, dec!(99), Utc::now()).unwrap();
        assert_eq!(fill.commission, Decimal::ZERO);
        assert_eq!(fill.cash_delta(), dec!(990));
    }
}
