use domain::types::{Bps, Money, Price, Qty};

/// Backtest cost model: a flat commission on each leg.
///
/// Fills happen at the bar close. No spread or slippage: the strategy trades
/// daily with market orders and does not model the book.
#[derive(Debug, Copy, Clone)]
pub struct ExecutionModel {
    pub fee: Bps,
}

impl ExecutionModel {
    pub fn frictionless() -> Self {
        Self { fee: Bps(0.0) }
    }

    fn fee_ratio(self) -> f64 {
        self.fee.as_fraction()
    }

    /// Quantity bought when spending all of `quote` at `price`, commission taken from the quote.
    pub fn buy_qty_for_quote(self, quote: Money, price: Price) -> Qty {
        if quote.0 <= 0.0 || !price.is_valid() {
            return Qty(0.0);
        }
        Money(quote.0 * (1.0 - self.fee_ratio())) / price
    }

    pub fn sell_proceeds(self, qty: Qty, price: Price) -> Money {
        if qty.0 <= 0.0 || !price.is_valid() {
            return Money(0.0);
        }
        let gross = qty * price;
        Money(gross.0 * (1.0 - self.fee_ratio()))
    }

    /// Capital multiplier of one full round trip, net of both commissions.
    pub fn round_trip_factor(self, entry: Price, exit: Price) -> f64 {
        let keep = 1.0 - self.fee_ratio();
        (exit.0 / entry.0) * keep * keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frictionless_round_trip_is_price_ratio() {
        let m = ExecutionModel::frictionless();
        let qty = m.buy_qty_for_quote(Money(1000.0), Price(100.0));
        let back = m.sell_proceeds(qty, Price(110.0));

        assert!((back.0 - 1100.0).abs() < 1e-9);
        assert!((m.round_trip_factor(Price(100.0), Price(110.0)) - 1.1).abs() < 1e-12);
    }

    #[test]
    fn commission_is_charged_on_both_legs() {
        let m = ExecutionModel { fee: Bps(10.0) };
        let quote = Money(1000.0);
        let qty = m.buy_qty_for_quote(quote, Price(100.0));
        let back = m.sell_proceeds(qty, Price(100.0));

        assert!(back.0 < quote.0);
        let expected = 1000.0 * 0.999 * 0.999;
        assert!((back.0 - expected).abs() < 1e-9);
        assert!((m.round_trip_factor(Price(100.0), Price(100.0)) - 0.999 * 0.999).abs() < 1e-12);
    }

    #[test]
    fn invalid_inputs_trade_nothing() {
        let m = ExecutionModel::frictionless();
        assert_eq!(m.buy_qty_for_quote(Money(0.0), Price(100.0)), Qty(0.0));
        assert_eq!(m.buy_qty_for_quote(Money(10.0), Price(0.0)), Qty(0.0));
        assert_eq!(m.sell_proceeds(Qty(1.0), Price(-1.0)), Money(0.0));
    }
}
