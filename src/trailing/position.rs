//! Per-symbol position state (§3 "Position state", §4.D). Exclusively
//! owned by the trailing executor.

#[derive(Debug, Clone)]
pub struct PositionState {
    pub symbol: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub stop_order_id: Option<i64>,
    pub stop_price: Option<f64>,
    pub high_water_mark: Option<f64>,
    pub breakeven_triggered: bool,
}

impl PositionState {
    pub fn new(symbol: impl Into<String>, quantity: f64, avg_cost: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            avg_cost,
            current_price: avg_cost,
            unrealized_pnl: 0.0,
            stop_order_id: None,
            stop_price: None,
            high_water_mark: None,
            breakeven_triggered: false,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Updates current price and P&L from an account-updates snapshot, and
    /// the high-water mark per §4.D's rule: first observation initializes
    /// `hwm := current`; thereafter long positions track the max, short
    /// positions track the min.
    pub fn on_price_update(&mut self, price: f64) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.avg_cost) * self.quantity;

        self.high_water_mark = Some(match self.high_water_mark {
            None => price,
            Some(hwm) if self.is_long() => hwm.max(price),
            Some(hwm) if self.is_short() => hwm.min(price),
            Some(hwm) => hwm,
        });
    }

    /// R-multiple estimate used by `breakeven_trail`: unrealized P&L divided
    /// by a per-share risk proxy of `avg_cost * |qty| * 0.02`.
    pub fn r_multiple(&self) -> f64 {
        let risk = self.avg_cost * self.quantity.abs() * 0.02;
        if risk == 0.0 {
            0.0
        } else {
            self.unrealized_pnl / risk
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_initializes_hwm() {
        let mut pos = PositionState::new("AAPL", 100.0, 150.0);
        pos.on_price_update(152.0);
        assert_eq!(pos.high_water_mark, Some(152.0));
    }

    #[test]
    fn long_hwm_tracks_max() {
        let mut pos = PositionState::new("AAPL", 100.0, 150.0);
        pos.on_price_update(155.0);
        pos.on_price_update(153.0);
        pos.on_price_update(157.0);
        assert_eq!(pos.high_water_mark, Some(157.0));
    }

    #[test]
    fn short_hwm_tracks_min() {
        let mut pos = PositionState::new("AAPL", -100.0, 150.0);
        pos.on_price_update(145.0);
        pos.on_price_update(148.0);
        pos.on_price_update(142.0);
        assert_eq!(pos.high_water_mark, Some(142.0));
    }
}
