//! Rule evaluation and order sizing.
//!
//! Pure functions from market/own snapshots to order intents, so the whole
//! engine is testable without HTTP. Budget clamps keep every produced intent
//! within `max_order_value` and `min_cash_reserve`; an intent that clamps
//! below one share is skipped, not an error.

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::strategy::{
    ActionKind, CompiledAction, CompiledRule, Condition, Metric, Pricing, RandomConfig, Sizing,
    StrategySettings,
};
use crate::models::{OrderSide, OrderType};

/// Market snapshot for one ticker at tick time.
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    pub ticker: String,
    pub last_price: Option<Decimal>,
    /// Mean price of the recent-trade window (last 20 trades).
    pub avg_recent_price: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}

/// The agent's own state for one ticker.
#[derive(Debug, Clone, Default)]
pub struct OwnView {
    pub cash: Decimal,
    pub holdings: i64,
    pub open_orders: i64,
}

/// A placed-order request the runtime forwards to the exchange client.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub ticker: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Place(OrderIntent),
    /// Cancel the agent's own OPEN/PARTIAL orders for a ticker.
    CancelOpenOrders { ticker: String },
}

// ============================================================================
// Metrics and conditions
// ============================================================================

/// Resolve a metric; `None` means the clause is false.
pub fn metric_value(metric: Metric, market: &MarketView, own: &OwnView) -> Option<Decimal> {
    match metric {
        Metric::Price => market.last_price,
        Metric::PriceChangePct => {
            let last = market.last_price?;
            let avg = market.avg_recent_price?;
            if avg.is_zero() {
                return None;
            }
            Some((last - avg) / avg * Decimal::from(100))
        }
        Metric::BidPrice => market.best_bid,
        Metric::AskPrice => market.best_ask,
        Metric::SpreadPct => {
            let bid = market.best_bid?;
            let ask = market.best_ask?;
            let mid = (bid + ask) / Decimal::from(2);
            if mid.is_zero() {
                return None;
            }
            Some((ask - bid) / mid * Decimal::from(100))
        }
        Metric::MyCash => Some(own.cash),
        Metric::MyHoldings => Some(Decimal::from(own.holdings)),
        Metric::MyPositionValue => {
            let price = market.last_price?;
            Some(Decimal::from(own.holdings) * price)
        }
        Metric::MyOpenOrders => Some(Decimal::from(own.open_orders)),
    }
}

pub fn condition_holds(condition: &Condition, market: &MarketView, own: &OwnView) -> bool {
    match metric_value(condition.metric, market, own) {
        Some(value) => condition.operator.apply(value, condition.value),
        None => false,
    }
}

/// The `when` block is a conjunction.
pub fn conditions_hold(conditions: &[Condition], market: &MarketView, own: &OwnView) -> bool {
    conditions
        .iter()
        .all(|condition| condition_holds(condition, market, own))
}

// ============================================================================
// Action planning
// ============================================================================

fn floor_div(amount: Decimal, price: Decimal) -> i64 {
    if price <= Decimal::ZERO {
        return 0;
    }
    (amount / price).floor().to_i64().unwrap_or(0)
}

fn offset_price(touch: Decimal, offset_pct: Decimal) -> Option<Decimal> {
    let price = (touch * (Decimal::from(100) + offset_pct) / Decimal::from(100)).round_dp(2);
    (price > Decimal::ZERO).then_some(price)
}

fn plan_buy(
    action: &CompiledAction,
    settings: &StrategySettings,
    market: &MarketView,
    own: &OwnView,
) -> Option<OrderIntent> {
    // Limit price, or a sizing estimate for market orders.
    let (order_type, limit_price, price_est) = match action.pricing {
        Pricing::Limit(price) => (OrderType::Limit, Some(price), price),
        Pricing::OffsetPct(offset) => {
            let touch = market.best_bid.or(market.last_price)?;
            let price = offset_price(touch, offset)?;
            (OrderType::Limit, Some(price), price)
        }
        Pricing::Market => {
            let est = market.best_ask.or(market.last_price)?;
            (OrderType::Market, None, est)
        }
    };
    if price_est <= Decimal::ZERO {
        return None;
    }

    let spendable = own.cash - settings.min_cash_reserve;
    if spendable <= Decimal::ZERO {
        return None;
    }
    let affordable = floor_div(spendable, price_est);

    let mut quantity = match action.sizing? {
        Sizing::Quantity(quantity) => quantity,
        Sizing::Pct(pct) => floor_div(
            Decimal::from(affordable) * pct,
            Decimal::from(100),
        ),
        Sizing::All => affordable,
    };

    quantity = quantity.min(affordable);
    if let Some(max_value) = settings.max_order_value {
        quantity = quantity.min(floor_div(max_value, price_est));
    }
    if quantity < 1 {
        return None;
    }

    Some(OrderIntent {
        ticker: market.ticker.clone(),
        side: OrderSide::Buy,
        order_type,
        quantity,
        price: limit_price,
    })
}

fn plan_sell(
    action: &CompiledAction,
    settings: &StrategySettings,
    market: &MarketView,
    own: &OwnView,
) -> Option<OrderIntent> {
    if own.holdings < 1 {
        return None;
    }
    let (order_type, limit_price, price_est) = match action.pricing {
        Pricing::Limit(price) => (OrderType::Limit, Some(price), Some(price)),
        Pricing::OffsetPct(offset) => {
            let touch = market.best_ask.or(market.last_price)?;
            let price = offset_price(touch, offset)?;
            (OrderType::Limit, Some(price), Some(price))
        }
        Pricing::Market => (OrderType::Market, None, market.best_bid.or(market.last_price)),
    };

    let mut quantity = match action.sizing? {
        Sizing::Quantity(quantity) => quantity.min(own.holdings),
        Sizing::Pct(pct) => floor_div(
            Decimal::from(own.holdings) * pct,
            Decimal::from(100),
        ),
        Sizing::All => own.holdings,
    };

    if let (Some(max_value), Some(price)) = (settings.max_order_value, price_est) {
        quantity = quantity.min(floor_div(max_value, price));
    }
    if quantity < 1 {
        return None;
    }

    Some(OrderIntent {
        ticker: market.ticker.clone(),
        side: OrderSide::Sell,
        order_type,
        quantity,
        price: limit_price,
    })
}

/// Plan a rule's actions against one ticker. Conditions must already hold.
pub fn plan_rule(
    rule: &CompiledRule,
    settings: &StrategySettings,
    market: &MarketView,
    own: &OwnView,
) -> Vec<Intent> {
    let mut intents = Vec::new();
    for action in &rule.then {
        match action.kind {
            ActionKind::Buy => {
                if let Some(order) = plan_buy(action, settings, market, own) {
                    intents.push(Intent::Place(order));
                }
            }
            ActionKind::Sell => {
                if let Some(order) = plan_sell(action, settings, market, own) {
                    intents.push(Intent::Place(order));
                }
            }
            ActionKind::CancelOrders => {
                intents.push(Intent::CancelOpenOrders {
                    ticker: market.ticker.clone(),
                });
            }
        }
    }
    intents
}

/// Noise-trader planning: with the configured probability, one market order
/// of random size on a random ticker.
pub fn plan_random<R: Rng>(
    config: &RandomConfig,
    rng: &mut R,
    markets: &[MarketView],
    own_for: impl Fn(&str) -> OwnView,
) -> Vec<Intent> {
    if markets.is_empty() || !rng.gen_bool(config.trade_probability.clamp(0.0, 1.0)) {
        return Vec::new();
    }
    let market = &markets[rng.gen_range(0..markets.len())];
    let own = own_for(&market.ticker);
    let quantity = rng.gen_range(config.min_quantity..=config.max_quantity.max(config.min_quantity));

    if rng.gen_bool(0.5) {
        let Some(price_est) = market.best_ask.or(market.last_price) else {
            return Vec::new();
        };
        let quantity = quantity.min(floor_div(own.cash, price_est));
        if quantity < 1 {
            return Vec::new();
        }
        vec![Intent::Place(OrderIntent {
            ticker: market.ticker.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity,
            price: None,
        })]
    } else {
        let quantity = quantity.min(own.holdings);
        if quantity < 1 {
            return Vec::new();
        }
        vec![Intent::Place(OrderIntent {
            ticker: market.ticker.clone(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity,
            price: None,
        })]
    }
}

// ============================================================================
// Cooldown bookkeeping
// ============================================================================

/// Last-fire timestamps per rule index. Replacing the strategy resets it.
#[derive(Debug, Default)]
pub struct CooldownBook {
    last_fire_ms: HashMap<usize, i64>,
}

impl CooldownBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn due(&self, rule_index: usize, cooldown_ms: i64, now_ms: i64) -> bool {
        match self.last_fire_ms.get(&rule_index) {
            Some(last) => now_ms - last >= cooldown_ms,
            None => true,
        }
    }

    pub fn record(&mut self, rule_index: usize, now_ms: i64) {
        self.last_fire_ms.insert(rule_index, now_ms);
    }

    pub fn reset(&mut self) {
        self.last_fire_ms.clear();
    }
}
