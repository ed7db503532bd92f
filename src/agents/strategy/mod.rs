//! Rule-based strategy DSL.
//!
//! A strategy document is a list of prioritized IF/THEN rules over market and
//! own-account metrics. Documents are validated up front; the compiler
//! collects every problem instead of stopping at the first, so the validate
//! endpoint can report them all.

mod catalog;

pub use catalog::{CatalogEntry, RandomConfig, StrategyCatalog, StrategyKind};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Document (wire) types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: SettingsDoc,
    pub rules: Vec<RuleDoc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_order_value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cash_reserve: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `all` or a single ticker symbol.
    #[serde(default = "default_ticker")]
    pub ticker: String,
    pub when: Vec<ConditionDoc>,
    pub then: Vec<ActionDoc>,
    #[serde(default)]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub priority: i32,
}

fn default_ticker() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDoc {
    pub metric: String,
    pub operator: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDoc {
    /// `buy`, `sell` or `cancel_orders`.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_pct: Option<Decimal>,
    #[serde(default)]
    pub quantity_all: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_offset_pct: Option<Decimal>,
}

// ============================================================================
// Compiled types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Price,
    PriceChangePct,
    BidPrice,
    AskPrice,
    SpreadPct,
    MyCash,
    MyHoldings,
    MyPositionValue,
    MyOpenOrders,
}

impl Metric {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "price" => Some(Metric::Price),
            "price_change_pct" => Some(Metric::PriceChangePct),
            "bid_price" => Some(Metric::BidPrice),
            "ask_price" => Some(Metric::AskPrice),
            "spread_pct" => Some(Metric::SpreadPct),
            "my_cash" => Some(Metric::MyCash),
            "my_holdings" => Some(Metric::MyHoldings),
            "my_position_value" => Some(Metric::MyPositionValue),
            "my_open_orders" => Some(Metric::MyOpenOrders),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            "==" => Some(Operator::Eq),
            "!=" => Some(Operator::Ne),
            _ => None,
        }
    }

    pub fn apply(self, lhs: Decimal, rhs: Decimal) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickerSelector {
    All,
    One(String),
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub metric: Metric,
    pub operator: Operator,
    pub value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Buy,
    Sell,
    CancelOrders,
}

#[derive(Debug, Clone, Copy)]
pub enum Sizing {
    Quantity(i64),
    Pct(Decimal),
    All,
}

#[derive(Debug, Clone, Copy)]
pub enum Pricing {
    Limit(Decimal),
    /// Percent offset from the touch on the action's side.
    OffsetPct(Decimal),
    Market,
}

#[derive(Debug, Clone)]
pub struct CompiledAction {
    pub kind: ActionKind,
    /// `None` only for cancel_orders.
    pub sizing: Option<Sizing>,
    pub pricing: Pricing,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub ticker: TickerSelector,
    pub when: Vec<Condition>,
    pub then: Vec<CompiledAction>,
    pub cooldown_ms: i64,
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub max_order_value: Option<Decimal>,
    pub min_cash_reserve: Decimal,
}

#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    pub name: String,
    pub description: Option<String>,
    pub settings: StrategySettings,
    /// Sorted by (priority desc, document order).
    pub rules: Vec<CompiledRule>,
}

// ============================================================================
// Compiler
// ============================================================================

/// Validate and compile a strategy document. All problems are reported.
pub fn compile(doc: &StrategyDoc) -> Result<CompiledStrategy, Vec<String>> {
    let mut errors = Vec::new();

    if doc.name.trim().is_empty() {
        errors.push("strategy name is empty".to_string());
    }
    if doc.rules.is_empty() {
        errors.push("strategy has no rules".to_string());
    }
    if let Some(value) = doc.settings.max_order_value {
        if value <= Decimal::ZERO {
            errors.push("settings.max_order_value must be positive".to_string());
        }
    }
    if let Some(value) = doc.settings.min_cash_reserve {
        if value < Decimal::ZERO {
            errors.push("settings.min_cash_reserve must not be negative".to_string());
        }
    }

    let mut compiled_rules = Vec::new();
    for (index, rule) in doc.rules.iter().enumerate() {
        let label = if rule.name.trim().is_empty() {
            format!("rule #{index}")
        } else {
            format!("rule '{}'", rule.name)
        };

        let ticker = if rule.ticker.eq_ignore_ascii_case("all") {
            TickerSelector::All
        } else {
            let symbol = rule.ticker.to_uppercase();
            if !crate::models::Company::is_valid_ticker(&symbol) {
                errors.push(format!("{label}: invalid ticker {:?}", rule.ticker));
            }
            TickerSelector::One(symbol)
        };

        if rule.when.is_empty() {
            errors.push(format!("{label}: 'when' must not be empty"));
        }
        if rule.then.is_empty() {
            errors.push(format!("{label}: 'then' must not be empty"));
        }

        let mut when = Vec::new();
        let mut sees_holdings = false;
        for cond in &rule.when {
            let metric = match Metric::from_name(&cond.metric) {
                Some(metric) => metric,
                None => {
                    errors.push(format!("{label}: unknown metric {:?}", cond.metric));
                    continue;
                }
            };
            if metric == Metric::MyHoldings {
                sees_holdings = true;
            }
            let operator = match Operator::from_symbol(&cond.operator) {
                Some(op) => op,
                None => {
                    errors.push(format!("{label}: unknown operator {:?}", cond.operator));
                    continue;
                }
            };
            when.push(Condition {
                metric,
                operator,
                value: cond.value,
            });
        }

        let mut then = Vec::new();
        for action in &rule.then {
            match compile_action(action, sees_holdings) {
                Ok(compiled) => then.push(compiled),
                Err(mut errs) => {
                    errors.extend(errs.drain(..).map(|e| format!("{label}: {e}")));
                }
            }
        }

        compiled_rules.push(CompiledRule {
            name: rule.name.clone(),
            ticker,
            when,
            then,
            cooldown_ms: (rule.cooldown_seconds as i64).saturating_mul(1000),
            priority: rule.priority,
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // Stable sort keeps document order within a priority band.
    compiled_rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

    Ok(CompiledStrategy {
        name: doc.name.clone(),
        description: doc.description.clone(),
        settings: StrategySettings {
            max_order_value: doc.settings.max_order_value,
            min_cash_reserve: doc.settings.min_cash_reserve.unwrap_or(Decimal::ZERO),
        },
        rules: compiled_rules,
    })
}

fn compile_action(action: &ActionDoc, rule_sees_holdings: bool) -> Result<CompiledAction, Vec<String>> {
    let mut errors = Vec::new();

    let kind = match action.action.as_str() {
        "buy" => ActionKind::Buy,
        "sell" => ActionKind::Sell,
        "cancel_orders" => ActionKind::CancelOrders,
        other => {
            return Err(vec![format!("unknown action {:?}", other)]);
        }
    };

    if kind == ActionKind::CancelOrders {
        if action.quantity.is_some()
            || action.quantity_pct.is_some()
            || action.quantity_all
            || action.price.is_some()
            || action.price_offset_pct.is_some()
            || action.order_type.is_some()
        {
            return Err(vec![
                "cancel_orders takes no sizing, price or order_type".to_string()
            ]);
        }
        return Ok(CompiledAction {
            kind,
            sizing: None,
            pricing: Pricing::Market,
        });
    }

    // Sizing: exactly one of quantity / quantity_pct / quantity_all.
    let mut sizings = Vec::new();
    if let Some(quantity) = action.quantity {
        if quantity <= 0 {
            errors.push("quantity must be positive".to_string());
        }
        sizings.push(Sizing::Quantity(quantity));
    }
    if let Some(pct) = action.quantity_pct {
        if pct <= Decimal::ZERO || pct > Decimal::from(100) {
            errors.push("quantity_pct must be in (0, 100]".to_string());
        }
        sizings.push(Sizing::Pct(pct));
    }
    if action.quantity_all {
        sizings.push(Sizing::All);
    }
    let sizing = match sizings.len() {
        0 => {
            errors.push("missing sizing: one of quantity, quantity_pct, quantity_all".to_string());
            None
        }
        1 => sizings.pop(),
        _ => {
            errors.push("contradictory sizing: give exactly one of quantity, quantity_pct, quantity_all".to_string());
            None
        }
    };

    if kind == ActionKind::Sell
        && matches!(sizing, Some(Sizing::Pct(_)) | Some(Sizing::All))
        && !rule_sees_holdings
    {
        errors.push(
            "sell with quantity_pct/quantity_all requires a my_holdings condition".to_string(),
        );
    }

    // Pricing: explicit price, an offset from the touch, or market.
    let market_type = match action.order_type.as_deref() {
        None | Some("limit") => false,
        Some("market") => true,
        Some(other) => {
            errors.push(format!("unknown order_type {:?}", other));
            false
        }
    };
    let pricing = match (action.price, action.price_offset_pct) {
        (Some(_), Some(_)) => {
            errors.push("give either price or price_offset_pct, not both".to_string());
            Pricing::Market
        }
        (Some(price), None) => {
            if market_type {
                errors.push("market orders must not carry a price".to_string());
            }
            if crate::utils::money::to_cents(price).filter(|c| *c > 0).is_none() {
                errors.push("price must be positive with at most 2 decimals".to_string());
            }
            Pricing::Limit(price)
        }
        (None, Some(offset)) => {
            if market_type {
                errors.push("market orders must not carry a price offset".to_string());
            }
            Pricing::OffsetPct(offset)
        }
        (None, None) => {
            if !market_type {
                errors.push(
                    "limit actions need price or price_offset_pct; use order_type: market otherwise"
                        .to_string(),
                );
            }
            Pricing::Market
        }
    };

    if errors.is_empty() {
        Ok(CompiledAction {
            kind,
            sizing,
            pricing,
        })
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy_action() -> ActionDoc {
        ActionDoc {
            action: "buy".to_string(),
            order_type: Some("market".to_string()),
            quantity: Some(10),
            quantity_pct: None,
            quantity_all: false,
            price: None,
            price_offset_pct: None,
        }
    }

    fn minimal_doc() -> StrategyDoc {
        StrategyDoc {
            name: "dip buyer".to_string(),
            description: None,
            settings: SettingsDoc::default(),
            rules: vec![RuleDoc {
                name: "buy the dip".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![ConditionDoc {
                    metric: "price_change_pct".to_string(),
                    operator: "<".to_string(),
                    value: dec!(-5),
                }],
                then: vec![buy_action()],
                cooldown_seconds: 300,
                priority: 0,
            }],
        }
    }

    #[test]
    fn compiles_minimal_strategy() {
        let compiled = compile(&minimal_doc()).unwrap();
        assert_eq!(compiled.rules.len(), 1);
        assert_eq!(compiled.rules[0].cooldown_ms, 300_000);
        assert_eq!(compiled.rules[0].ticker, TickerSelector::All);
        assert_eq!(compiled.settings.min_cash_reserve, Decimal::ZERO);
    }

    #[test]
    fn rejects_unknown_metric_and_operator() {
        let mut doc = minimal_doc();
        doc.rules[0].when = vec![
            ConditionDoc {
                metric: "moon_phase".to_string(),
                operator: "<".to_string(),
                value: dec!(1),
            },
            ConditionDoc {
                metric: "price".to_string(),
                operator: "~=".to_string(),
                value: dec!(1),
            },
        ];
        let errors = compile(&doc).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown metric")));
        assert!(errors.iter().any(|e| e.contains("unknown operator")));
    }

    #[test]
    fn rejects_empty_when_and_then() {
        let mut doc = minimal_doc();
        doc.rules[0].when.clear();
        doc.rules[0].then.clear();
        let errors = compile(&doc).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("'when'")));
        assert!(errors.iter().any(|e| e.contains("'then'")));
    }

    #[test]
    fn rejects_contradictory_sizing() {
        let mut doc = minimal_doc();
        doc.rules[0].then[0].quantity = Some(5);
        doc.rules[0].then[0].quantity_pct = Some(dec!(50));
        let errors = compile(&doc).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("contradictory sizing")));
    }

    #[test]
    fn sell_all_requires_holdings_condition() {
        let mut doc = minimal_doc();
        doc.rules[0].then = vec![ActionDoc {
            action: "sell".to_string(),
            order_type: Some("market".to_string()),
            quantity: None,
            quantity_pct: None,
            quantity_all: true,
            price: None,
            price_offset_pct: None,
        }];
        let errors = compile(&doc).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("my_holdings")));

        doc.rules[0].when.push(ConditionDoc {
            metric: "my_holdings".to_string(),
            operator: ">".to_string(),
            value: dec!(0),
        });
        assert!(compile(&doc).is_ok());
    }

    #[test]
    fn limit_action_without_price_is_rejected() {
        let mut doc = minimal_doc();
        doc.rules[0].then[0].order_type = Some("limit".to_string());
        let errors = compile(&doc).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("price_offset_pct")));
    }

    #[test]
    fn rules_sorted_by_priority_then_document_order() {
        let mut doc = minimal_doc();
        let mut second = doc.rules[0].clone();
        second.name = "low".to_string();
        second.priority = -1;
        let mut third = doc.rules[0].clone();
        third.name = "high".to_string();
        third.priority = 5;
        doc.rules[0].name = "base".to_string();
        doc.rules.push(second);
        doc.rules.push(third);

        let compiled = compile(&doc).unwrap();
        let names: Vec<&str> = compiled.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["high", "base", "low"]);
    }
}
