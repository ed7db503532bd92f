//! Built-in strategy catalog.
//!
//! A strategy is either the random noise trader or a compiled rule document.
//! The rule-based built-ins are ordinary DSL documents compiled at startup,
//! so they exercise the same path as user-supplied strategies.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use super::{
    compile, ActionDoc, CompiledStrategy, ConditionDoc, RuleDoc, SettingsDoc, StrategyDoc,
    TickerSelector,
};

/// Noise trader settings: each tick, with `trade_probability`, place one
/// market order of random size on a random ticker.
#[derive(Debug, Clone)]
pub struct RandomConfig {
    pub name: String,
    pub trade_probability: f64,
    pub min_quantity: i64,
    pub max_quantity: i64,
}

impl Default for RandomConfig {
    fn default() -> Self {
        Self {
            name: "random trader".to_string(),
            trade_probability: 0.5,
            min_quantity: 1,
            max_quantity: 20,
        }
    }
}

/// Tagged sum over the strategy implementations.
#[derive(Debug, Clone)]
pub enum StrategyKind {
    Random(RandomConfig),
    RuleBased(CompiledStrategy),
}

impl StrategyKind {
    pub fn name(&self) -> &str {
        match self {
            StrategyKind::Random(cfg) => &cfg.name,
            StrategyKind::RuleBased(strategy) => &strategy.name,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            StrategyKind::Random(_) => "random",
            StrategyKind::RuleBased(_) => "rule_based",
        }
    }

    /// Tickers this strategy evaluates; `None` means every listed company.
    pub fn referenced_tickers(&self) -> Option<Vec<String>> {
        match self {
            StrategyKind::Random(_) => None,
            StrategyKind::RuleBased(strategy) => {
                let mut tickers = Vec::new();
                for rule in &strategy.rules {
                    match &rule.ticker {
                        TickerSelector::All => return None,
                        TickerSelector::One(ticker) => {
                            if !tickers.contains(ticker) {
                                tickers.push(ticker.clone());
                            }
                        }
                    }
                }
                Some(tickers)
            }
        }
    }
}

pub struct CatalogEntry {
    pub id: &'static str,
    pub description: &'static str,
    /// The source document for rule-based entries.
    pub doc: Option<StrategyDoc>,
    pub strategy: StrategyKind,
}

pub struct StrategyCatalog {
    entries: Vec<CatalogEntry>,
}

impl StrategyCatalog {
    pub fn builtin() -> Result<Self, Vec<String>> {
        let mut entries = vec![CatalogEntry {
            id: "random-trader",
            description: "Noise trader placing random market orders",
            doc: None,
            strategy: StrategyKind::Random(RandomConfig::default()),
        }];

        for (id, description, doc) in [
            (
                "momentum",
                "Buys strength, sells weakness against the recent average price",
                momentum_doc(),
            ),
            (
                "mean-reversion",
                "Buys dips and unwinds after the price recovers",
                mean_reversion_doc(),
            ),
            (
                "market-maker",
                "Quotes both sides inside a wide spread",
                market_maker_doc(),
            ),
        ] {
            let compiled = compile(&doc)
                .map_err(|errs| errs.into_iter().map(|e| format!("{id}: {e}")).collect::<Vec<_>>())?;
            entries.push(CatalogEntry {
                id,
                description,
                doc: Some(doc),
                strategy: StrategyKind::RuleBased(compiled),
            });
        }

        Ok(Self { entries })
    }

    pub fn list(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

fn condition(metric: &str, operator: &str, value: f64) -> ConditionDoc {
    ConditionDoc {
        metric: metric.to_string(),
        operator: operator.to_string(),
        value: Decimal::from_f64(value).unwrap_or_default(),
    }
}

fn market_action(action: &str, quantity_pct: f64) -> ActionDoc {
    ActionDoc {
        action: action.to_string(),
        order_type: Some("market".to_string()),
        quantity: None,
        quantity_pct: Decimal::from_f64(quantity_pct),
        quantity_all: false,
        price: None,
        price_offset_pct: None,
    }
}

fn momentum_doc() -> StrategyDoc {
    StrategyDoc {
        name: "momentum".to_string(),
        description: Some("Follows short-term price direction".to_string()),
        settings: SettingsDoc {
            max_order_value: Some(Decimal::from(2_000)),
            min_cash_reserve: Some(Decimal::from(100)),
        },
        rules: vec![
            RuleDoc {
                name: "ride strength".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![condition("price_change_pct", ">", 2.0)],
                then: vec![market_action("buy", 25.0)],
                cooldown_seconds: 120,
                priority: 1,
            },
            RuleDoc {
                name: "bail on weakness".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![
                    condition("price_change_pct", "<", -2.0),
                    condition("my_holdings", ">", 0.0),
                ],
                then: vec![ActionDoc {
                    action: "sell".to_string(),
                    order_type: Some("market".to_string()),
                    quantity: None,
                    quantity_pct: None,
                    quantity_all: true,
                    price: None,
                    price_offset_pct: None,
                }],
                cooldown_seconds: 120,
                priority: 2,
            },
        ],
    }
}

fn mean_reversion_doc() -> StrategyDoc {
    StrategyDoc {
        name: "mean reversion".to_string(),
        description: Some("Buys below the recent average, sells above it".to_string()),
        settings: SettingsDoc {
            max_order_value: Some(Decimal::from(1_500)),
            min_cash_reserve: Some(Decimal::from(250)),
        },
        rules: vec![
            RuleDoc {
                name: "buy the dip".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![condition("price_change_pct", "<", -5.0)],
                then: vec![market_action("buy", 50.0)],
                cooldown_seconds: 300,
                priority: 0,
            },
            RuleDoc {
                name: "take profit".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![
                    condition("price_change_pct", ">", 5.0),
                    condition("my_holdings", ">", 0.0),
                ],
                then: vec![ActionDoc {
                    action: "sell".to_string(),
                    order_type: Some("market".to_string()),
                    quantity: None,
                    quantity_pct: Decimal::from_f64(50.0),
                    quantity_all: false,
                    price: None,
                    price_offset_pct: None,
                }],
                cooldown_seconds: 300,
                priority: 0,
            },
        ],
    }
}

fn market_maker_doc() -> StrategyDoc {
    StrategyDoc {
        name: "market maker".to_string(),
        description: Some("Posts passive quotes just inside a wide touch".to_string()),
        settings: SettingsDoc {
            max_order_value: Some(Decimal::from(1_000)),
            min_cash_reserve: Some(Decimal::from(500)),
        },
        rules: vec![
            RuleDoc {
                name: "refresh quotes".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![
                    condition("spread_pct", ">", 1.0),
                    condition("my_open_orders", ">", 2.0),
                ],
                then: vec![ActionDoc {
                    action: "cancel_orders".to_string(),
                    order_type: None,
                    quantity: None,
                    quantity_pct: None,
                    quantity_all: false,
                    price: None,
                    price_offset_pct: None,
                }],
                cooldown_seconds: 60,
                priority: 5,
            },
            RuleDoc {
                name: "bid inside".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![condition("spread_pct", ">", 1.0)],
                then: vec![ActionDoc {
                    action: "buy".to_string(),
                    order_type: Some("limit".to_string()),
                    quantity: None,
                    quantity_pct: Decimal::from_f64(10.0),
                    quantity_all: false,
                    price: None,
                    price_offset_pct: Decimal::from_f64(0.2),
                }],
                cooldown_seconds: 60,
                priority: 0,
            },
            RuleDoc {
                name: "offer inside".to_string(),
                description: None,
                ticker: "all".to_string(),
                when: vec![
                    condition("spread_pct", ">", 1.0),
                    condition("my_holdings", ">", 0.0),
                ],
                then: vec![ActionDoc {
                    action: "sell".to_string(),
                    order_type: Some("limit".to_string()),
                    quantity: None,
                    quantity_pct: Decimal::from_f64(25.0),
                    quantity_all: false,
                    price: None,
                    price_offset_pct: Decimal::from_f64(-0.2),
                }],
                cooldown_seconds: 60,
                priority: 0,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_compile() {
        let catalog = StrategyCatalog::builtin().unwrap();
        assert!(catalog.get("random-trader").is_some());
        assert!(catalog.get("momentum").is_some());
        assert!(catalog.get("mean-reversion").is_some());
        assert!(catalog.get("market-maker").is_some());
        assert!(catalog.get("nope").is_none());
    }

    #[test]
    fn referenced_tickers_detects_all() {
        let catalog = StrategyCatalog::builtin().unwrap();
        let momentum = &catalog.get("momentum").unwrap().strategy;
        assert_eq!(momentum.referenced_tickers(), None);
    }
}
