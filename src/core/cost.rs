//! Token usage, pricing and cost accounting
//!
//! Every generation and refinement call is priced, including calls whose
//! output is later discarded. A shared [`CostTracker`] accumulates totals per
//! service across runs and checks them against optional budgets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Token Usage
// ============================================================================

/// Token usage for a request/response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Rough usage for services that report none (about four characters per token).
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        fn tokens(text: &str) -> u32 {
            u32::try_from(text.chars().count().div_ceil(4)).unwrap_or(u32::MAX)
        }
        Self::new(tokens(prompt), tokens(completion))
    }

    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

// ============================================================================
// Provider Pricing
// ============================================================================

/// Pricing information for a provider/model combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPricing {
    pub provider_id: String,
    pub model_id: String,
    /// USD per million input tokens
    pub input_cost_per_million: f64,
    /// USD per million output tokens
    pub output_cost_per_million: f64,
    pub is_free: bool,
}

impl ProviderPricing {
    pub fn new(provider_id: &str, model_id: &str, input: f64, output: f64) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            input_cost_per_million: input,
            output_cost_per_million: output,
            is_free: false,
        }
    }

    /// Pricing for a free model (local inference, test doubles)
    pub fn free(provider_id: &str, model_id: &str) -> Self {
        Self {
            is_free: true,
            ..Self::new(provider_id, model_id, 0.0, 0.0)
        }
    }

    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        if self.is_free {
            return 0.0;
        }
        let input_cost = (usage.input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million;
        let output_cost = (usage.output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million;
        input_cost + output_cost
    }

    /// Known list prices for the models the engine is usually pointed at.
    pub fn for_model(provider: &str, model: &str) -> Option<Self> {
        let (input, output) = match (provider, model) {
            ("claude", m) | ("anthropic", m) if m.contains("opus") => (15.0, 75.0),
            ("claude", m) | ("anthropic", m) if m.contains("sonnet") => (3.0, 15.0),
            ("claude", m) | ("anthropic", m) if m.contains("3-5-haiku") => (0.80, 4.0),
            ("claude", m) | ("anthropic", m) if m.contains("haiku") => (0.25, 1.25),

            ("openai", m) if m.contains("gpt-4o-mini") => (0.15, 0.60),
            ("openai", m) if m.contains("gpt-4o") => (2.50, 10.0),
            ("openai", m) if m.contains("gpt-4-turbo") => (10.0, 30.0),
            ("openai", m) if m.contains("gpt-3.5-turbo") => (0.50, 1.50),

            ("mistral", m) if m.contains("large") => (2.0, 6.0),
            ("mistral", m) if m.contains("small") => (0.2, 0.6),

            ("ollama", _) => return Some(Self::free("ollama", model)),
            _ => return None,
        };
        Some(Self::new(provider, model, input, output))
    }
}

// ============================================================================
// Per-run cost records
// ============================================================================

/// Which logical endpoint served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Primary,
    Refinement,
}

/// Cost of one service call within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCost {
    pub role: ServiceRole,
    pub provider_id: String,
    pub model_id: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

/// All calls made by one run, discarded branches included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCost {
    pub calls: Vec<CallCost>,
}

impl RunCost {
    pub fn push(&mut self, call: CallCost) {
        self.calls.push(call);
    }

    pub fn total_usd(&self) -> f64 {
        self.calls.iter().map(|c| c.cost_usd).sum()
    }

    pub fn total_usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for call in &self.calls {
            total.add(&call.usage);
        }
        total
    }

    pub fn by_role(&self, role: ServiceRole) -> f64 {
        self.calls
            .iter()
            .filter(|c| c.role == role)
            .map(|c| c.cost_usd)
            .sum()
    }
}

// ============================================================================
// Cost Tracker
// ============================================================================

/// Accumulated costs for a single provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCosts {
    pub provider_id: String,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
}

impl ProviderCosts {
    pub fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            ..Default::default()
        }
    }

    pub fn avg_cost_per_request(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_cost_usd / self.request_count as f64
        }
    }

    pub fn record(&mut self, usage: &TokenUsage, cost: f64) {
        self.input_tokens += usage.input_tokens as u64;
        self.output_tokens += usage.output_tokens as u64;
        self.total_cost_usd += cost;
        self.request_count += 1;
    }
}

/// Budget limits for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostBudgetConfig {
    pub monthly_budget_usd: Option<f64>,
    pub daily_budget_usd: Option<f64>,
    /// Fraction of a budget at which [`BudgetStatus::Warning`] is reported.
    pub alert_threshold: f64,
}

impl Default for CostBudgetConfig {
    fn default() -> Self {
        Self {
            monthly_budget_usd: None,
            daily_budget_usd: None,
            alert_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BudgetStatus {
    Ok,
    /// Spend crossed the alert threshold of the tightest budget.
    Warning { used_fraction: f64 },
    Exceeded { used_fraction: f64 },
}

/// Cost totals across runs, per provider and per period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    #[serde(skip)]
    pricing: HashMap<String, ProviderPricing>,
    pub costs: HashMap<String, ProviderCosts>,
    pub total_cost_usd: f64,
    pub monthly_cost: f64,
    pub daily_cost: f64,
    pub budget: CostBudgetConfig,
    /// YYYY-MM
    pub current_month: String,
    /// YYYY-MM-DD
    pub current_day: String,
}

impl CostTracker {
    pub fn new(budget: CostBudgetConfig) -> Self {
        let now = chrono::Utc::now();
        Self {
            budget,
            current_month: now.format("%Y-%m").to_string(),
            current_day: now.format("%Y-%m-%d").to_string(),
            ..Default::default()
        }
    }

    /// Override list pricing for a provider/model.
    pub fn set_pricing(&mut self, pricing: ProviderPricing) {
        let key = format!("{}:{}", pricing.provider_id, pricing.model_id);
        self.pricing.insert(key, pricing);
    }

    /// Custom pricing first, then the built-in table.
    pub fn get_pricing(&self, provider: &str, model: &str) -> Option<ProviderPricing> {
        let key = format!("{}:{}", provider, model);
        self.pricing
            .get(&key)
            .cloned()
            .or_else(|| ProviderPricing::for_model(provider, model))
    }

    /// Price `usage` without recording it. Unknown models cost nothing.
    pub fn price(&self, provider: &str, model: &str, usage: &TokenUsage) -> f64 {
        self.get_pricing(provider, model)
            .map(|p| p.calculate_cost(usage))
            .unwrap_or(0.0)
    }

    /// Record a priced call.
    pub fn record(&mut self, call: &CallCost) {
        self.maybe_reset_periods();
        self.costs
            .entry(call.provider_id.clone())
            .or_insert_with(|| ProviderCosts::new(&call.provider_id))
            .record(&call.usage, call.cost_usd);
        self.total_cost_usd += call.cost_usd;
        self.monthly_cost += call.cost_usd;
        self.daily_cost += call.cost_usd;
    }

    fn maybe_reset_periods(&mut self) {
        let now = chrono::Utc::now();
        let current_month = now.format("%Y-%m").to_string();
        let current_day = now.format("%Y-%m-%d").to_string();

        if current_month != self.current_month {
            self.monthly_cost = 0.0;
            self.current_month = current_month;
        }
        if current_day != self.current_day {
            self.daily_cost = 0.0;
            self.current_day = current_day;
        }
    }

    pub fn is_within_budget(&self) -> bool {
        !matches!(self.budget_status(), BudgetStatus::Exceeded { .. })
    }

    pub fn budget_status(&self) -> BudgetStatus {
        let fractions = [
            self.budget.monthly_budget_usd.map(|b| fraction(self.monthly_cost, b)),
            self.budget.daily_budget_usd.map(|b| fraction(self.daily_cost, b)),
        ];
        let Some(used) = fractions.into_iter().flatten().reduce(f64::max) else {
            return BudgetStatus::Ok;
        };
        if used > 1.0 {
            BudgetStatus::Exceeded {
                used_fraction: used,
            }
        } else if used >= self.budget.alert_threshold {
            BudgetStatus::Warning {
                used_fraction: used,
            }
        } else {
            BudgetStatus::Ok
        }
    }

    pub fn costs_by_provider(&self) -> &HashMap<String, ProviderCosts> {
        &self.costs
    }
}

fn fraction(spent: f64, budget: f64) -> f64 {
    if budget <= 0.0 {
        if spent > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        spent / budget
    }
}
