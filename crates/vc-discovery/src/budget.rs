use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DiscoveryBudget
// ---------------------------------------------------------------------------

/// Hard limits for one discovery run, checked before each worker starts.
///
/// A worker that is already running finishes; exceeding any limit only stops
/// further workers from being invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryBudget {
    pub max_cost_usd: f64,
    pub max_duration: Duration,
    pub max_ai_calls: u32,
    pub max_issues_discovered: usize,
}

impl DiscoveryBudget {
    pub fn quick() -> Self {
        Self {
            max_cost_usd: 0.50,
            max_duration: Duration::from_secs(60),
            max_ai_calls: 20,
            max_issues_discovered: 20,
        }
    }

    pub fn standard() -> Self {
        Self {
            max_cost_usd: 2.0,
            max_duration: Duration::from_secs(300),
            max_ai_calls: 100,
            max_issues_discovered: 50,
        }
    }

    pub fn thorough() -> Self {
        Self {
            max_cost_usd: 10.0,
            max_duration: Duration::from_secs(900),
            max_ai_calls: 500,
            max_issues_discovered: 100,
        }
    }

    /// Returns a reason string naming the first exceeded limit, or `None`
    /// when the run may continue.
    pub fn check(&self, totals: &RunningTotals, elapsed: Duration) -> Option<String> {
        if totals.cost_usd >= self.max_cost_usd {
            return Some(format!(
                "max_cost exceeded: ${:.2} >= ${:.2}",
                totals.cost_usd, self.max_cost_usd
            ));
        }
        if elapsed >= self.max_duration {
            return Some(format!(
                "max_duration exceeded: {:?} >= {:?}",
                elapsed, self.max_duration
            ));
        }
        if totals.ai_calls >= self.max_ai_calls {
            return Some(format!(
                "max_ai_calls exceeded: {} >= {}",
                totals.ai_calls, self.max_ai_calls
            ));
        }
        if totals.issues_discovered >= self.max_issues_discovered {
            return Some(format!(
                "max_issues_discovered exceeded: {} >= {}",
                totals.issues_discovered, self.max_issues_discovered
            ));
        }
        None
    }
}

impl Default for DiscoveryBudget {
    fn default() -> Self {
        Self::standard()
    }
}

/// Running totals accumulated between budget checks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningTotals {
    pub cost_usd: f64,
    pub ai_calls: u32,
    pub issues_discovered: usize,
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

/// A named bundle of budget plus a fixed worker list.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: &'static str,
    pub budget: DiscoveryBudget,
    pub workers: &'static [&'static str],
}

/// Look up a preset by name.
pub fn preset(name: &str) -> Option<Preset> {
    match name {
        "quick" => Some(Preset {
            name: "quick",
            budget: DiscoveryBudget::quick(),
            workers: &["todo-scan", "repo-hygiene"],
        }),
        "standard" => Some(Preset {
            name: "standard",
            budget: DiscoveryBudget::standard(),
            workers: &["todo-scan", "code-structure", "repo-hygiene"],
        }),
        "thorough" => Some(Preset {
            name: "thorough",
            budget: DiscoveryBudget::thorough(),
            workers: &[
                "todo-scan",
                "code-structure",
                "doc-coverage",
                "repo-hygiene",
                "test-gap",
            ],
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_passes_when_under_every_limit() {
        let budget = DiscoveryBudget::standard();
        let totals = RunningTotals {
            cost_usd: 0.5,
            ai_calls: 10,
            issues_discovered: 5,
        };
        assert!(budget.check(&totals, Duration::from_secs(10)).is_none());
    }

    #[test]
    fn budget_names_the_tripped_limit() {
        let budget = DiscoveryBudget::quick();

        let over_calls = RunningTotals {
            ai_calls: 25,
            ..RunningTotals::default()
        };
        let reason = budget.check(&over_calls, Duration::ZERO).unwrap();
        assert!(reason.contains("max_ai_calls"), "{reason}");

        let over_cost = RunningTotals {
            cost_usd: 1.0,
            ..RunningTotals::default()
        };
        let reason = budget.check(&over_cost, Duration::ZERO).unwrap();
        assert!(reason.contains("max_cost"), "{reason}");

        let over_issues = RunningTotals {
            issues_discovered: 20,
            ..RunningTotals::default()
        };
        let reason = budget.check(&over_issues, Duration::ZERO).unwrap();
        assert!(reason.contains("max_issues_discovered"), "{reason}");

        let reason = budget
            .check(&RunningTotals::default(), Duration::from_secs(61))
            .unwrap();
        assert!(reason.contains("max_duration"), "{reason}");
    }

    #[test]
    fn presets_exist_with_expected_budgets() {
        let quick = preset("quick").unwrap();
        assert_eq!(quick.budget.max_ai_calls, 20);
        assert_eq!(quick.budget.max_issues_discovered, 20);

        let standard = preset("standard").unwrap();
        assert_eq!(standard.budget.max_ai_calls, 100);
        assert!(standard.workers.contains(&"code-structure"));

        let thorough = preset("thorough").unwrap();
        assert_eq!(thorough.budget.max_ai_calls, 500);
        assert_eq!(thorough.workers.len(), 5);

        assert!(preset("exhaustive").is_none());
    }
}
