//! 4-tier adaptive risk guard.
//!
//! Tier derives from current bankroll relative to initial. The guard runs
//! after sizing, inside the approval transaction, against the firm's UTC
//! daily counter. It may clamp the stake to the tier cap or veto.

use serde::{Deserialize, Serialize};

use crate::models::{DailyCounter, Portfolio};
use crate::sizing::round_amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Conservative,
    Defensive,
    Recovery,
    Emergency,
    Suspended,
}

impl Tier {
    /// Thresholds are inclusive on the lower bound: exactly 0.70x initial
    /// is Defensive, not Recovery.
    pub fn from_ratio(ratio: f64) -> Tier {
        if ratio >= 0.85 {
            Tier::Conservative
        } else if ratio >= 0.70 {
            Tier::Defensive
        } else if ratio >= 0.60 {
            Tier::Recovery
        } else if ratio >= 0.50 {
            Tier::Emergency
        } else {
            Tier::Suspended
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Conservative => "conservative",
            Tier::Defensive => "defensive",
            Tier::Recovery => "recovery",
            Tier::Emergency => "emergency",
            Tier::Suspended => "suspended",
        }
    }

    /// Per-bet cap as a fraction of initial bankroll.
    pub fn max_bet_fraction(&self) -> Option<f64> {
        match self {
            Tier::Conservative => Some(0.02),
            Tier::Defensive => Some(0.01),
            Tier::Recovery => Some(0.005),
            Tier::Emergency => Some(0.0025),
            Tier::Suspended => None,
        }
    }

    /// Daily realized-loss cap as a fraction of initial bankroll.
    pub fn daily_loss_cap(&self) -> Option<f64> {
        match self {
            Tier::Conservative => Some(0.10),
            Tier::Defensive => Some(0.07),
            Tier::Recovery => Some(0.05),
            Tier::Emergency => Some(0.03),
            Tier::Suspended => None,
        }
    }

    pub fn max_open_positions(&self) -> i64 {
        match self {
            Tier::Conservative => 5,
            Tier::Defensive => 3,
            Tier::Recovery => 2,
            Tier::Emergency => 1,
            Tier::Suspended => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRejection {
    TierSuspended,
    DailyBetCountExceeded,
    DailySpendExceeded,
    DailyLossCapHit,
    CategoryExposureCap,
    InsufficientBalance,
    BelowMinimum,
    BelowMinimumAfterTierCap,
}

impl RiskRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRejection::TierSuspended => "tier_suspended",
            RiskRejection::DailyBetCountExceeded => "daily_bet_count_exceeded",
            RiskRejection::DailySpendExceeded => "daily_spend_exceeded",
            RiskRejection::DailyLossCapHit => "daily_loss_cap_hit",
            RiskRejection::CategoryExposureCap => "category_exposure_cap",
            RiskRejection::InsufficientBalance => "insufficient_balance",
            RiskRejection::BelowMinimum => "below_minimum",
            RiskRejection::BelowMinimumAfterTierCap => "below_minimum_after_tier_cap",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RiskVerdict {
    Approved { size: f64, tier: Tier },
    Rejected { reason: RiskRejection, tier: Tier },
}

/// Snapshot the guard evaluates. Assembled inside the approval transaction
/// so counters and exposure counts cannot race.
#[derive(Debug, Clone)]
pub struct RiskInputs<'a> {
    pub portfolio: &'a Portfolio,
    pub counter: &'a DailyCounter,
    pub open_positions_in_category: i64,
    pub desired_size: f64,
}

#[derive(Debug, Clone)]
pub struct RiskGuard {
    pub daily_bet_cap: i64,
    /// None means uncapped (PRODUCTION mode).
    pub daily_spend_cap: Option<f64>,
    pub min_bet: f64,
}

impl RiskGuard {
    pub fn evaluate(&self, inputs: &RiskInputs<'_>) -> RiskVerdict {
        let portfolio = inputs.portfolio;
        let ratio = if portfolio.initial_balance > 0.0 {
            portfolio.balance / portfolio.initial_balance
        } else {
            0.0
        };
        let tier = Tier::from_ratio(ratio);

        let reject = |reason| RiskVerdict::Rejected { reason, tier };

        let Some(fraction) = tier.max_bet_fraction() else {
            return reject(RiskRejection::TierSuspended);
        };

        if inputs.desired_size <= 0.0 {
            return reject(RiskRejection::BelowMinimum);
        }

        // The floor applies before the caps; it never outranks available
        // balance.
        let mut size = inputs.desired_size.max(self.min_bet);
        if size > portfolio.balance {
            return reject(RiskRejection::InsufficientBalance);
        }

        let tier_cap = fraction * portfolio.initial_balance;
        if size > tier_cap {
            if tier == Tier::Conservative {
                // At full bankroll the floor outranks the percentage cap.
                size = tier_cap.max(self.min_bet);
            } else {
                size = tier_cap;
                if size < self.min_bet {
                    return reject(RiskRejection::BelowMinimumAfterTierCap);
                }
            }
        }
        let size = round_amount(size);
        if size < self.min_bet {
            return reject(RiskRejection::BelowMinimum);
        }

        if inputs.counter.bets_count >= self.daily_bet_cap {
            return reject(RiskRejection::DailyBetCountExceeded);
        }
        if let Some(cap) = self.daily_spend_cap {
            if inputs.counter.spent + size > cap + 1e-9 {
                return reject(RiskRejection::DailySpendExceeded);
            }
        }
        if let Some(loss_fraction) = tier.daily_loss_cap() {
            if inputs.counter.realized_loss >= loss_fraction * portfolio.initial_balance {
                return reject(RiskRejection::DailyLossCapHit);
            }
        }
        if inputs.open_positions_in_category >= tier.max_open_positions() {
            return reject(RiskRejection::CategoryExposureCap);
        }

        RiskVerdict::Approved { size, tier }
    }
}
