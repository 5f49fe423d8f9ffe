//! Membership program domain types — tier policies, member snapshots,
//! and the decisions the tier engine hands back to callers.
//!
//! Four-tier structure: Bronze → Silver → Gold → VIP. Each tier carries
//! its own spend threshold, visit cadence, and automation switches.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoyaltyError, LoyaltyResult};

// ─── Tier System ────────────────────────────────────────────────────────────

/// Membership tier levels, ordered lowest to highest.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Vip,
}

impl Tier {
    /// Every tier, lowest first.
    pub const ALL: [Tier; 4] = [Tier::Bronze, Tier::Silver, Tier::Gold, Tier::Vip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "BRONZE",
            Tier::Silver => "SILVER",
            Tier::Gold => "GOLD",
            Tier::Vip => "VIP",
        }
    }

    /// Next tier down, or `None` at the floor.
    pub fn lower(&self) -> Option<Tier> {
        match self {
            Tier::Bronze => None,
            Tier::Silver => Some(Tier::Bronze),
            Tier::Gold => Some(Tier::Silver),
            Tier::Vip => Some(Tier::Gold),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BRONZE" => Ok(Tier::Bronze),
            "SILVER" => Ok(Tier::Silver),
            "GOLD" => Ok(Tier::Gold),
            "VIP" => Ok(Tier::Vip),
            other => Err(LoyaltyError::Input(format!("unknown tier '{other}'"))),
        }
    }
}

// ─── Tier Policy ────────────────────────────────────────────────────────────

/// Configured rules for one tier, as edited on the settings page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierPolicy {
    pub tier: Tier,
    /// Discount granted to members of this tier, 0..=100.
    pub discount_percent: f64,
    /// Lifetime spend required to qualify for this tier.
    pub min_spend: f64,
    /// Maximum days between visits to keep active status.
    pub visit_frequency_days: i64,
    /// Days without a visit before an automatic downgrade.
    pub downgrade_threshold_days: i64,
    pub auto_upgrade: bool,
    pub auto_downgrade: bool,
}

impl TierPolicy {
    /// Default rules for a tier, matching the stock program settings.
    pub fn default_for(tier: Tier) -> Self {
        let (discount_percent, min_spend, visit_frequency_days, downgrade_threshold_days) =
            match tier {
                Tier::Bronze => (5.0, 100.0, 30, 45),
                Tier::Silver => (10.0, 500.0, 20, 30),
                Tier::Gold => (15.0, 1000.0, 15, 25),
                Tier::Vip => (20.0, 2000.0, 10, 20),
            };
        Self {
            tier,
            discount_percent,
            min_spend,
            visit_frequency_days,
            downgrade_threshold_days,
            auto_upgrade: true,
            auto_downgrade: true,
        }
    }
}

/// Exactly one policy per tier.
///
/// Construction through [`TierPolicySet::from_policies`] checks shape only
/// (one entry per tier); the ordering and numeric invariants are checked by
/// the engine's validation before a set is activated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "Vec<TierPolicy>", into = "Vec<TierPolicy>")]
pub struct TierPolicySet {
    bronze: TierPolicy,
    silver: TierPolicy,
    gold: TierPolicy,
    vip: TierPolicy,
}

impl TierPolicySet {
    /// Build a set from an unordered list. Fails on a missing or duplicated
    /// tier.
    pub fn from_policies(policies: &[TierPolicy]) -> LoyaltyResult<Self> {
        let mut slots: [Option<TierPolicy>; 4] = [None; 4];
        for policy in policies {
            let slot = &mut slots[Self::index(policy.tier)];
            if slot.is_some() {
                return Err(LoyaltyError::Validation(format!(
                    "duplicate policy for tier {}",
                    policy.tier
                )));
            }
            *slot = Some(*policy);
        }

        let take = |tier: Tier| {
            slots[Self::index(tier)].ok_or_else(|| {
                LoyaltyError::Validation(format!("missing policy for tier {tier}"))
            })
        };

        Ok(Self {
            bronze: take(Tier::Bronze)?,
            silver: take(Tier::Silver)?,
            gold: take(Tier::Gold)?,
            vip: take(Tier::Vip)?,
        })
    }

    pub fn get(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Bronze => &self.bronze,
            Tier::Silver => &self.silver,
            Tier::Gold => &self.gold,
            Tier::Vip => &self.vip,
        }
    }

    /// Copy of this set with one tier's policy replaced.
    pub fn with_policy(&self, policy: TierPolicy) -> Self {
        let mut next = *self;
        match policy.tier {
            Tier::Bronze => next.bronze = policy,
            Tier::Silver => next.silver = policy,
            Tier::Gold => next.gold = policy,
            Tier::Vip => next.vip = policy,
        }
        next
    }

    /// Policies in tier order, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = &TierPolicy> {
        Tier::ALL.into_iter().map(move |t| self.get(t))
    }

    pub fn to_vec(&self) -> Vec<TierPolicy> {
        self.iter().copied().collect()
    }

    fn index(tier: Tier) -> usize {
        match tier {
            Tier::Bronze => 0,
            Tier::Silver => 1,
            Tier::Gold => 2,
            Tier::Vip => 3,
        }
    }
}

impl TryFrom<Vec<TierPolicy>> for TierPolicySet {
    type Error = LoyaltyError;

    fn try_from(policies: Vec<TierPolicy>) -> Result<Self, Self::Error> {
        Self::from_policies(&policies)
    }
}

impl From<TierPolicySet> for Vec<TierPolicy> {
    fn from(set: TierPolicySet) -> Self {
        set.to_vec()
    }
}

impl Default for TierPolicySet {
    fn default() -> Self {
        Self {
            bronze: TierPolicy::default_for(Tier::Bronze),
            silver: TierPolicy::default_for(Tier::Silver),
            gold: TierPolicy::default_for(Tier::Gold),
            vip: TierPolicy::default_for(Tier::Vip),
        }
    }
}

// ─── Members ────────────────────────────────────────────────────────────────

/// Member snapshot supplied by the member directory for one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub total_spent: f64,
    pub last_visit: DateTime<Utc>,
    pub current_tier: Tier,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(
        id: impl Into<String>,
        total_spent: f64,
        last_visit: DateTime<Utc>,
        tier: Tier,
    ) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            email: String::new(),
            total_spent,
            last_visit,
            current_tier: tier,
            points: 0,
            joined_at: None,
        }
    }
}

/// Visit-cadence status shown on the member list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
}

// ─── Decisions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierAction {
    None,
    Upgrade,
    Downgrade,
}

/// Advisory result of a tier evaluation. Applying it is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierDecision {
    pub member_id: String,
    pub current_tier: Tier,
    pub recommended_tier: Tier,
    /// Highest tier the member's spend qualifies for.
    pub eligible_tier: Tier,
    pub action: TierAction,
    pub reason: String,
    pub days_since_visit: i64,
    /// Version of the policy set the decision was computed against.
    pub policy_version: u64,
}

impl TierDecision {
    pub fn is_transition(&self) -> bool {
        self.action != TierAction::None
    }
}
