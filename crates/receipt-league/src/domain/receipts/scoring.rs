//! Points for a receipt
//!
//! One dollar is worth 1,000 points. Purchases at the promoted retailer are
//! multiplied until the promotion ends (the end day itself still counts).

use receipt_league_core::Amount;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::config::PromotionSettings;

#[derive(Debug, Clone)]
pub struct PromotionRules {
    /// Lowercased fragments matched anywhere in the store name
    retailer_variants: Vec<String>,
    multiplier: u64,
    ends_on: Date,
}

impl From<PromotionSettings> for PromotionRules {
    fn from(settings: PromotionSettings) -> Self {
        Self::new(settings.retailer_variants, settings.multiplier, settings.ends_on)
    }
}

impl PromotionRules {
    pub fn new(retailer_variants: Vec<String>, multiplier: u64, ends_on: Date) -> Self {
        Self {
            retailer_variants: retailer_variants
                .into_iter()
                .map(|variant| variant.trim().to_lowercase())
                .filter(|variant| !variant.is_empty())
                .collect(),
            multiplier: multiplier.max(1),
            ends_on,
        }
    }

    pub fn is_promoted_retailer(&self, store_name: &str) -> bool {
        let store_name = store_name.to_lowercase();
        self.retailer_variants
            .iter()
            .any(|variant| store_name.contains(variant.as_str()))
    }

    pub fn is_running(&self, today: Date) -> bool {
        today <= self.ends_on
    }

    pub fn multiplier_for(&self, store_name: &str, today: Date) -> u64 {
        if self.is_running(today) && self.is_promoted_retailer(store_name) {
            self.multiplier
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub base_points: u64,
    pub multiplier: u64,
    pub points: u64,
}

impl Score {
    pub fn promotion_applied(&self) -> bool {
        self.multiplier > 1
    }
}

/// `floor(dollars * 1000)`, which is the amount in mills
pub fn base_points(amount: Amount) -> u64 {
    amount.mills().max(0) as u64
}

pub fn score_receipt(amount: Amount, store_name: &str, rules: &PromotionRules, today: Date) -> Score {
    let base_points = base_points(amount);
    let multiplier = rules.multiplier_for(store_name, today);
    Score {
        base_points,
        multiplier,
        points: base_points.saturating_mul(multiplier),
    }
}

/// Manually entered totals are never promoted
pub fn score_manual(amount: Amount) -> Score {
    let base_points = base_points(amount);
    Score {
        base_points,
        multiplier: 1,
        points: base_points,
    }
}
