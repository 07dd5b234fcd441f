use std::collections::HashSet;
use time::Date;

use receipt_league_core::Amount;

use super::Receipt;

/// Amounts closer than this many mills (two cents) are treated as the same total
const AMOUNT_TOLERANCE_MILLS: u64 = 20;
const TEXT_SIMILARITY_THRESHOLD: f64 = 0.4;

/// The comparable parts of a receipt that has not been stored yet
#[derive(Debug, Clone)]
pub struct DuplicateCandidate<'a> {
    pub normalized_store: String,
    pub amount: Amount,
    pub purchase_date: Option<Date>,
    pub text: Option<&'a str>,
}

/// `"Trader Joe's #552"` -> `"traderjoes552"`
pub fn normalize_store_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Jaccard similarity of the words longer than two characters
pub fn text_similarity(first: &str, second: &str) -> f64 {
    fn words(text: &str) -> HashSet<String> {
        text.split_whitespace()
            .filter(|word| word.chars().count() > 2)
            .map(str::to_lowercase)
            .collect()
    }

    let first = words(first);
    let second = words(second);
    let union = first.union(&second).count();
    if union == 0 {
        return 0.0;
    }
    first.intersection(&second).count() as f64 / union as f64
}

fn stores_match(first: &str, second: &str) -> bool {
    if first.is_empty() || second.is_empty() {
        return false;
    }
    first == second || first.contains(second) || second.contains(first)
}

/// First stored receipt that looks like the same purchase
pub fn find_duplicate<'r>(
    candidate: &DuplicateCandidate<'_>,
    existing: &'r [Receipt],
) -> Option<&'r Receipt> {
    existing.iter().find(|receipt| {
        if !stores_match(&candidate.normalized_store, &receipt.normalized_store) {
            return false;
        }
        if candidate.amount.mills_apart(&receipt.amount) >= AMOUNT_TOLERANCE_MILLS {
            return false;
        }

        let same_day = matches!(
            (candidate.purchase_date, receipt.purchase_date),
            (Some(new), Some(old)) if new == old
        );
        if same_day {
            return true;
        }

        match (candidate.text, receipt.ocr_text.as_deref()) {
            (Some(new), Some(old)) if !new.trim().is_empty() && !old.trim().is_empty() => {
                text_similarity(new, old) > TEXT_SIMILARITY_THRESHOLD
            }
            _ => false,
        }
    })
}
