// src/trading/alignment.rs
use crate::config::BasketMode;
use crate::domain::models::{AlignmentResult, BasketMember, Direction};

/// Classify one basket member from its candle closes: the latest close is
/// compared against the mean of the five closes before it, with a
/// configurable deviation band. Members without five prior periods return
/// `None` and are excluded from the vote entirely.
pub fn classify_member(closes: &[f64], delta: f64) -> Option<Direction> {
    if closes.len() < 6 {
        return None;
    }

    let current = closes[closes.len() - 1];
    let window = &closes[closes.len() - 6..closes.len() - 1];
    let mean = window.iter().sum::<f64>() / window.len() as f64;

    if mean <= 0.0 {
        return Some(Direction::Neutral);
    }

    if current > mean * (1.0 + delta) {
        Some(Direction::Bullish)
    } else if current < mean * (1.0 - delta) {
        Some(Direction::Bearish)
    } else {
        Some(Direction::Neutral)
    }
}

/// Classify a member from two consecutive quote ticks (live streaming path).
pub fn classify_from_quote(prev_price: f64, price: f64, delta_pct: f64) -> Direction {
    if prev_price <= 0.0 {
        return Direction::Neutral;
    }
    let pct_change = (price - prev_price) / prev_price * 100.0;
    if pct_change > delta_pct {
        Direction::Bullish
    } else if pct_change < -delta_pct {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

/// Directional-consensus detector over the reference basket.
#[derive(Debug, Clone)]
pub struct AlignmentDetector {
    mode: BasketMode,
    threshold: f64,
}

impl AlignmentDetector {
    pub fn new(mode: BasketMode, threshold: f64) -> Self {
        Self { mode, threshold }
    }

    /// Evaluate the basket vote. Pure: the caller supplies already-classified
    /// members (short-history members must not be in the list).
    pub fn evaluate(&self, members: &[BasketMember]) -> AlignmentResult {
        match self.mode {
            BasketMode::Sector => self.evaluate_sector(members),
            BasketMode::MegaCap => self.evaluate_megacap(members),
        }
    }

    /// Sector mode: the highest-weighted member anchors the vote. A neutral
    /// anchor means no alignment regardless of the rest of the basket.
    fn evaluate_sector(&self, members: &[BasketMember]) -> AlignmentResult {
        let anchor = members.iter().max_by(|a, b| {
            a.weight
                .unwrap_or(0.0)
                .partial_cmp(&b.weight.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let anchor = match anchor {
            Some(anchor) => anchor,
            None => return AlignmentResult::none(),
        };

        if anchor.status.is_neutral() {
            return AlignmentResult::none();
        }

        let combined_weight: f64 = members
            .iter()
            .filter(|m| m.status == anchor.status)
            .map(|m| m.weight.unwrap_or(0.0))
            .sum();

        if combined_weight >= self.threshold {
            AlignmentResult {
                aligned: true,
                direction: anchor.status,
                score: combined_weight,
            }
        } else {
            AlignmentResult::none_with_score(combined_weight)
        }
    }

    /// Mega-cap mode: simple fraction of members leaning one way.
    fn evaluate_megacap(&self, members: &[BasketMember]) -> AlignmentResult {
        if members.is_empty() {
            return AlignmentResult::none();
        }

        let total = members.len() as f64;
        let bullish = members
            .iter()
            .filter(|m| m.status == Direction::Bullish)
            .count() as f64;
        let bearish = members
            .iter()
            .filter(|m| m.status == Direction::Bearish)
            .count() as f64;

        let bullish_pct = bullish / total * 100.0;
        let bearish_pct = bearish / total * 100.0;

        if bullish_pct >= self.threshold {
            AlignmentResult {
                aligned: true,
                direction: Direction::Bullish,
                score: bullish_pct,
            }
        } else if bearish_pct >= self.threshold {
            AlignmentResult {
                aligned: true,
                direction: Direction::Bearish,
                score: bearish_pct,
            }
        } else {
            AlignmentResult::none_with_score(bullish_pct.max(bearish_pct))
        }
    }
}
