//! Reduce an ordered cascade into one recommendation
//!
//! Alignment counts the root timeframe as aligned with itself: `full` when
//! every lower timeframe agrees, `partial` when aligned timeframes are a strict
//! majority of the chain, `none` otherwise. Confidence lives in a band per
//! alignment level so that full > partial > none always holds.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{EntryZone, TimeframeAnalysis, Trend};

/// Confidence bands as (min, max) per alignment level
const FULL_BAND: (f64, f64) = (0.75, 0.95);
const PARTIAL_BAND: (f64, f64) = (0.50, 0.70);
const NONE_BAND: (f64, f64) = (0.10, 0.40);

/// Take-profit targets beyond the entry, when no resistance/support levels qualify
const FALLBACK_REWARD_MULTIPLES: [f64; 2] = [2.0, 3.0];
const MAX_TAKE_PROFITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Long,
    Short,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    None,
    Partial,
    Full,
}

impl Alignment {
    fn band(&self) -> (f64, f64) {
        match self {
            Alignment::Full => FULL_BAND,
            Alignment::Partial => PARTIAL_BAND,
            Alignment::None => NONE_BAND,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePlan {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: Vec<f64>,
    pub risk_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisResult {
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub alignment: Alignment,
    /// Absent when the lowest timeframe offers no actionable entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_plan: Option<TradePlan>,
}

/// Classify how well the lower timeframes agree with the ones above them
pub fn alignment(analyses: &[TimeframeAnalysis]) -> Alignment {
    let lower = analyses.iter().skip(1);
    let lower_count = analyses.len().saturating_sub(1);
    let aligned_lower = lower.filter(|a| a.aligns_with_higher_tf).count();

    if aligned_lower == lower_count {
        return Alignment::Full;
    }

    // root counts as aligned with itself
    let aligned_total = aligned_lower + 1;
    if aligned_total * 2 > analyses.len() {
        Alignment::Partial
    } else {
        Alignment::None
    }
}

/// Synthesize a recommendation from a non-empty, highest-first cascade.
///
/// Returns `None` for an empty slice.
pub fn synthesize(analyses: &[TimeframeAnalysis]) -> Option<SynthesisResult> {
    let lowest = analyses.last()?;
    let alignment = alignment(analyses);

    let recommendation = match (alignment, lowest.entry_zone, lowest.trend) {
        (Alignment::None, _, _) | (_, None, _) => Recommendation::Neutral,
        (_, Some(_), Trend::Bullish) => Recommendation::Long,
        (_, Some(_), Trend::Bearish) => Recommendation::Short,
        (_, Some(_), Trend::Neutral) => Recommendation::Neutral,
    };

    let confidence = confidence(analyses, alignment);

    let trade_plan = match (recommendation, lowest.entry_zone) {
        (Recommendation::Long, Some(zone)) => Some(build_plan(analyses, zone, true)),
        (Recommendation::Short, Some(zone)) => Some(build_plan(analyses, zone, false)),
        _ => None,
    };

    info!(
        ?recommendation,
        ?alignment,
        confidence,
        timeframes = analyses.len(),
        "Cascade synthesis complete"
    );

    Some(SynthesisResult {
        recommendation,
        confidence,
        alignment,
        trade_plan,
    })
}

/// Place confidence inside the alignment's band by trend strength and
/// directional agreement with the lowest timeframe.
fn confidence(analyses: &[TimeframeAnalysis], alignment: Alignment) -> f64 {
    let (min, max) = alignment.band();
    let n = analyses.len().max(1) as f64;

    let strength = analyses.iter().map(|a| a.trend_strength.weight()).sum::<f64>() / n;

    let agreement = match analyses.last().map(|a| a.trend) {
        Some(trend) if trend.is_directional() => {
            analyses.iter().filter(|a| a.trend == trend).count() as f64 / n
        }
        _ => 0.0,
    };

    let score = (0.5 * strength + 0.5 * agreement).clamp(0.0, 1.0);
    let value = min + (max - min) * score;
    (value * 1000.0).round() / 1000.0
}

fn build_plan(analyses: &[TimeframeAnalysis], zone: EntryZone, long: bool) -> TradePlan {
    let entry = zone.midpoint();
    let lowest = &analyses[analyses.len() - 1];
    let width = (zone.high - zone.low).abs();

    let stop_loss = if long {
        lowest
            .key_levels
            .support
            .iter()
            .copied()
            .filter(|s| *s < zone.low)
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
            .unwrap_or(if width > 0.0 { zone.low - width } else { zone.low * 0.99 })
    } else {
        lowest
            .key_levels
            .resistance
            .iter()
            .copied()
            .filter(|r| *r > zone.high)
            .fold(None, |best: Option<f64>, r| Some(best.map_or(r, |b| b.min(r))))
            .unwrap_or(if width > 0.0 { zone.high + width } else { zone.high * 1.01 })
    };

    let risk = (entry - stop_loss).abs();

    // Targets come from every timeframe's levels on the profit side of the entry
    let mut targets: Vec<f64> = analyses
        .iter()
        .flat_map(|a| {
            if long {
                a.key_levels.resistance.iter()
            } else {
                a.key_levels.support.iter()
            }
        })
        .copied()
        .filter(|level| if long { *level > zone.high } else { *level < zone.low })
        .collect();

    if long {
        targets.sort_by(|a, b| a.total_cmp(b));
    } else {
        targets.sort_by(|a, b| b.total_cmp(a));
    }
    targets.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    targets.truncate(MAX_TAKE_PROFITS);

    if targets.is_empty() {
        targets = FALLBACK_REWARD_MULTIPLES
            .iter()
            .map(|m| if long { entry + m * risk } else { entry - m * risk })
            .collect();
    }

    let risk_percentage = if entry.abs() > f64::EPSILON {
        (risk / entry.abs() * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    };

    TradePlan {
        entry,
        stop_loss,
        take_profit: targets,
        risk_percentage,
    }
}
