//! The Risk & Ethics Gate: five weighted risk categories combined into a
//! composite score, banded into a discrete `RiskLevel`, and a
//! proceed/review decision.

use crate::error::RiskError;
use crate::types::{RiskFactor, RiskLevel, RiskResult};

pub const CAPITAL_WEIGHT: f64 = 0.25;
pub const ETHICAL_WEIGHT: f64 = 0.30;
pub const OPERATIONAL_WEIGHT: f64 = 0.20;
pub const REPUTATIONAL_WEIGHT: f64 = 0.15;
pub const LEARNING_WEIGHT: f64 = 0.10;

/// Inputs to the five risk categories, gathered per candidate.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub capital_at_risk_usd: f64,
    pub baseline_capital_usd: f64,
    pub ethical_alignment: f64,
    pub emergence_confidence: f64,
    pub historical_success_rate: f64,
    pub novelty: f64,
    pub reversibility: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskGateConfig {
    pub max_risk_score: f64,
    pub min_ethical_alignment: f64,
    pub moderate_review_threshold: f64,
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            max_risk_score: 0.5,
            min_ethical_alignment: 0.6,
            moderate_review_threshold: 0.3,
        }
    }
}

fn level_for(score: f64) -> RiskLevel {
    if score < 0.1 {
        RiskLevel::Negligible
    } else if score < 0.3 {
        RiskLevel::Low
    } else if score < 0.5 {
        RiskLevel::Moderate
    } else if score < 0.7 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

fn capital_factor(ctx: &RiskContext) -> RiskFactor {
    let probability = if ctx.baseline_capital_usd > 0.0 {
        (ctx.capital_at_risk_usd / ctx.baseline_capital_usd).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let impact = 1.0 - ctx.reversibility.clamp(0.0, 1.0);
    let score = (probability * impact).clamp(0.0, 1.0);
    RiskFactor {
        category: "capital",
        probability,
        impact,
        level: level_for(score),
    }
}

fn ethical_factor(ctx: &RiskContext) -> RiskFactor {
    let probability = 1.0 - ctx.ethical_alignment.clamp(0.0, 1.0);
    let impact = 1.0;
    let score = (probability * impact).clamp(0.0, 1.0);
    RiskFactor {
        category: "ethical",
        probability,
        impact,
        level: level_for(score),
    }
}

fn operational_factor(ctx: &RiskContext) -> RiskFactor {
    let probability = 1.0 - ctx.emergence_confidence.clamp(0.0, 1.0);
    let impact = ctx.novelty.clamp(0.0, 1.0);
    let score = (probability * impact).clamp(0.0, 1.0);
    RiskFactor {
        category: "operational",
        probability,
        impact,
        level: level_for(score),
    }
}

fn reputational_factor(ctx: &RiskContext) -> RiskFactor {
    let probability = 1.0 - ctx.historical_success_rate.clamp(0.0, 1.0);
    let impact = (1.0 - ctx.reversibility.clamp(0.0, 1.0)).max(0.2);
    let score = (probability * impact).clamp(0.0, 1.0);
    RiskFactor {
        category: "reputational",
        probability,
        impact,
        level: level_for(score),
    }
}

fn learning_factor(ctx: &RiskContext) -> RiskFactor {
    let probability = ctx.novelty.clamp(0.0, 1.0);
    let impact = 1.0 - ctx.emergence_confidence.clamp(0.0, 1.0);
    let score = (probability * impact).clamp(0.0, 1.0);
    RiskFactor {
        category: "learning",
        probability,
        impact,
        level: level_for(score),
    }
}

fn mitigation_for(factor: &RiskFactor) -> Option<String> {
    if matches!(factor.level, RiskLevel::Negligible) {
        return None;
    }
    Some(match factor.category {
        "capital" => "reduce position size relative to baseline capital".to_string(),
        "ethical" => "raise ethical-alignment score before proceeding".to_string(),
        "operational" => "increase forecast confidence or simplify the candidate".to_string(),
        "reputational" => "prefer reversible execution paths".to_string(),
        "learning" => "treat as exploratory; cap size pending more history".to_string(),
        other => format!("review {other} factor"),
    })
}

/// Evaluate the five weighted categories and produce a gate decision.
/// The weights are asserted to sum to 1.0 (±epsilon) to catch a
/// misconfiguration immediately rather than silently skewing the
/// composite.
pub fn evaluate(ctx: &RiskContext, cfg: &RiskGateConfig) -> Result<RiskResult, RiskError> {
    let weight_sum =
        CAPITAL_WEIGHT + ETHICAL_WEIGHT + OPERATIONAL_WEIGHT + REPUTATIONAL_WEIGHT + LEARNING_WEIGHT;
    if (weight_sum - 1.0).abs() > 1e-9 {
        return Err(RiskError::InvalidWeights(weight_sum));
    }

    let factors = vec![
        capital_factor(ctx),
        ethical_factor(ctx),
        operational_factor(ctx),
        reputational_factor(ctx),
        learning_factor(ctx),
    ];
    let weights = [
        CAPITAL_WEIGHT,
        ETHICAL_WEIGHT,
        OPERATIONAL_WEIGHT,
        REPUTATIONAL_WEIGHT,
        LEARNING_WEIGHT,
    ];

    let composite_score: f64 = factors
        .iter()
        .zip(weights.iter())
        .map(|(f, w)| w * f.probability * f.impact)
        .sum::<f64>()
        .clamp(0.0, 1.0);

    let overall_level = level_for(composite_score);
    let any_critical = factors.iter().any(|f| matches!(f.level, RiskLevel::Critical));
    let any_high = factors.iter().any(|f| matches!(f.level, RiskLevel::High));

    let should_proceed = composite_score <= cfg.max_risk_score
        && !any_critical
        && ctx.ethical_alignment >= cfg.min_ethical_alignment;

    let requires_review = composite_score >= cfg.moderate_review_threshold || any_high;

    let mut recommendations: Vec<String> = factors.iter().filter_map(mitigation_for).collect();
    recommendations.sort();
    recommendations.dedup();

    Ok(RiskResult {
        overall_level,
        composite_score,
        factors,
        should_proceed,
        requires_review,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn benign_context() -> RiskContext {
        RiskContext {
            capital_at_risk_usd: 100.0,
            baseline_capital_usd: 10_000.0,
            ethical_alignment: 0.9,
            emergence_confidence: 0.9,
            historical_success_rate: 0.9,
            novelty: 0.1,
            reversibility: 0.9,
        }
    }

    #[test]
    fn low_risk_context_proceeds() {
        let result = evaluate(&benign_context(), &RiskGateConfig::default()).unwrap();
        assert!(result.should_proceed);
        assert!(matches!(result.overall_level, RiskLevel::Negligible | RiskLevel::Low));
    }

    #[test]
    fn low_ethical_alignment_blocks_proceeding() {
        let mut ctx = benign_context();
        ctx.ethical_alignment = 0.2;
        let result = evaluate(&ctx, &RiskGateConfig::default()).unwrap();
        assert!(!result.should_proceed);
    }

    #[test]
    fn high_capital_at_risk_and_low_reversibility_is_flagged() {
        let mut ctx = benign_context();
        ctx.capital_at_risk_usd = 9_500.0;
        ctx.reversibility = 0.05;
        let result = evaluate(&ctx, &RiskGateConfig::default()).unwrap();
        assert!(result.requires_review || !result.should_proceed);
    }

    #[test]
    fn recommendations_are_deduplicated() {
        let mut ctx = benign_context();
        ctx.ethical_alignment = 0.3;
        ctx.historical_success_rate = 0.1;
        let result = evaluate(&ctx, &RiskGateConfig::default()).unwrap();
        let unique: std::collections::HashSet<_> = result.recommendations.iter().collect();
        assert_eq!(unique.len(), result.recommendations.len());
    }
}
