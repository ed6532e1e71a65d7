//! Prompt templates for per-timeframe chart analysis
//! Caller-supplied trading rules are sanitized before they reach the model

use lazy_static::lazy_static;
use regex::Regex;

use super::{TimeframeAnalysis, TimeframeRequest};

lazy_static! {
    /// Pattern to detect potential LLM instruction keywords
    static ref INJECTION_PATTERNS: Regex = Regex::new(
        r"(?i)(ignore\s+previous|system:|assistant:|user:|<\|.*?\|>|```|human:|ai:|forget\s+all|disregard|new\s+instructions?)"
    ).expect("Failed to compile INJECTION_PATTERNS regex - this is a bug in the hardcoded pattern");

    /// Runs of brackets that could break the prompt's JSON example
    static ref EXCESSIVE_SPECIAL_CHARS: Regex = Regex::new(
        r"[{}\[\]<>]{5,}"
    ).expect("Failed to compile EXCESSIVE_SPECIAL_CHARS regex - this is a bug in the hardcoded pattern");
}

/// Strip instruction-like phrases, truncate to `max_length` chars and collapse whitespace
pub fn sanitize_rules(input: &str, max_length: usize) -> String {
    let mut sanitized = INJECTION_PATTERNS.replace_all(input, "[filtered]").to_string();
    sanitized = EXCESSIVE_SPECIAL_CHARS.replace_all(&sanitized, "[chars]").to_string();

    if sanitized.chars().count() > max_length {
        let target_len = max_length.saturating_sub(3);
        sanitized = sanitized.chars().take(target_len).collect();
        // Try to truncate at word boundary
        if let Some(pos) = sanitized.rfind(char::is_whitespace) {
            sanitized.truncate(pos);
        }
        sanitized.push_str("...");
    }

    sanitized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Prompt template builder for cascade steps
pub struct CascadePrompts;

impl CascadePrompts {
    pub fn system_prompt() -> &'static str {
        "You are a professional technical analyst reading price charts. \
         You analyze one timeframe at a time, from the highest to the lowest, \
         and you always respect the structure established by higher timeframes."
    }

    /// Instruction text for one timeframe, including every higher-timeframe conclusion
    pub fn timeframe_prompt(request: &TimeframeRequest<'_>) -> String {
        let higher = request.prior_context.analyses();

        let context_text = if higher.is_empty() {
            "This is the highest timeframe in the cascade. There is no higher-timeframe context; \
             establish the primary trend and the key levels."
                .to_string()
        } else {
            let lines = higher.iter().map(Self::summarize).collect::<Vec<_>>().join("\n");
            let dominant = request
                .prior_context
                .dominant_trend()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "neutral".to_string());
            format!(
                "HIGHER TIMEFRAME CONCLUSIONS (highest first):\n{}\n\nDominant higher-timeframe trend: {}\n\
                 Set alignsWithHigherTF to true only if your directional read on this chart agrees with that trend.",
                lines, dominant
            )
        };

        let rules_text = match request.trading_rules {
            Some(rules) if !rules.is_empty() => format!("\nTRADER'S RULES (apply when proposing an entry):\n{}\n", rules),
            _ => String::new(),
        };

        format!(
            r#"SYMBOL: {symbol}
TIMEFRAME: {interval} (cascade position {position})

{context}
{rules}
TASK:
Analyze the attached {interval} chart. Identify the trend and its strength, support and
resistance levels, notable signals, and, if this timeframe offers an actionable setup
consistent with the higher timeframes, an entry zone.

Respond with valid JSON only:
{{
  "trend": "bullish" | "bearish" | "neutral",
  "trendStrength": "strong" | "moderate" | "weak",
  "keyLevels": {{ "support": [number], "resistance": [number] }},
  "alignsWithHigherTF": boolean,
  "signals": [string],
  "entryZone": {{ "low": number, "high": number }} | null,
  "reasoning": string
}}"#,
            symbol = request.symbol,
            interval = request.interval,
            position = request.position,
            context = context_text,
            rules = rules_text,
        )
    }

    fn summarize(analysis: &TimeframeAnalysis) -> String {
        let entry = analysis
            .entry_zone
            .map(|z| format!(", entry zone {:.4}-{:.4}", z.low, z.high))
            .unwrap_or_default();
        format!(
            "{}. {} [{}]: {} ({:?}), support {:?}, resistance {:?}, signals: {}{}. {}",
            analysis.position + 1,
            analysis.interval,
            if analysis.aligns_with_higher_tf { "aligned" } else { "not aligned" },
            analysis.trend,
            analysis.trend_strength,
            analysis.key_levels.support,
            analysis.key_levels.resistance,
            if analysis.signals.is_empty() {
                "none".to_string()
            } else {
                analysis.signals.join("; ")
            },
            entry,
            analysis.reasoning,
        )
    }
}
