//! Ranking heuristics for detected patterns
//!
//! Every signal is normalized to [0, 1] and weighted into a composite. The
//! lexical signals are keyword heuristics; their weights are tuning knobs.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const COUNT_WEIGHT: f64 = 2.0;
pub const DIVERSITY_WEIGHT: f64 = 0.5;
pub const COHERENCE_WEIGHT: f64 = 2.0;
pub const COMPLEXITY_WEIGHT: f64 = 1.5;
pub const SUCCESS_WEIGHT: f64 = 1.0;
pub const CONTEXT_WEIGHT: f64 = 0.5;
pub const HABITUAL_WEIGHT: f64 = 0.5;

/// Days over which the recency bonus decays to zero
pub const RECENCY_WINDOW_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternScore {
    pub count_score: f64,
    pub diversity_bonus: f64,
    pub coherence_bonus: f64,
    pub recency_bonus: f64,
    pub complexity_bonus: f64,
    pub success_bonus: f64,
    pub context_bonus: f64,
    pub habitual_bonus: f64,
    pub composite: f64,
}

/// Raw cluster measurements the score is computed from
pub struct ScoreInputs<'a> {
    pub member_count: usize,
    pub session_count: usize,
    pub avg_pairwise_similarity: f64,
    pub representative: &'a str,
    pub contents: &'a [&'a str],
    pub timestamps: &'a [DateTime<Utc>],
    pub now: DateTime<Utc>,
}

impl PatternScore {
    pub fn compute(inputs: &ScoreInputs<'_>) -> Self {
        let count_score = ((inputs.member_count as f64) + 1.0).ln() * COUNT_WEIGHT;
        let diversity = if inputs.member_count == 0 {
            0.0
        } else {
            inputs.session_count as f64 / inputs.member_count as f64
        };
        let diversity_bonus = diversity * DIVERSITY_WEIGHT;
        let coherence_bonus = inputs.avg_pairwise_similarity * COHERENCE_WEIGHT;
        let recency_bonus = inputs
            .timestamps
            .iter()
            .max()
            .map_or(0.0, |latest| recency(*latest, inputs.now));
        let complexity_bonus = prompt_complexity(inputs.representative) * COMPLEXITY_WEIGHT;
        let success_bonus = success_signal(inputs.contents) * SUCCESS_WEIGHT;
        let context_bonus = context_specificity(inputs.representative) * CONTEXT_WEIGHT;
        let habitual_bonus = burst_factor(inputs.timestamps) * HABITUAL_WEIGHT;

        let composite = count_score
            + diversity_bonus
            + coherence_bonus
            + recency_bonus
            + complexity_bonus
            + success_bonus
            + context_bonus
            + habitual_bonus;

        Self {
            count_score,
            diversity_bonus,
            coherence_bonus,
            recency_bonus,
            complexity_bonus,
            success_bonus,
            context_bonus,
            habitual_bonus,
            composite,
        }
    }
}

/// Linear decay from 1 (now) to 0 (thirty days ago or older)
pub fn recency(latest: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - latest).num_seconds() as f64 / 86_400.0;
    (1.0 - days / RECENCY_WINDOW_DAYS).clamp(0.0, 1.0)
}

/// Low for bursts within an hour, high for habits spread over a week or more
pub fn burst_factor(timestamps: &[DateTime<Utc>]) -> f64 {
    let (Some(first), Some(last)) = (timestamps.iter().min(), timestamps.iter().max()) else {
        return 0.2;
    };
    let spread = *last - *first;
    if spread <= Duration::hours(1) {
        0.2
    } else if spread < Duration::hours(24) {
        0.4
    } else if spread < Duration::days(7) {
        0.7
    } else {
        1.0
    }
}

static TECHNICAL_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(api|endpoint|function|method|class|struct|trait|module|test|tests|schema|database|query|migration|deploy|build|compile|refactor|config|dependency|regex|async|thread|cache|index|commit|branch|lint)\b",
    )
    .expect("static regex: technical terms")
});

static QUOTED_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""[^"\n]{2,}"|'[^'\n]{2,}'|`[^`\n]+`"#).expect("static regex: quoted literal")
});

static CODE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"::|->|=>|\(\)|[{}\[\]]|\w+\.\w+\(|--[a-z][a-z-]+")
        .expect("static regex: code token")
});

static FILE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[\w.-]+/)+[\w.-]+|\b[\w-]+\.(?:rs|py|ts|tsx|js|go|java|rb|toml|yaml|yml|json|md|sql|sh)\b")
        .expect("static regex: file path")
});

static LANGUAGE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(rust|python|typescript|javascript|golang|java|kotlin|swift|ruby|sql|react|vue|svelte|django|flask|rails|tokio|node|nextjs|tailwind)\b",
    )
    .expect("static regex: language names")
});

static TOOL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(git|cargo|npm|pnpm|yarn|pip|docker|kubectl|terraform|make|gradle|pytest|jest|clippy|rustfmt|eslint|prettier|gh)\b",
    )
    .expect("static regex: tool names")
});

static IDENTIFIER_CASING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z]+[A-Z][A-Za-z0-9]*\b|\b[a-z0-9]+_[a-z0-9_]+\b")
        .expect("static regex: identifier casing")
});

static POSITIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(thanks|thank you|worked|works now|solved|perfect|great|awesome|fixed it|nice)\b")
        .expect("static regex: positive words")
});

static NEGATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(error|errors|broken|doesn't work|does not work|not working|still failing|wrong|crash|crashes)\b")
        .expect("static regex: negative words")
});

/// Desirability of a prompt's length: short is low, 15-50 words is best
fn length_curve(words: usize) -> f64 {
    match words {
        0..=4 => 0.2,
        5..=14 => 0.2 + 0.8 * (words - 5) as f64 / 10.0,
        15..=50 => 1.0,
        _ => 0.7,
    }
}

/// Combines the length curve with specificity signals
pub fn prompt_complexity(text: &str) -> f64 {
    let length = length_curve(text.split_whitespace().count());
    let signals = [
        TECHNICAL_TERMS.is_match(text),
        QUOTED_LITERAL.is_match(text),
        CODE_TOKEN.is_match(text),
    ];
    let specificity = signals.iter().filter(|&&hit| hit).count() as f64 / signals.len() as f64;
    (0.6 * length + 0.4 * specificity).clamp(0.0, 1.0)
}

/// 0.5 when neutral, towards 1 with positive language, towards 0 with negative
pub fn success_signal(contents: &[&str]) -> f64 {
    let (positive, negative) = contents.iter().fold((0usize, 0usize), |(p, n), text| {
        (
            p + POSITIVE.find_iter(text).count(),
            n + NEGATIVE.find_iter(text).count(),
        )
    });
    let total = positive + negative;
    if total == 0 {
        return 0.5;
    }
    0.5 + 0.5 * (positive as f64 - negative as f64) / total as f64
}

/// Fraction of context markers present: paths, languages, tools, identifier casing
pub fn context_specificity(text: &str) -> f64 {
    let markers = [
        FILE_PATH.is_match(text),
        LANGUAGE_NAME.is_match(text),
        TOOL_NAME.is_match(text),
        IDENTIFIER_CASING.is_match(text),
    ];
    markers.iter().filter(|&&hit| hit).count() as f64 / markers.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn test_recency_decays_linearly() {
        let now = at(0);
        assert!((recency(now, now) - 1.0).abs() < 1e-9);
        assert!((recency(now - Duration::days(15), now) - 0.5).abs() < 1e-9);
        assert_eq!(recency(now - Duration::days(45), now), 0.0);
        // clock skew does not exceed the cap
        assert_eq!(recency(now + Duration::days(1), now), 1.0);
    }

    #[test]
    fn test_burst_bands() {
        assert_eq!(burst_factor(&[at(0), at(1)]), 0.2);
        assert_eq!(burst_factor(&[at(0), at(5)]), 0.4);
        assert_eq!(burst_factor(&[at(0), at(72)]), 0.7);
        assert_eq!(burst_factor(&[at(0), at(24 * 8)]), 1.0);
        assert_eq!(burst_factor(&[]), 0.2);
    }

    #[test]
    fn test_complexity_prefers_specific_mid_length_prompts() {
        let short = prompt_complexity("fix it");
        let specific = prompt_complexity(
            "refactor the `parse_config()` function in src/config.rs so the database path \
             honours the \"REFRAIN_DB\" override and add a test for it",
        );
        let long_vague = prompt_complexity(&"word ".repeat(80));
        assert!(short < 0.3);
        assert!(specific > 0.9);
        assert!(long_vague < specific);
    }

    #[test]
    fn test_success_signal_is_centered() {
        assert_eq!(success_signal(&["run the suite"]), 0.5);
        assert_eq!(success_signal(&["thanks, that worked"]), 1.0);
        assert_eq!(success_signal(&["still broken, same error"]), 0.0);
        assert_eq!(success_signal(&["thanks", "error"]), 0.5);
    }

    #[test]
    fn test_context_markers() {
        assert_eq!(context_specificity("hello there"), 0.0);
        let full = context_specificity("run cargo test on src/lib.rs for the Rust parseLine helper");
        assert_eq!(full, 1.0);
    }

    #[test]
    fn test_composite_is_sum_of_terms() {
        let contents = ["run cargo test", "run cargo test"];
        let timestamps = [at(0), at(2)];
        let score = PatternScore::compute(&ScoreInputs {
            member_count: 2,
            session_count: 1,
            avg_pairwise_similarity: 0.9,
            representative: contents[0],
            contents: &contents,
            timestamps: &timestamps,
            now: at(2),
        });

        assert!((score.count_score - 3f64.ln() * 2.0).abs() < 1e-12);
        assert!((score.diversity_bonus - 0.25).abs() < 1e-12);
        assert!((score.coherence_bonus - 1.8).abs() < 1e-12);
        assert!((score.recency_bonus - 1.0).abs() < 1e-12);
        assert!((score.habitual_bonus - 0.2).abs() < 1e-12);
        let sum = score.count_score
            + score.diversity_bonus
            + score.coherence_bonus
            + score.recency_bonus
            + score.complexity_bonus
            + score.success_bonus
            + score.context_bonus
            + score.habitual_bonus;
        assert!((score.composite - sum).abs() < 1e-12);
    }
}
