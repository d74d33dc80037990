//! Pure quality-scoring function for extracted page content. Deliberately
//! side-effect free so it can be tested in isolation from the fetch/extract
//! pipeline.

/// Integer score 0..100 derived from word count, heading count, and
/// code-block presence. Pages below `quality_threshold` are filtered from
/// the final artifact (not failed).
///
/// A page that carries at least one heading gets a flat 20-point floor on
/// top of its scaled contribution — a minimal but genuine doc page (a
/// heading plus a couple sentences) is expected to clear the default
/// `quality_threshold` of 20 on heading structure alone, not word count.
pub fn assess(word_count: u32, heading_count: u32, has_code: bool) -> u32 {
    let heading_score = if heading_count == 0 {
        0.0
    } else {
        20.0 + (heading_count.min(5) - 1) as f64 / 4.0 * 10.0
    };
    let word_score = (word_count.min(500) as f64 / 500.0) * 60.0;
    let code_score = if has_code { 10.0 } else { 0.0 };
    (heading_score + word_score + code_score).round().clamp(0.0, 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_scores_zero() {
        assert_eq!(assess(0, 0, false), 0);
    }

    #[test]
    fn substantial_page_scores_high() {
        let score = assess(600, 6, true);
        assert_eq!(score, 100);
    }

    #[test]
    fn word_count_dominates_below_cap() {
        let low = assess(50, 0, false);
        let high = assess(400, 0, false);
        assert!(high > low);
    }

    #[test]
    fn code_presence_adds_a_fixed_bonus() {
        let without = assess(100, 1, false);
        let with = assess(100, 1, true);
        assert_eq!(with - without, 10);
    }

    #[test]
    fn minimal_heading_page_clears_default_threshold() {
        // §8 scenario 1: `# X\n\nhello` — word_count 3, one heading, no code.
        let score = assess(3, 1, false);
        assert!(score >= 20, "expected score >= default quality_threshold, got {score}");
    }

    #[test]
    fn headingless_page_needs_words_or_code_to_clear_threshold() {
        assert!(assess(3, 0, false) < 20);
    }
}
