//! Champion/challenger comparison

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Promote,
    Retain,
}

/// Rule for replacing the champion with a candidate.
///
/// By default the candidate must score strictly higher; equal scores keep the
/// champion to avoid churn on noise-level differences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromotionPolicy {
    pub promote_on_tie: bool,
}

impl PromotionPolicy {
    pub fn new(promote_on_tie: bool) -> Self {
        Self { promote_on_tie }
    }

    /// `champion_score` is `None` when nothing is deployed yet, in which case
    /// the candidate always wins.
    pub fn decide(&self, champion_score: Option<f64>, candidate_score: f64) -> Verdict {
        let Some(champion_score) = champion_score else {
            return Verdict::Promote;
        };

        let wins = if self.promote_on_tie {
            candidate_score >= champion_score
        } else {
            candidate_score > champion_score
        };
        if wins {
            Verdict::Promote
        } else {
            Verdict::Retain
        }
    }
}

/// [`PromotionPolicy::decide`] with the default strict policy
pub fn decide(champion_score: Option<f64>, candidate_score: f64) -> Verdict {
    PromotionPolicy::default().decide(champion_score, candidate_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_better_candidate_promotes() {
        assert_eq!(decide(Some(0.80), 0.85), Verdict::Promote);
        assert_eq!(decide(Some(0.80), 0.70), Verdict::Retain);
    }

    #[test]
    fn test_tie_retains_champion() {
        for score in [0.0, 0.5, 0.8, 1.0] {
            assert_eq!(decide(Some(score), score), Verdict::Retain);
        }
    }

    #[test]
    fn test_first_deployment_always_promotes() {
        for score in [0.0, 0.01, 0.5, 1.0] {
            assert_eq!(decide(None, score), Verdict::Promote);
        }
    }

    #[test]
    fn test_monotonic_over_grid() {
        let grid: Vec<f64> = (0..=20).map(|i| i as f64 / 20.0).collect();
        for &a in &grid {
            for &b in &grid {
                let expected = if b > a { Verdict::Promote } else { Verdict::Retain };
                assert_eq!(decide(Some(a), b), expected, "decide({}, {})", a, b);
            }
        }
    }

    #[test]
    fn test_promote_on_tie_policy() {
        let policy = PromotionPolicy::new(true);
        assert_eq!(policy.decide(Some(0.8), 0.8), Verdict::Promote);
        assert_eq!(policy.decide(Some(0.8), 0.79), Verdict::Retain);
    }
}
