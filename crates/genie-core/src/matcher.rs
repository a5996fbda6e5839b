//! Structured Option Matcher.
//!
//! A conservative, explainable filter (not a ranking model): its output is shown
//! verbatim to the user, so every kept option must be auditable against the rule.

use crate::{OptionCatalog, VisaOption};

pub const MAX_MATCHES: usize = 3;

const STUDY_BACKGROUND: [&str; 2] = ["student", "study"];
const STUDY_NAMES: [&str; 2] = ["student", "study"];
const TECH_BACKGROUND: [&str; 3] = ["tech", "software", "engineer"];
const TECH_NAMES: [&str; 3] = ["tech", "talent", "skilled"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundCategory {
    Study,
    Tech,
    Any,
}

impl BackgroundCategory {
    pub fn of(background: &str) -> Self {
        let b = background.to_lowercase();
        if STUDY_BACKGROUND.iter().any(|k| b.contains(k)) {
            Self::Study
        } else if TECH_BACKGROUND.iter().any(|k| b.contains(k)) {
            Self::Tech
        } else {
            Self::Any
        }
    }

    pub fn accepts(self, option_name: &str) -> bool {
        let n = option_name.to_lowercase();
        match self {
            Self::Study => STUDY_NAMES.iter().any(|k| n.contains(k)),
            Self::Tech => TECH_NAMES.iter().any(|k| n.contains(k)),
            Self::Any => true,
        }
    }
}

/// Filter `catalog` by `cost_usd <= budget` and the background category, keeping
/// catalog order and at most [`MAX_MATCHES`] entries.
pub fn match_options(catalog: &[VisaOption], budget: f64, background: &str) -> Vec<VisaOption> {
    if !budget.is_finite() || budget < 0.0 {
        return Vec::new();
    }
    let category = BackgroundCategory::of(background);
    catalog
        .iter()
        .filter(|o| o.cost_usd <= budget && category.accepts(&o.name))
        .take(MAX_MATCHES)
        .cloned()
        .collect()
}

/// Tool-facing lookup: never fails, an unreadable catalog yields no options.
pub fn fetch_options(catalog: &dyn OptionCatalog, budget: f64, background: &str) -> Vec<VisaOption> {
    match catalog.options() {
        Ok(all) => {
            let out = match_options(&all, budget, background);
            tracing::info!(budget, background, matched = out.len(), "option lookup");
            out
        }
        Err(e) => {
            tracing::warn!(error = %e, "option catalog unavailable; returning no options");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuiltinCatalog, Error, Result};
    use proptest::prelude::*;

    fn names(v: &[VisaOption]) -> Vec<&str> {
        v.iter().map(|o| o.name.as_str()).collect()
    }

    #[test]
    fn software_engineer_with_3000_gets_tech_options_in_catalog_order() {
        let all = BuiltinCatalog::entries();
        let out = match_options(&all, 3000.0, "I'm a software engineer with 4 years experience");
        assert_eq!(
            names(&out),
            vec![
                "UK Global Talent Visa",
                "German Skilled Worker Visa",
                "Netherlands Highly Skilled Migrant Program",
            ]
        );
    }

    #[test]
    fn student_background_only_keeps_student_programmes() {
        let all = BuiltinCatalog::entries();
        let out = match_options(&all, 10_000.0, "I am a student looking at masters");
        assert_eq!(names(&out), vec!["Australian Student Visa (Subclass 500)"]);
        // Budget below the only student option: empty, never a non-matching fallback.
        assert!(match_options(&all, 100.0, "student").is_empty());
    }

    #[test]
    fn study_keyword_wins_over_tech_keyword() {
        assert_eq!(
            BackgroundCategory::of("software engineer who wants to study"),
            BackgroundCategory::Study
        );
    }

    #[test]
    fn unknown_background_accepts_everything_affordable() {
        let all = BuiltinCatalog::entries();
        let out = match_options(&all, 500.0, "nurse");
        assert_eq!(
            names(&out),
            vec![
                "German Skilled Worker Visa",
                "Australian Student Visa (Subclass 500)",
                "Netherlands Highly Skilled Migrant Program",
            ]
        );
    }

    #[test]
    fn invalid_budget_matches_nothing() {
        let all = BuiltinCatalog::entries();
        assert!(match_options(&all, f64::NAN, "tech").is_empty());
        assert!(match_options(&all, -1.0, "tech").is_empty());
    }

    struct Broken;
    impl OptionCatalog for Broken {
        fn options(&self) -> Result<Vec<VisaOption>> {
            Err(Error::Catalog("down".to_string()))
        }
    }

    #[test]
    fn fetch_options_swallows_catalog_errors() {
        assert!(fetch_options(&Broken, 5000.0, "tech").is_empty());
        assert_eq!(fetch_options(&BuiltinCatalog, 5000.0, "tech").len(), 3);
    }

    proptest! {
        #[test]
        fn matches_are_bounded_and_affordable(budget in -100.0f64..10_000.0, background in ".{0,40}") {
            let all = BuiltinCatalog::entries();
            let out = match_options(&all, budget, &background);
            prop_assert!(out.len() <= MAX_MATCHES);
            for o in &out {
                prop_assert!(o.cost_usd <= budget);
            }
        }

        #[test]
        fn student_background_never_yields_non_study_names(
            prefix in "[a-z ]{0,12}",
            budget in 0.0f64..10_000.0,
        ) {
            let all = BuiltinCatalog::entries();
            let out = match_options(&all, budget, &format!("{prefix} student"));
            for o in &out {
                let n = o.name.to_lowercase();
                prop_assert!(n.contains("student") || n.contains("study"));
            }
        }

        #[test]
        fn output_preserves_catalog_order(budget in 0.0f64..10_000.0, background in "(tech|nurse|student|)") {
            let all = BuiltinCatalog::entries();
            let out = match_options(&all, budget, &background);
            let positions: Vec<usize> = out
                .iter()
                .map(|o| all.iter().position(|c| c == o).unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
