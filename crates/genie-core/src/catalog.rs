use crate::{Error, OptionCatalog, Result, VisaOption};

fn option(
    name: &str,
    cost_usd: f64,
    min_education: &str,
    min_work_experience: &str,
    processing_time: &str,
    success_rate_percent: f64,
) -> VisaOption {
    VisaOption {
        name: name.to_string(),
        cost_usd,
        min_education: min_education.to_string(),
        min_work_experience: min_work_experience.to_string(),
        processing_time: processing_time.to_string(),
        success_rate_percent,
        reason: None,
    }
}

/// The reference visa programmes shipped with the coach.
#[derive(Debug, Clone, Default)]
pub struct BuiltinCatalog;

impl BuiltinCatalog {
    pub fn entries() -> Vec<VisaOption> {
        vec![
            option(
                "Canadian Tech Talent Stream",
                3500.0,
                "Bachelor's Degree in STEM",
                "3 years in a high-demand tech role",
                "4-6 months",
                85.0,
            ),
            option(
                "UK Global Talent Visa",
                800.0,
                "Endorsement from a recognized UK body",
                "Varies (leader or potential leader in field)",
                "3-8 weeks (fast track available)",
                92.0,
            ),
            option(
                "German Skilled Worker Visa",
                100.0,
                "Vocational training or University Degree (recognized in Germany)",
                "2 years relevant experience",
                "1-3 months",
                88.0,
            ),
            option(
                "Australian Student Visa (Subclass 500)",
                450.0,
                "Enrolment in a CRICOS-registered course",
                "Not primarily for work",
                "Varies (typically 1-4 months)",
                78.0,
            ),
            option(
                "USA H-1B Visa (Specialty Occupations)",
                2500.0,
                "Bachelor's degree or equivalent in a specialized field",
                "Varies, job offer required",
                "Lottery system; if selected, 3-12 months",
                15.0,
            ),
            option(
                "Netherlands Highly Skilled Migrant Program",
                350.0,
                "Employment contract with a recognized sponsor",
                "Salary threshold must be met",
                "2-4 weeks",
                95.0,
            ),
        ]
    }
}

impl OptionCatalog for BuiltinCatalog {
    fn options(&self) -> Result<Vec<VisaOption>> {
        Ok(Self::entries())
    }
}

/// Reject entries the display layer cannot render faithfully.
pub fn validate_options(options: &[VisaOption]) -> Result<()> {
    for o in options {
        if o.name.trim().is_empty() {
            return Err(Error::Catalog("option with empty name".to_string()));
        }
        if !o.cost_usd.is_finite() || o.cost_usd < 0.0 {
            return Err(Error::Catalog(format!(
                "option {:?} has invalid costUsd {}",
                o.name, o.cost_usd
            )));
        }
        if !(0.0..=100.0).contains(&o.success_rate_percent) {
            return Err(Error::Catalog(format!(
                "option {:?} has successRatePercent {} outside 0..=100",
                o.name, o.success_rate_percent
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let all = BuiltinCatalog.options().unwrap();
        assert_eq!(all.len(), 6);
        validate_options(&all).unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_success_rate() {
        let mut all = BuiltinCatalog::entries();
        all[0].success_rate_percent = 101.0;
        assert!(matches!(validate_options(&all), Err(Error::Catalog(_))));
    }
}
