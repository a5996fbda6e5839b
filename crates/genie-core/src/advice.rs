//! Per-option coaching reasons.
//!
//! The matcher decides *which* options are shown; an [`OptionAdvisor`] explains each
//! one for this user. Advice always comes back as a complete replacement set that the
//! orchestrator checks against the matcher output before emitting it.

use crate::matcher::BackgroundCategory;
use crate::orchestrator::MatchRequest;
use crate::{Result, VisaOption};

#[async_trait::async_trait]
pub trait OptionAdvisor: Send + Sync {
    /// Return `options` with a `reason` filled in for every entry, same order.
    async fn advise(&self, request: &MatchRequest, options: &[VisaOption]) -> Result<Vec<VisaOption>>;
}

/// Take reasons from `advised` onto the matcher's `options`.
///
/// `None` unless `advised` names exactly the same options in the same order and gives
/// each a non-empty reason. Facts (cost, requirements, rates) always come from the
/// matcher output, so an advisor can only add reasons.
pub fn with_reasons(options: &[VisaOption], advised: &[VisaOption]) -> Option<Vec<VisaOption>> {
    if options.len() != advised.len() {
        return None;
    }
    options
        .iter()
        .zip(advised)
        .map(|(o, a)| {
            let reason = a.reason.as_deref().map(str::trim).filter(|r| !r.is_empty())?;
            (o.name == a.name).then(|| VisaOption {
                reason: Some(reason.to_string()),
                ..o.clone()
            })
        })
        .collect()
}

fn usd(n: f64) -> String {
    format!("${n:.0}")
}

/// Deterministic reasons built from the budget, the background category and the
/// option's success rate.
#[derive(Debug, Clone, Default)]
pub struct TemplateAdvisor;

impl TemplateAdvisor {
    pub fn reason(request: &MatchRequest, o: &VisaOption) -> String {
        let spare = request.budget - o.cost_usd;
        let budget = if spare >= 1.0 {
            format!(
                "At about {} it fits your {} budget and leaves roughly {} for documents, translations and travel.",
                usd(o.cost_usd),
                usd(request.budget),
                usd(spare)
            )
        } else {
            format!(
                "At about {} it uses your whole budget, so plan for document and travel costs on top.",
                usd(o.cost_usd)
            )
        };
        let fit = match BackgroundCategory::of(&request.background) {
            BackgroundCategory::Tech => format!(
                "Your tech background is what this route rewards: lead with concrete project impact and show {}.",
                o.min_work_experience.to_lowercase()
            ),
            BackgroundCategory::Study => format!(
                "As a study route, everything hinges on an offer from an eligible institution ({}), so apply early; processing takes {}.",
                o.min_education, o.processing_time
            ),
            BackgroundCategory::Any => format!(
                "Make sure you can evidence {} and {}.",
                o.min_education,
                o.min_work_experience.to_lowercase()
            ),
        };
        let rate = o.success_rate_percent;
        let odds = if rate >= 75.0 {
            format!("An estimated {rate:.0}% success rate for similar profiles makes this one of your stronger options.")
        } else if rate >= 50.0 {
            format!("The estimated success rate for similar profiles is {rate:.0}%, so a carefully documented application matters.")
        } else {
            format!("With an estimated {rate:.0}% success rate for similar profiles, treat this as a stretch option and keep a backup plan.")
        };
        format!("{budget} {fit} {odds}")
    }

    pub fn annotate(request: &MatchRequest, options: &[VisaOption]) -> Vec<VisaOption> {
        options
            .iter()
            .map(|o| VisaOption {
                reason: Some(Self::reason(request, o)),
                ..o.clone()
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl OptionAdvisor for TemplateAdvisor {
    async fn advise(&self, request: &MatchRequest, options: &[VisaOption]) -> Result<Vec<VisaOption>> {
        Ok(Self::annotate(request, options))
    }
}
