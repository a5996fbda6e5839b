use serde::{Deserialize, Serialize};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Tunable knobs for the turn policy.
///
/// Every heuristic the orchestrator applies is listed here so that the exact trigger
/// boundaries are explicit and can be overridden from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// How many of the most recent agent turns are searched for re-emittable results.
    pub reemit_window: usize,
    /// Phrases that mark a message as continuing the discussion of prior results.
    pub continuation_cues: Vec<String>,
    /// Phrases that request time-sensitive or statistical information on their own.
    pub research_keywords: Vec<String>,
    /// Time words ("current", "recently", a 20xx year) that only request research when
    /// they qualify an information noun or appear in a question or request.
    pub research_qualifiers: Vec<String>,
    /// Nouns a research qualifier must precede (within three words) to count.
    pub information_nouns: Vec<String>,
    /// Phrases that explicitly ask for visa recommendations.
    pub recommendation_keywords: Vec<String>,
    /// Words that signal the user described their education or work background.
    pub background_keywords: Vec<String>,
    /// Lower-case destination names recognised in messages.
    pub destinations: Vec<String>,
    /// Minimum length of a partial research summary before it may be surfaced.
    pub min_informative_chars: usize,
    /// How many user turns back budget/background/destination signals are remembered.
    pub profile_lookback: usize,
    /// History tail handed to the reply generator.
    pub history_tail: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reemit_window: 3,
            continuation_cues: strings(&[
                "first one",
                "second one",
                "third one",
                "last one",
                "the first",
                "the second",
                "the third",
                "tell me more",
                "more about",
                "more details",
                "explain",
                "compare",
                "which one",
                "which of",
                "these",
                "those",
                "that one",
                "this one",
                "that visa",
                "this visa",
                "about it",
                "what about",
                "how long",
                "requirements",
                "success rate",
                "processing time",
                "summary",
                "those stats",
            ]),
            research_keywords: strings(&[
                "latest",
                "news",
                "statistic",
                "stats",
                "up-to-date",
                "up to date",
                "trend",
                "outlook",
                "policy change",
                "new rules",
                "new law",
                "approval rate",
            ]),
            research_qualifiers: strings(&[
                "current",
                "currently",
                "recent",
                "recently",
                "today",
                "this year",
                "right now",
            ]),
            information_nouns: strings(&[
                "rule",
                "requirement",
                "processing",
                "wait",
                "backlog",
                "fee",
                "cost",
                "price",
                "policy",
                "policies",
                "law",
                "quota",
                "cap",
                "threshold",
                "salary",
                "rate",
                "figure",
                "number",
                "data",
                "change",
                "update",
                "situation",
                "status",
            ]),
            recommendation_keywords: strings(&[
                "recommend",
                "suggest",
                "options",
                "which visa",
                "what visa",
                "visa for me",
                "eligible",
                "qualify",
            ]),
            background_keywords: strings(&[
                "student",
                "study",
                "studying",
                "graduate",
                "degree",
                "bachelor",
                "master",
                "phd",
                "diploma",
                "engineer",
                "developer",
                "software",
                "programmer",
                "tech",
                "nurse",
                "doctor",
                "teacher",
                "accountant",
                "designer",
                "analyst",
                "experience",
                "years of work",
                "i work as",
            ]),
            destinations: strings(&[
                "canada",
                "united kingdom",
                "uk",
                "britain",
                "england",
                "germany",
                "australia",
                "united states",
                "usa",
                "america",
                "netherlands",
                "ireland",
                "new zealand",
                "france",
                "portugal",
                "spain",
                "japan",
                "uae",
                "dubai",
            ]),
            min_informative_chars: 40,
            profile_lookback: 8,
            history_tail: 10,
        }
    }
}

impl PolicyConfig {
    pub fn from_json(s: &str) -> crate::Result<Self> {
        let cfg: Self =
            serde_json::from_str(s).map_err(|e| crate::Error::Config(e.to_string()))?;
        if cfg.reemit_window == 0 {
            return Err(crate::Error::Config(
                "reemit_window must be at least 1".to_string(),
            ));
        }
        Ok(cfg)
    }
}
