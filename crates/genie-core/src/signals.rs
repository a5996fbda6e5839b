//! Per-message signal extraction and the derived user profile.
//!
//! Nothing here is stored: the profile is recomputed from the history on every turn so
//! it can never drift from what the user actually said.

use crate::{History, PolicyConfig, VisaOption};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static BUDGET_AFTER_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbudget\b[^0-9$]{0,24}\$?\s*(\d[\d,]*(?:\.\d+)?)\s*(k\b)?")
        .expect("static regex")
});
static BUDGET_DOLLAR_SIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*(\d[\d,]*(?:\.\d+)?)\s*([kK]\b)?").expect("static regex"));
static BUDGET_CURRENCY_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d[\d,]*(?:\.\d+)?)\s*(k)?\s*(?:usd|us dollars|dollars?|bucks)\b")
        .expect("static regex")
});
static NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:my name is|my name's|call me)\s+([a-z][a-z'\-]*)").expect("static regex")
});
static SELF_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:i'm|i’m|im|i am|i've|i have|my background|my degree|my experience|working as|work as)\b|\bi (?:\w+ )?(?:work|worked|studied|study|graduated|hold|finished|completed)\b|\byears? (?:of )?(?:work )?experience\b",
    )
    .expect("static regex")
});
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^20\d\d$").expect("static regex"));

const INTERROGATIVES: [&str; 22] = [
    "does", "do", "did", "is", "are", "am", "can", "could", "should", "would", "will", "may",
    "what", "what's", "whats", "how", "how's", "which", "why", "when", "where", "who",
];

const REQUEST_OPENERS: [&str; 9] = [
    "tell me",
    "show me",
    "give me",
    "find",
    "look up",
    "check",
    "please",
    "let me know",
    "i want to know",
];

/// Words that make a question about time-sensitive facts concern visas at all.
const TOPIC_WORDS: [&str; 3] = ["visa", "immigration", "permit"];

const GREETINGS: [&str; 7] = [
    "hi",
    "hello",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "greetings",
];

const ORDINALS: [(&str, usize); 4] = [("first", 0), ("second", 1), ("third", 2), ("1st", 0)];

/// Words too generic to count as a reference to a specific option.
const GENERIC_NAME_WORDS: [&str; 8] = [
    "visa", "program", "programme", "stream", "subclass", "the", "and", "occupations",
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Find `phrase` (lower-case) in `text_lc` starting at a word boundary. With
/// `whole_word`, the match must also end at a word boundary.
pub fn has_phrase(text_lc: &str, phrase: &str, whole_word: bool) -> bool {
    if phrase.is_empty() {
        return false;
    }
    text_lc.match_indices(phrase).any(|(i, m)| {
        let before_ok = text_lc[..i]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = !whole_word
            || text_lc[i + m.len()..]
                .chars()
                .next()
                .map_or(true, |c| !is_word_char(c));
        before_ok && after_ok
    })
}

fn any_phrase(text_lc: &str, phrases: &[String], whole_word: bool) -> bool {
    phrases
        .iter()
        .any(|p| has_phrase(text_lc, &p.to_lowercase(), whole_word))
}

fn parse_amount(digits: &str, thousands: bool) -> Option<f64> {
    let n: f64 = digits.replace(',', "").parse().ok()?;
    let n = if thousands { n * 1000.0 } else { n };
    (n.is_finite() && n > 0.0).then_some(n)
}

/// Budget in USD, if the message states one.
///
/// Only amounts tied to the word "budget", a dollar sign or a currency word count, so
/// "4 years experience" is never read as a budget.
pub fn parse_budget(text: &str) -> Option<f64> {
    for re in [&*BUDGET_AFTER_KEYWORD, &*BUDGET_DOLLAR_SIGN, &*BUDGET_CURRENCY_WORD] {
        if let Some(c) = re.captures(text) {
            let digits = c.get(1).map(|m| m.as_str()).unwrap_or("");
            let k = c.get(2).is_some();
            if let Some(n) = parse_amount(digits, k) {
                return Some(n);
            }
        }
    }
    None
}

pub fn parse_name(text: &str) -> Option<String> {
    let c = NAME.captures(text)?;
    let raw = c.get(1)?.as_str();
    let mut chars = raw.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

pub fn parse_destination(text_lc: &str, destinations: &[String]) -> Option<String> {
    destinations
        .iter()
        .find(|d| has_phrase(text_lc, &d.to_lowercase(), true))
        .map(|d| d.to_lowercase())
}

/// One sentence of a message and whether it asks something rather than states it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sentence<'a> {
    text: &'a str,
    request: bool,
}

fn words(lc: &str) -> Vec<&str> {
    lc.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '’'))
        .filter(|w| !w.is_empty())
        .collect()
}

fn is_request(sentence: &str) -> bool {
    let lc = sentence.to_lowercase();
    if lc.trim_end().ends_with('?') {
        return true;
    }
    if words(&lc).first().is_some_and(|w| INTERROGATIVES.contains(w)) {
        return true;
    }
    let start = lc.trim_start();
    REQUEST_OPENERS
        .iter()
        .any(|o| start.starts_with(o) && has_phrase(start, o, true))
}

/// Split on `.`, `!` or `?` followed by whitespace or the end of the text.
fn sentences(text: &str) -> Vec<Sentence<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let at_break = matches!(c, '.' | '!' | '?')
            && iter.peek().map_or(true, |(_, n)| n.is_whitespace());
        if at_break {
            let end = i + c.len_utf8();
            let t = text[start..end].trim();
            if !t.is_empty() {
                out.push(Sentence {
                    text: t,
                    request: is_request(t),
                });
            }
            start = end;
        }
    }
    let t = text[start..].trim();
    if !t.is_empty() {
        out.push(Sentence {
            text: t,
            request: is_request(t),
        });
    }
    out
}

/// A statement about the user's own education or work. Questions never count, so
/// "Does a master's degree help?" leaves the known background alone.
fn describes_background(sentence: &Sentence<'_>, keywords: &[String]) -> bool {
    if sentence.request {
        return false;
    }
    let lc = sentence.text.to_lowercase();
    if !any_phrase(&lc, keywords, false) {
        return false;
    }
    if SELF_DESCRIPTION.is_match(sentence.text) {
        return true;
    }
    // Bare answers such as "Software engineer, 5 years" or "A nurse".
    let ws = words(&lc);
    let first = ws
        .iter()
        .copied()
        .find(|w| !matches!(*w, "a" | "an"))
        .unwrap_or("");
    ws.len() <= 8
        && keywords
            .iter()
            .any(|k| !k.contains(' ') && first.starts_with(&k.to_lowercase()))
}

/// The declarative sentences of `text` that describe the user's background.
pub fn parse_background(text: &str, keywords: &[String]) -> Option<String> {
    let parts: Vec<&str> = sentences(text)
        .iter()
        .filter(|s| describes_background(s, keywords))
        .map(|s| s.text)
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

/// Position just past a research qualifier starting at `i`, if one starts there.
fn qualifier_end(ws: &[&str], i: usize, qualifiers: &[String]) -> Option<usize> {
    if YEAR.is_match(ws[i]) {
        return Some(i + 1);
    }
    qualifiers.iter().find_map(|q| {
        let qw: Vec<String> = q.to_lowercase().split_whitespace().map(str::to_string).collect();
        let end = i + qw.len();
        (end <= ws.len() && ws[i..end].iter().zip(&qw).all(|(a, b)| *a == b.as_str()))
            .then_some(end)
    })
}

/// Exact match, or the noun's plural.
fn is_information_noun(w: &str, nouns: &[String]) -> bool {
    nouns.iter().any(|n| {
        let n = n.to_lowercase();
        w.strip_prefix(n.as_str())
            .is_some_and(|rest| matches!(rest, "" | "s" | "es"))
    })
}

/// Whether the message asks for time-sensitive or statistical information.
///
/// Unambiguous keywords ("latest", "stats") always count. Time qualifiers ("currently",
/// "recent", a 20xx year) count only in front of an information noun ("current
/// processing times") or inside a question or request about visa facts, so "I'm
/// currently a software engineer" stays a profile statement.
pub fn requests_research(text: &str, cfg: &PolicyConfig) -> bool {
    let lc = text.to_lowercase();
    if any_phrase(&lc, &cfg.research_keywords, false) {
        return true;
    }
    sentences(text).iter().any(|s| {
        let slc = s.text.to_lowercase();
        let ws = words(&slc);
        let mut qualified = false;
        for i in 0..ws.len() {
            let Some(end) = qualifier_end(&ws, i, &cfg.research_qualifiers) else {
                continue;
            };
            qualified = true;
            if ws[end..(end + 3).min(ws.len())]
                .iter()
                .any(|w| is_information_noun(w, &cfg.information_nouns))
            {
                return true;
            }
        }
        qualified
            && s.request
            && ws.iter().any(|w| {
                is_information_noun(w, &cfg.information_nouns)
                    || TOPIC_WORDS.iter().any(|t| w.starts_with(t))
            })
    })
}

/// What a single user message says, before any history is taken into account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSignals {
    pub budget: Option<f64>,
    /// The sentences of the message that describe education or work background.
    pub background: Option<String>,
    pub destination: Option<String>,
    pub name: Option<String>,
    pub research: bool,
    pub asks_recommendation: bool,
    pub continuation: bool,
    pub greeting: bool,
}

impl MessageSignals {
    pub fn extract(text: &str, cfg: &PolicyConfig) -> Self {
        let lc = text.to_lowercase();
        let trimmed = lc.trim();
        Self {
            budget: parse_budget(text),
            background: parse_background(text, &cfg.background_keywords),
            destination: parse_destination(&lc, &cfg.destinations),
            name: parse_name(text),
            research: requests_research(text, cfg),
            asks_recommendation: any_phrase(&lc, &cfg.recommendation_keywords, false),
            continuation: any_phrase(&lc, &cfg.continuation_cues, false),
            greeting: GREETINGS.iter().any(|g| has_phrase(trimmed, g, true) && trimmed.starts_with(g)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Name,
    Budget,
    Background,
    Destination,
}

/// Budget, background, destination and name as currently known from the conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: Option<String>,
    pub budget: Option<f64>,
    pub background: Option<String>,
    pub destination: Option<String>,
}

impl Profile {
    /// Latest signals from the last `cfg.profile_lookback` user turns, oldest first, so
    /// newer statements override older ones. The name is taken from any user turn.
    pub fn from_history(history: &History, cfg: &PolicyConfig) -> Self {
        let mut p = Self::default();
        for t in history.user_turns() {
            if let Some(n) = parse_name(&t.text) {
                p.name = Some(n);
            }
        }
        let recent: Vec<_> = history
            .user_turns()
            .rev()
            .take(cfg.profile_lookback)
            .collect();
        for t in recent.into_iter().rev() {
            p.apply(&MessageSignals::extract(&t.text, cfg));
        }
        p
    }

    pub fn apply(&mut self, s: &MessageSignals) {
        if let Some(b) = s.budget {
            self.budget = Some(b);
        }
        if let Some(bg) = &s.background {
            self.background = Some(bg.clone());
        }
        if let Some(d) = &s.destination {
            self.destination = Some(d.clone());
        }
        if let Some(n) = &s.name {
            self.name = Some(n.clone());
        }
    }

    /// Fields the coach still needs. Name comes first because the greeting asks for it.
    pub fn missing(&self) -> Vec<ProfileField> {
        let mut out = Vec::new();
        if self.name.is_none() {
            out.push(ProfileField::Name);
        }
        if self.budget.is_none() {
            out.push(ProfileField::Budget);
        }
        if self.background.is_none() {
            out.push(ProfileField::Background);
        }
        if self.destination.is_none() {
            out.push(ProfileField::Destination);
        }
        out
    }

    /// Discovery continues until budget, background and destination are all known.
    pub fn needs_discovery(&self) -> bool {
        self.budget.is_none() || self.background.is_none() || self.destination.is_none()
    }
}

fn distinctive_words(name: &str) -> impl Iterator<Item = String> + '_ {
    name.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= 4 && !GENERIC_NAME_WORDS.contains(&w.as_str()))
}

/// Whether the message refers to one of `options`, by ordinal or by a distinctive word
/// of its name.
pub fn mentions_option(text: &str, options: &[VisaOption]) -> bool {
    referenced_option(text, options).is_some()
}

/// Index of the option the message refers to.
pub fn referenced_option(text: &str, options: &[VisaOption]) -> Option<usize> {
    let lc = text.to_lowercase();
    for (word, idx) in ORDINALS {
        if idx < options.len() && has_phrase(&lc, word, true) {
            return Some(idx);
        }
    }
    if !options.is_empty() && has_phrase(&lc, "last one", true) {
        return Some(options.len() - 1);
    }
    options.iter().position(|o| {
        distinctive_words(&o.name).any(|w| has_phrase(&lc, &w, true))
    })
}

/// Research query for a message: the message itself, scoped to the known destination
/// when the message does not name one.
pub fn research_query(message: &str, signals: &MessageSignals, profile: &Profile) -> String {
    let q = message.trim().to_string();
    match (&signals.destination, &profile.destination) {
        (None, Some(d)) => format!("{q} ({d})"),
        _ => q,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuiltinCatalog, Turn};

    fn cfg() -> PolicyConfig {
        PolicyConfig::default()
    }

    #[test]
    fn budget_is_read_from_keyword_dollar_sign_or_currency_word() {
        assert_eq!(parse_budget("My budget is 3000 USD"), Some(3000.0));
        assert_eq!(parse_budget("I have $4,500 saved"), Some(4500.0));
        assert_eq!(parse_budget("around 2k dollars"), Some(2000.0));
        assert_eq!(parse_budget("budget of about 3k"), Some(3000.0));
        assert_eq!(parse_budget("I have 4 years experience"), None);
        assert_eq!(parse_budget("no idea about money"), None);
    }

    #[test]
    fn scenario_two_message_carries_budget_and_background() {
        let s = MessageSignals::extract(
            "My budget is 3000 USD and I'm a software engineer with 4 years experience",
            &cfg(),
        );
        assert_eq!(s.budget, Some(3000.0));
        assert!(s.background.as_deref().unwrap().contains("software engineer"));
        assert!(!s.research);
        assert!(s.destination.is_none());
    }

    #[test]
    fn destinations_need_whole_words() {
        let c = cfg();
        assert_eq!(
            parse_destination("moving to the uk next year", &c.destinations),
            Some("uk".to_string())
        );
        assert_eq!(parse_destination("a bulky suitcase", &c.destinations), None);
        assert_eq!(parse_destination("canadian tech talent", &c.destinations), None);
    }

    #[test]
    fn research_keywords_match_word_prefixes_only() {
        let c = cfg();
        assert!(MessageSignals::extract("What are current visa approval stats for Canada", &c).research);
        assert!(MessageSignals::extract("any recent statistics?", &c).research);
        assert!(!MessageSignals::extract("what currency do they use", &c).research);
        assert!(!MessageSignals::extract("I am concurrent", &c).research);
    }

    #[test]
    fn time_qualifiers_need_an_information_noun_or_a_request() {
        let c = cfg();
        for msg in [
            "What are the current processing times for Canada?",
            "Tell me about recent rule changes for UK visas",
            "Any updates for 2025 visas?",
            "current fees for the german skilled worker visa",
        ] {
            assert!(requests_research(msg, &c), "{msg}");
        }
        for msg in [
            "I'm currently a software engineer and my budget is $3000",
            "I recently graduated with a degree, budget is 2000 USD",
            "I graduated in 2019 with a degree",
            "how are you today?",
        ] {
            assert!(!requests_research(msg, &c), "{msg}");
        }
    }

    #[test]
    fn background_comes_from_statements_not_questions() {
        let c = cfg();
        let kw = &c.background_keywords;
        assert_eq!(parse_background("Does a master's degree help?", kw), None);
        assert_eq!(parse_background("Is a software engineer eligible", kw), None);
        assert_eq!(parse_background("Can students work part time?", kw), None);
        assert_eq!(
            parse_background("I'm a nurse with a budget of $2000. What's the latest news?", kw)
                .as_deref(),
            Some("I'm a nurse with a budget of $2000.")
        );
        assert_eq!(
            parse_background("I recently graduated with a degree", kw).as_deref(),
            Some("I recently graduated with a degree")
        );
        assert_eq!(
            parse_background("Software engineer, 5 years", kw).as_deref(),
            Some("Software engineer, 5 years")
        );
        // Background words in a request about visas are not a self-description.
        assert_eq!(parse_background("tell me about visas for tech workers in general please", kw), None);
    }

    #[test]
    fn sentences_split_on_terminal_punctuation_only() {
        let s = sentences("Budget is $4.5k. Is that enough? Thanks!");
        let texts: Vec<&str> = s.iter().map(|x| x.text).collect();
        assert_eq!(texts, vec!["Budget is $4.5k.", "Is that enough?", "Thanks!"]);
        assert_eq!(
            s.iter().map(|x| x.request).collect::<Vec<_>>(),
            vec![false, true, false]
        );
    }

    #[test]
    fn greeting_only_at_message_start() {
        let c = cfg();
        assert!(MessageSignals::extract("Hi", &c).greeting);
        assert!(MessageSignals::extract("hello there", &c).greeting);
        assert!(!MessageSignals::extract("this is high", &c).greeting);
    }

    #[test]
    fn name_is_capitalised() {
        assert_eq!(parse_name("hey, my name is ada"), Some("Ada".to_string()));
        assert_eq!(parse_name("Call me Tunde please"), Some("Tunde".to_string()));
        assert_eq!(parse_name("I'm a nurse"), None);
    }

    #[test]
    fn profile_prefers_newer_statements() {
        let c = cfg();
        let h = History::from(vec![
            Turn::user("My name is Ada and my budget is $1000"),
            Turn::agent("Thanks Ada"),
            Turn::user("Actually my budget is 2500 dollars, I'm a nurse, thinking of Canada"),
        ]);
        let p = Profile::from_history(&h, &c);
        assert_eq!(p.name.as_deref(), Some("Ada"));
        assert_eq!(p.budget, Some(2500.0));
        assert_eq!(p.destination.as_deref(), Some("canada"));
        assert!(p.background.is_some());
        assert!(!p.needs_discovery());
        assert!(p.missing().is_empty());
    }

    #[test]
    fn option_references_by_ordinal_and_name() {
        let opts = &BuiltinCatalog::entries()[..3];
        assert_eq!(referenced_option("tell me more about the first one", opts), Some(0));
        assert_eq!(referenced_option("and the third?", opts), Some(2));
        assert_eq!(referenced_option("what about the German one", opts), Some(2));
        assert_eq!(referenced_option("is the canadian route hard", opts), Some(0));
        assert_eq!(referenced_option("thanks!", opts), None);
        // Generic words do not count.
        assert_eq!(referenced_option("which visa is cheapest", opts), None);
    }

    #[test]
    fn research_query_is_scoped_to_known_destination() {
        let c = cfg();
        let msg = "What are the latest processing times?";
        let s = MessageSignals::extract(msg, &c);
        let p = Profile {
            destination: Some("germany".to_string()),
            ..Profile::default()
        };
        assert_eq!(
            research_query(msg, &s, &p),
            "What are the latest processing times? (germany)"
        );
    }
}
