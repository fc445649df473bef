//! Turn classification: does a turn ask for web research, and of which kind.

use chatpipe_core::{Classification, ResearchMode};
use regex::Regex;
use std::sync::OnceLock;

/// Marker that switches a turn into research mode (matched case-insensitively).
pub const TRIGGER: &str = "@web";

const PERSON_PATTERNS: &[&str] = &[
    "who is",
    "about person",
    "find person",
    "search person",
    "person info",
    "background",
    "profile",
];

const SOCIAL_PATTERNS: &[&str] = &[
    "social media",
    "social analysis",
    "deep analysis",
    "online presence",
    "digital footprint",
    "social profile",
    "social activity",
    "social engagement",
    "followers",
    "social impact",
];

// Extra filler stripped from the subject on top of the two pattern sets.
const SUBJECT_FILLER: &[&str] = &["about", "find", "search", "analysis"];

const EDGE_CONNECTORS: &[&str] = &["for", "of", "on"];

fn trigger_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)@web").expect("static regex"))
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("static regex"))
}

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Longest phrases first so "social profile" wins over "profile".
        let mut words: Vec<&str> = SOCIAL_PATTERNS
            .iter()
            .chain(PERSON_PATTERNS)
            .chain(SUBJECT_FILLER)
            .copied()
            .collect();
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));
        let alts = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{alts})\b")).expect("static regex")
    })
}

pub fn has_trigger(raw: &str) -> bool {
    trigger_re().is_match(raw)
}

fn strip_trigger(raw: &str) -> String {
    trigger_re().replacen(raw, 1, "").trim().to_string()
}

fn matches_any(haystack_lc: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack_lc.contains(p))
}

/// Pick the research mode for an already trigger-stripped query.
pub fn research_mode_for(cleaned_query: &str) -> ResearchMode {
    let lc = cleaned_query.to_lowercase();
    if matches_any(&lc, SOCIAL_PATTERNS) {
        ResearchMode::SocialAnalysis
    } else if matches_any(&lc, PERSON_PATTERNS) {
        ResearchMode::PersonLookup
    } else {
        ResearchMode::Generic
    }
}

/// Extract the person/brand a research turn is about.
///
/// A quoted substring wins. Otherwise the classifier keywords are removed and whatever is left
/// (minus dangling connectors like "for") is the subject.
pub fn extract_subject(text: &str) -> String {
    let cleaned = strip_trigger(text);

    if let Some(caps) = quoted_re().captures(&cleaned) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            let q = m.as_str().trim();
            if !q.is_empty() {
                return q.to_string();
            }
        }
    }

    let stripped = keyword_re().replace_all(&cleaned, " ");
    let mut words: Vec<&str> = stripped.split_whitespace().collect();
    while words
        .first()
        .is_some_and(|w| EDGE_CONNECTORS.contains(&w.to_lowercase().as_str()))
    {
        words.remove(0);
    }
    while words
        .last()
        .is_some_and(|w| EDGE_CONNECTORS.contains(&w.to_lowercase().as_str()))
    {
        words.pop();
    }
    let subject = words.join(" ");
    if subject.is_empty() {
        cleaned
    } else {
        subject
    }
}

/// Classify a raw user turn. Never fails.
pub fn classify(raw: &str) -> Classification {
    if !has_trigger(raw) {
        return Classification {
            mode: ResearchMode::None,
            cleaned_query: raw.to_string(),
            subject: None,
        };
    }

    let cleaned_query = strip_trigger(raw);
    if cleaned_query.is_empty() {
        return Classification {
            mode: ResearchMode::Generic,
            subject: Some(cleaned_query.clone()),
            cleaned_query,
        };
    }

    let mode = research_mode_for(&cleaned_query);
    let subject = if mode.is_subject_scoped() {
        extract_subject(&cleaned_query)
    } else {
        cleaned_query.clone()
    };
    Classification {
        mode,
        cleaned_query,
        subject: Some(subject),
    }
}

/// A canned research request: a ready-made `@web` phrasing around a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchTemplate {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pattern: &'static str,
}

impl SearchTemplate {
    pub fn fill(&self, subject: &str) -> String {
        self.pattern.replacen("{}", subject.trim(), 1)
    }

    /// The template with a placeholder subject, for listings.
    pub fn example(&self) -> String {
        self.fill("[subject]")
    }
}

pub const SEARCH_TEMPLATES: &[SearchTemplate] = &[
    SearchTemplate {
        id: "social",
        label: "Social Media Analysis",
        description: "Social media presence analysis for a person or brand",
        pattern: "@web social media analysis for {}",
    },
    SearchTemplate {
        id: "person",
        label: "Person Information",
        description: "Person lookup with social context",
        pattern: "@web who is {}",
    },
    SearchTemplate {
        id: "deep",
        label: "Deep Analysis",
        description: "Cross-platform analysis of a topic or person",
        pattern: "@web deep analysis {}",
    },
];

pub fn search_template(id: &str) -> Option<&'static SearchTemplate> {
    SEARCH_TEMPLATES.iter().find(|t| t.id.eq_ignore_ascii_case(id.trim()))
}
