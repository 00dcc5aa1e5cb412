/// Document Validator - Rule-Based Checks Over Free Text
///
/// **Check Selection (from `testcase_type`):**
/// - `spelling` / `grammar` / `orthography` → unknown words against a ceiling
/// - `structure` / `essay` / `report` → title, introduction, body and
///   conclusion heuristics scored in [0, 1]
/// - `formatting` / `format` → capitalization, double spaces and terminal
///   punctuation, each counted as one issue
/// - `correspondence` / `letter` / `email` → greeting, closing, date, subject
///   and signature detection against a required subset
/// - anything else → word-count bounds
///
/// Rules are read from `expected_document_structure`, falling back to an
/// object-valued `expected_output`.

use assay_common::config::EngineConfig;
use assay_common::types::{
    DocumentPayload, ExecutionEnvironment, ExecutionRequest, ExecutionResult, ResultPayload,
    SubmissionContent, Testcase,
};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use tracing::warn;

use super::{expectation, numeric, parse_structured};
use crate::error::EngineError;
use crate::service::ExecutionService;

const DEFAULT_MAX_SPELLING_ERRORS: usize = 3;
const DEFAULT_MIN_STRUCTURE_SCORE: f64 = 0.75;
const DEFAULT_MAX_FORMATTING_ISSUES: usize = 3;
const TITLE_MAX_WORDS: usize = 15;
const HEADING_MAX_WORDS: usize = 6;
const SIGNATURE_MAX_WORDS: usize = 6;

lazy_static! {
    static ref BUILTIN_WORDS: HashSet<&'static str> =
        include_str!("../../data/common_words.txt").split_whitespace().collect();
    static ref WORD: Regex = Regex::new(r"[A-Za-z]+(?:['’][A-Za-z]+)*").expect("valid regex");
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n[ \t]*\n").expect("valid regex");
    static ref SENTENCE_END: Regex =
        Regex::new(r#"[.!?]+["')\]]*\s+"#).expect("valid regex");
    static ref DOUBLE_SPACE: Regex = Regex::new(r"\S {2,}\S").expect("valid regex");
    static ref CONCLUSION: Regex = Regex::new(
        r"(?i)\b(in conclusion|to conclude|in summary|to summari[sz]e|to sum up|overall|conclusion)\b"
    )
    .expect("valid regex");
    static ref GREETING: Regex =
        Regex::new(r"(?im)^\s*(dear|hello|hi|greetings|good (morning|afternoon|evening)|to whom it may concern)\b")
            .expect("valid regex");
    static ref CLOSING: Regex = Regex::new(
        r"(?im)^\s*(sincerely|regards|best regards|kind regards|warm regards|best wishes|yours (sincerely|faithfully|truly)|respectfully|thank you|thanks|best|cheers)\b[^\n]{0,20}$"
    )
    .expect("valid regex");
    static ref DATE: Regex = Regex::new(
        r"(?i)\b(\d{4}-\d{2}-\d{2}|\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(st|nd|rd|th)?,?\s+\d{4}|\d{1,2}(st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?,?\s+\d{4})\b"
    )
    .expect("valid regex");
    static ref SUBJECT: Regex = Regex::new(r"(?im)^\s*(subject|re)\s*:\s*\S").expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetterElement {
    Greeting,
    Closing,
    Date,
    Subject,
    Signature,
}

impl LetterElement {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "greeting" | "salutation" => Some(LetterElement::Greeting),
            "closing" | "sign_off" | "valediction" => Some(LetterElement::Closing),
            "date" => Some(LetterElement::Date),
            "subject" | "subject_line" => Some(LetterElement::Subject),
            "signature" => Some(LetterElement::Signature),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterElement::Greeting => "greeting",
            LetterElement::Closing => "closing",
            LetterElement::Date => "date",
            LetterElement::Subject => "subject",
            LetterElement::Signature => "signature",
        }
    }

    fn present_in(&self, text: &str) -> bool {
        match self {
            LetterElement::Greeting => GREETING.is_match(text),
            LetterElement::Closing => CLOSING.is_match(text),
            LetterElement::Date => DATE.is_match(text),
            LetterElement::Subject => SUBJECT.is_match(text),
            LetterElement::Signature => has_signature(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCheck {
    Spelling {
        max_errors: usize,
        extra_words: Vec<String>,
    },
    Structure {
        min_score: f64,
    },
    Formatting {
        max_issues: usize,
    },
    Correspondence {
        required_elements: Vec<LetterElement>,
    },
    WordCount {
        min_words: Option<usize>,
        max_words: Option<usize>,
    },
}

fn count_rule(rules: &Map<String, Value>, key: &str) -> Option<usize> {
    rules
        .get(key)
        .and_then(numeric)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
}

fn string_list(rules: &Map<String, Value>, key: &str) -> Vec<String> {
    rules
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl DocumentCheck {
    pub fn from_testcase(testcase: &Testcase) -> Result<Self, EngineError> {
        let rules = match expectation(
            testcase.expected_document_structure.as_ref(),
            testcase.expected_output.as_ref(),
        ) {
            Some(Value::Object(rules)) => rules.clone(),
            _ => Map::new(),
        };

        let check = match testcase.subtype().as_deref() {
            Some("spelling" | "grammar" | "orthography" | "spelling_grammar") => {
                DocumentCheck::Spelling {
                    max_errors: count_rule(&rules, "max_errors")
                        .unwrap_or(DEFAULT_MAX_SPELLING_ERRORS),
                    extra_words: string_list(&rules, "dictionary"),
                }
            }
            Some("structure" | "essay" | "report") => DocumentCheck::Structure {
                min_score: rules
                    .get("min_score")
                    .and_then(numeric)
                    .unwrap_or(DEFAULT_MIN_STRUCTURE_SCORE),
            },
            Some("formatting" | "format") => DocumentCheck::Formatting {
                max_issues: count_rule(&rules, "max_issues")
                    .unwrap_or(DEFAULT_MAX_FORMATTING_ISSUES),
            },
            Some("correspondence" | "letter" | "email" | "business_letter") => {
                let declared = string_list(&rules, "required_elements");
                let required_elements = if declared.is_empty() {
                    vec![
                        LetterElement::Greeting,
                        LetterElement::Closing,
                        LetterElement::Signature,
                    ]
                } else {
                    declared
                        .iter()
                        .map(|tag| {
                            LetterElement::from_tag(tag).ok_or_else(|| {
                                EngineError::InvalidCriteria(format!(
                                    "unknown letter element '{}'",
                                    tag
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?
                };
                DocumentCheck::Correspondence { required_elements }
            }
            _ => DocumentCheck::WordCount {
                min_words: count_rule(&rules, "min_words"),
                max_words: count_rule(&rules, "max_words"),
            },
        };
        Ok(check)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DocumentCheck::Spelling { .. } => "spelling",
            DocumentCheck::Structure { .. } => "structure",
            DocumentCheck::Formatting { .. } => "formatting",
            DocumentCheck::Correspondence { .. } => "correspondence",
            DocumentCheck::WordCount { .. } => "word_count",
        }
    }
}

type TextStrategy = fn(&SubmissionContent) -> Option<String>;

fn json_text_field(content: &SubmissionContent) -> Option<String> {
    match parse_structured(content)? {
        Value::Object(map) => ["text", "content", "body"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(String::from),
        Value::Array(parts) => {
            let parts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join("\n\n"))
        }
        _ => None,
    }
}

fn raw_text(content: &SubmissionContent) -> Option<String> {
    content.as_text().map(String::from)
}

const TEXT_STRATEGIES: [TextStrategy; 2] = [json_text_field, raw_text];

/// Document text, first successful strategy wins
pub fn extract_text(content: &SubmissionContent) -> String {
    TEXT_STRATEGIES
        .iter()
        .find_map(|strategy| strategy(content))
        .unwrap_or_else(|| content.to_text())
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn is_heading(paragraph: &str) -> bool {
    if paragraph.lines().count() != 1 {
        return false;
    }
    paragraph.starts_with('#')
        || (word_count(paragraph) <= HEADING_MAX_WORDS && !ends_with_terminal(paragraph))
}

fn ends_with_terminal(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(['"', '\'', ')', ']'])
        .ends_with(['.', '!', '?', ':', ';'])
}

fn sentences(paragraph: &str) -> impl Iterator<Item = &str> {
    SENTENCE_END
        .split(paragraph)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Built-in words plus the configured and per-testcase word lists
struct Lexicon<'a> {
    configured: &'a HashSet<String>,
    testcase: HashSet<String>,
}

impl<'a> Lexicon<'a> {
    fn new(configured: &'a HashSet<String>, testcase: &[String]) -> Self {
        Self {
            configured,
            testcase: testcase.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    fn contains(&self, word: &str) -> bool {
        BUILTIN_WORDS.contains(word) || self.configured.contains(word) || self.testcase.contains(word)
    }
}

/// Dictionary lookup with light suffix stripping
fn is_known(word: &str, lexicon: &Lexicon) -> bool {
    let known = |w: &str| lexicon.contains(w);
    if known(word) {
        return true;
    }

    let word = word.trim_end_matches("'s").trim_end_matches("’s");
    if known(word) {
        return true;
    }

    let rewrites: [(&str, &str); 10] = [
        ("ies", "y"),
        ("ied", "y"),
        ("es", ""),
        ("s", ""),
        ("ed", ""),
        ("ed", "e"),
        ("ing", ""),
        ("ing", "e"),
        ("ly", ""),
        ("er", ""),
    ];
    rewrites.iter().any(|(suffix, replacement)| {
        word.strip_suffix(suffix)
            .filter(|stem| stem.len() >= 2)
            .is_some_and(|stem| known(&format!("{}{}", stem, replacement)))
    })
}

fn check_spelling(text: &str, max_errors: usize, lexicon: &Lexicon) -> (bool, Vec<String>) {
    let mut unknown = Vec::new();
    for token in WORD.find_iter(text).map(|m| m.as_str()) {
        let is_acronym = token.len() > 1 && token.chars().all(|c| c.is_ascii_uppercase());
        if is_acronym {
            continue;
        }
        let lower = token.to_lowercase();
        if !is_known(&lower, lexicon) {
            unknown.push(lower);
        }
    }

    let passed = unknown.len() <= max_errors;
    let mut issues: Vec<String> = Vec::new();
    for word in unknown {
        if !issues.contains(&word) {
            issues.push(word);
        }
    }
    (passed, issues.into_iter().map(|w| format!("unknown word: {}", w)).collect())
}

#[derive(Debug, Default, PartialEq)]
struct StructureReport {
    score: f64,
    found: Vec<String>,
    missing: Vec<String>,
}

fn check_structure(text: &str) -> StructureReport {
    let paras = paragraphs(text);

    let has_title = paras.first().is_some_and(|first| {
        first.lines().count() == 1
            && (first.starts_with('#')
                || (word_count(first) <= TITLE_MAX_WORDS && !first.ends_with('.')))
    });

    let body_start = usize::from(has_title);
    let headings: Vec<&str> = paras[body_start.min(paras.len())..]
        .iter()
        .copied()
        .filter(|p| is_heading(p))
        .collect();
    let content: Vec<&str> = paras[body_start.min(paras.len())..]
        .iter()
        .copied()
        .filter(|p| !is_heading(p))
        .collect();

    let has_intro = headings.iter().any(|h| h.to_lowercase().contains("introduction"))
        || content.first().is_some_and(|p| sentences(p).count() >= 2);
    let has_body = content.len() >= 3;
    let has_conclusion = headings.iter().any(|h| h.to_lowercase().contains("conclusion"))
        || (content.len() >= 2 && content.last().is_some_and(|p| CONCLUSION.is_match(p)));

    let mut report = StructureReport::default();
    for (name, present) in [
        ("title", has_title),
        ("introduction", has_intro),
        ("body", has_body),
        ("conclusion", has_conclusion),
    ] {
        if present {
            report.found.push(name.to_string());
        } else {
            report.missing.push(name.to_string());
        }
    }
    report.score = report.found.len() as f64 / 4.0;
    report
}

fn check_formatting(text: &str) -> Vec<String> {
    let mut issues = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        for _ in DOUBLE_SPACE.find_iter(line) {
            issues.push(format!("double space on line {}", idx + 1));
        }
    }

    for (idx, paragraph) in paragraphs(text).into_iter().enumerate() {
        if is_heading(paragraph) {
            continue;
        }
        for sentence in sentences(paragraph) {
            let first = sentence.chars().find(|c| c.is_alphabetic());
            if first.is_some_and(|c| c.is_lowercase()) {
                let preview: String = sentence.chars().take(30).collect();
                issues.push(format!("sentence starts lowercase: \"{}\"", preview));
            }
        }
        if !ends_with_terminal(paragraph) {
            issues.push(format!("paragraph {} lacks terminal punctuation", idx + 1));
        }
    }

    issues
}

fn has_signature(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let Some(closing) = lines.iter().rposition(|line| CLOSING.is_match(line)) else {
        return false;
    };
    lines[closing + 1..].iter().any(|line| {
        !line.is_empty()
            && word_count(line) <= SIGNATURE_MAX_WORDS
            && line.chars().any(char::is_alphabetic)
    })
}

pub struct DocumentValidator {
    dictionary: Arc<HashSet<String>>,
}

impl DocumentValidator {
    pub fn new(config: &EngineConfig) -> Self {
        let mut dictionary = HashSet::new();
        if let Some(path) = &config.dictionary_path {
            match fs::read_to_string(path) {
                Ok(words) => {
                    dictionary.extend(words.split_whitespace().map(str::to_lowercase));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read dictionary; using built-in words only");
                }
            }
        }
        Self {
            dictionary: Arc::new(dictionary),
        }
    }

    fn grade(&self, check: &DocumentCheck, text: &str) -> (bool, DocumentPayload) {
        let mut payload = DocumentPayload {
            check: check.name().to_string(),
            word_count: word_count(text),
            ..DocumentPayload::default()
        };

        let passed = match check {
            DocumentCheck::Spelling {
                max_errors,
                extra_words,
            } => {
                let lexicon = Lexicon::new(&self.dictionary, extra_words);
                let (passed, issues) = check_spelling(text, *max_errors, &lexicon);
                payload.issues = issues;
                passed
            }
            DocumentCheck::Structure { min_score } => {
                let report = check_structure(text);
                payload.score = Some(report.score);
                payload.issues = report
                    .missing
                    .iter()
                    .map(|part| format!("missing {}", part))
                    .collect();
                payload.found_elements = report.found;
                payload.missing_elements = report.missing;
                report.score >= *min_score
            }
            DocumentCheck::Formatting { max_issues } => {
                payload.issues = check_formatting(text);
                payload.issues.len() <= *max_issues
            }
            DocumentCheck::Correspondence { required_elements } => {
                for element in required_elements {
                    let name = element.as_str().to_string();
                    if element.present_in(text) {
                        payload.found_elements.push(name);
                    } else {
                        payload.issues.push(format!("missing {}", name));
                        payload.missing_elements.push(name);
                    }
                }
                payload.missing_elements.is_empty()
            }
            DocumentCheck::WordCount {
                min_words,
                max_words,
            } => {
                let count = payload.word_count;
                if let Some(min) = min_words.filter(|min| count < *min) {
                    payload.issues.push(format!("{} words, minimum is {}", count, min));
                }
                if let Some(max) = max_words.filter(|max| count > *max) {
                    payload.issues.push(format!("{} words, maximum is {}", count, max));
                }
                let declared = min_words.is_some() || max_words.is_some();
                payload.issues.is_empty() && (declared || count > 0)
            }
        };

        (passed, payload)
    }
}

#[async_trait]
impl ExecutionService for DocumentValidator {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Document
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let check = DocumentCheck::from_testcase(&request.testcase)?;
        let text = extract_text(&request.content);
        let (passed, payload) = self.grade(&check, &text);
        Ok(ExecutionResult::graded(passed, ResultPayload::Document(payload)))
    }
}
