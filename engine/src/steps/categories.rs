//! Category matching: map free-text labels onto a canonical category list.
//!
//! ```text
//! label ──▶ normalize ──▶ empty? ──yes──▶ unknown
//!                           │ no
//!                           ▼
//!                 closest category (Levenshtein / max length)
//!                           │ score > threshold
//!                           ▼
//!                 regex rules on the raw label ──▶ first change wins, else unmatched
//! ```
//!
//! Reference data is two `;`-separated files without header:
//! categories as `<id>;<CATEGORY>[;...]` and rules as `<replacement>;<regex>`.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{PipelineStep, StepContext};
use crate::dataset::{Dataset, Row};
use crate::error::{ReferenceError, StepResult};
use crate::parser::{decode_content, detect_encoding};

pub const DEFAULT_UNMATCHED: &str = "OTHER";
pub const DEFAULT_UNKNOWN: &str = "UNKNOWN";
pub const DEFAULT_THRESHOLD: f64 = 0.4;

static NON_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}]").expect("valid regex"));

/// Uppercase and drop everything that is not a letter.
pub fn normalize_label(label: &str) -> String {
    NON_LETTER.replace_all(&label.to_uppercase(), "").into_owned()
}

/// Levenshtein edit distance, counted in chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row = vec![0; b.len() + 1];

    for (i, a_char) in a.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

/// Edit distance divided by the longer length, in `0.0..=1.0`.
pub fn normalized_distance(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f64 / longest as f64
}

// =============================================================================
// Reference data
// =============================================================================

/// A canonical category and its normalized comparison key.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub name: String,
    pub key: String,
}

/// A fallback rewrite applied to the raw label.
#[derive(Debug, Clone)]
pub struct Rule {
    pub replacement: String,
    pub pattern: Regex,
}

fn read_reference(path: &Path) -> Result<String, ReferenceError> {
    let bytes = fs::read(path).map_err(|source| ReferenceError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decode_content(&bytes, &detect_encoding(&bytes)))
}

/// Categories from `<id>;<CATEGORY>` lines, in file order.
pub fn parse_categories(content: &str) -> Vec<Category> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match line.split(';').nth(1).map(str::trim) {
            Some(name) if !name.is_empty() => Some(Category {
                name: name.to_string(),
                key: normalize_label(name),
            }),
            _ => {
                debug!(line = n + 1, "skipping malformed category line");
                None
            }
        })
        .collect()
}

/// Rules from `<replacement>;<regex>` lines, in file order.
pub fn parse_rules(content: &str) -> Vec<Rule> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| {
            let Some((replacement, pattern)) = line.split_once(';') else {
                debug!(line = n + 1, "skipping malformed rule line");
                return None;
            };
            match Regex::new(pattern) {
                Ok(pattern) => Some(Rule {
                    replacement: replacement.to_string(),
                    pattern,
                }),
                Err(e) => {
                    debug!(line = n + 1, error = %e, "skipping rule with invalid regex");
                    None
                }
            }
        })
        .collect()
}

pub fn load_categories(path: &Path) -> Result<Vec<Category>, ReferenceError> {
    Ok(parse_categories(&read_reference(path)?))
}

pub fn load_rules(path: &Path) -> Result<Vec<Rule>, ReferenceError> {
    Ok(parse_rules(&read_reference(path)?))
}

// =============================================================================
// Matcher
// =============================================================================

#[derive(Debug, Clone)]
pub struct CategoryMatcher {
    categories: Vec<Category>,
    rules: Vec<Rule>,
    threshold: f64,
    unmatched: String,
    unknown: String,
}

impl CategoryMatcher {
    pub fn new(categories: Vec<Category>, rules: Vec<Rule>) -> Self {
        Self {
            categories,
            rules,
            threshold: DEFAULT_THRESHOLD,
            unmatched: DEFAULT_UNMATCHED.to_string(),
            unknown: DEFAULT_UNKNOWN.to_string(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_sentinels(mut self, unmatched: &str, unknown: &str) -> Self {
        self.unmatched = unmatched.to_string();
        self.unknown = unknown.to_string();
        self
    }

    /// Closest category within the threshold. Ties keep file order.
    pub fn match_fuzzy(&self, normalized: &str) -> Option<&str> {
        let mut best: Option<(&Category, f64)> = None;
        for category in &self.categories {
            let score = normalized_distance(normalized, &category.key);
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((category, score));
            }
        }
        best.filter(|(_, score)| *score <= self.threshold)
            .map(|(category, _)| category.name.as_str())
    }

    /// Result of the first rule that rewrites the raw label.
    pub fn match_rules(&self, raw: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| {
            let replaced = rule.pattern.replace_all(raw, rule.replacement.as_str());
            (replaced != raw).then(|| replaced.into_owned())
        })
    }

    pub fn classify(&self, label: Option<&str>) -> String {
        let raw = label.unwrap_or_default();
        let normalized = normalize_label(raw);
        if normalized.is_empty() {
            return self.unknown.clone();
        }
        if let Some(name) = self.match_fuzzy(&normalized) {
            return name.to_string();
        }
        self.match_rules(raw)
            .unwrap_or_else(|| self.unmatched.clone())
    }
}

// =============================================================================
// Step
// =============================================================================

/// Overwrites `column` with the matched category of each row.
pub struct MatchCategoriesStep {
    pub column: String,
    pub reference_file: PathBuf,
    pub rules_file: PathBuf,
    pub unmatched: String,
    pub unknown: String,
    pub threshold: f64,
}

impl MatchCategoriesStep {
    fn matcher(&self) -> Result<CategoryMatcher, ReferenceError> {
        let categories = load_categories(&self.reference_file)?;
        let rules = load_rules(&self.rules_file)?;
        debug!(categories = categories.len(), rules = rules.len(), "loaded reference data");
        Ok(CategoryMatcher::new(categories, rules)
            .with_threshold(self.threshold)
            .with_sentinels(&self.unmatched, &self.unknown))
    }
}

impl PipelineStep for MatchCategoriesStep {
    fn label(&self) -> &str {
        "match_categories"
    }

    fn run(&self, dataset: Dataset, _ctx: &mut StepContext<'_>) -> StepResult<Dataset> {
        let idx = dataset.schema().require(&self.column)?;
        let matcher = self.matcher()?;
        let (schema, partitions, level) = dataset.into_parts();

        let partitions: Vec<Vec<Row>> = partitions
            .into_par_iter()
            .map(|rows| {
                rows.into_iter()
                    .map(|mut row| {
                        row[idx] = Some(matcher.classify(row[idx].as_deref()));
                        row
                    })
                    .collect()
            })
            .collect();

        let ds = Dataset::new(schema, partitions, level)?;
        let unmatched = ds
            .rows()
            .filter(|r| r[idx].as_deref() == Some(self.unmatched.as_str()))
            .count();
        info!(column = %self.column, rows = ds.row_count(), unmatched, "matched categories");
        Ok(ds)
    }
}
