//! Best-effort product category detection from filename and text signatures

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

use crate::types::{CategoryMatch, ProductCategory};

/// Chars of extracted text inspected for signatures
pub const DETECTION_WINDOW_CHARS: usize = 4000;
/// Results below this confidence are reported as `Unknown`
pub const MIN_CONFIDENCE: f32 = 0.25;
/// Score at which a category counts as strongly evidenced
const STRONG_SCORE: f32 = 3.0;
/// Repeated text hits stop counting after this many
const MAX_TEXT_HITS: usize = 3;

/// Pluggable category detection
pub trait CategoryDetector: Send + Sync {
    /// Classify a document from its filename and extracted text
    fn detect(&self, filename: &str, text: &str) -> CategoryMatch;
}

struct Signature {
    category: ProductCategory,
    filename: Vec<Regex>,
    text: Vec<(Regex, f32)>,
}

/// Keyword-signature detector
///
/// A filename hit weighs 3.0; text hits weigh per keyword and saturate after
/// a few occurrences. Confidence is the winner's share of the total score,
/// scaled down when the winning evidence is thin.
pub struct KeywordCategoryDetector {
    signatures: Vec<Signature>,
    min_confidence: f32,
}

impl KeywordCategoryDetector {
    pub fn new() -> Self {
        Self::with_min_confidence(MIN_CONFIDENCE)
    }

    pub fn with_min_confidence(min_confidence: f32) -> Self {
        let signatures = vec![
            signature(
                ProductCategory::Everbridge,
                &["everbridge"],
                &[
                    ("everbridge", 2.0),
                    ("mass notification", 1.0),
                    ("critical event management", 1.0),
                    ("incident communications?", 0.5),
                ],
            ),
            signature(
                ProductCategory::InnerRange,
                &["inner[ _-]?range", "integriti", "inception"],
                &[
                    ("inner range", 2.0),
                    ("integriti", 1.5),
                    ("inception controller", 1.0),
                    ("sifer", 1.0),
                ],
            ),
            signature(
                ProductCategory::Milestone,
                &["milestone", "xprotect"],
                &[
                    ("milestone", 2.0),
                    ("xprotect", 1.5),
                    ("smart client", 1.0),
                    ("recording server", 0.5),
                ],
            ),
            signature(
                ProductCategory::General,
                &["sop", "procedures?", "policy"],
                &[
                    ("standard operating procedures?", 1.0),
                    ("sops?", 0.5),
                    ("procedures?", 0.25),
                ],
            ),
        ];

        Self {
            signatures,
            min_confidence,
        }
    }
}

impl Default for KeywordCategoryDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryDetector for KeywordCategoryDetector {
    fn detect(&self, filename: &str, text: &str) -> CategoryMatch {
        let window: String = text.chars().take(DETECTION_WINDOW_CHARS).collect();

        let scores: Vec<(ProductCategory, f32)> = self
            .signatures
            .iter()
            .map(|sig| {
                let name_score = if sig.filename.iter().any(|re| re.is_match(filename)) {
                    STRONG_SCORE
                } else {
                    0.0
                };
                let text_score: f32 = sig
                    .text
                    .iter()
                    .map(|(re, weight)| re.find_iter(&window).take(MAX_TEXT_HITS).count() as f32 * weight)
                    .sum();
                (sig.category, name_score + text_score)
            })
            .collect();

        let total: f32 = scores.iter().map(|(_, s)| s).sum();
        // First signature wins ties
        let best = scores
            .iter()
            .fold(None::<(ProductCategory, f32)>, |acc, &(c, s)| match acc {
                Some((_, best)) if best >= s => acc,
                _ => Some((c, s)),
            });

        let Some((category, score)) = best else {
            return CategoryMatch::unknown();
        };
        if score <= 0.0 {
            return CategoryMatch::unknown();
        }

        let confidence = (score / total) * (score / STRONG_SCORE).min(1.0);
        if confidence < self.min_confidence {
            tracing::debug!(
                "Category guess {:?} for '{}' below threshold ({:.2})",
                category,
                filename,
                confidence
            );
            return CategoryMatch {
                category: ProductCategory::Unknown,
                confidence,
            };
        }

        CategoryMatch {
            category,
            confidence,
        }
    }
}

fn signature(
    category: ProductCategory,
    filename: &[&str],
    text: &[(&str, f32)],
) -> Signature {
    Signature {
        category,
        filename: filename.iter().map(|p| keyword_regex(p)).collect(),
        text: text.iter().map(|(p, w)| (keyword_regex(p), *w)).collect(),
    }
}

/// Case-insensitive match on word edges; `_` and `-` count as separators in filenames
fn keyword_regex(pattern: &str) -> Regex {
    RegexBuilder::new(&format!(r"(?:^|[^\p{{L}}\p{{N}}]){}(?:$|[^\p{{L}}\p{{N}}])", pattern))
        .case_insensitive(true)
        .build()
        .expect("Invalid category regex")
}

/// Detect a category with the default keyword detector
pub fn detect_category(filename: &str, text: &str) -> CategoryMatch {
    static DETECTOR: OnceLock<KeywordCategoryDetector> = OnceLock::new();
    DETECTOR
        .get_or_init(KeywordCategoryDetector::new)
        .detect(filename, text)
}
