use strsim::normalized_levenshtein;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Lowercases, strips diacritics and punctuation, collapses whitespace and
/// drops a leading article. Letters of any script are kept.
pub fn normalize_title(title: &str) -> String {
    let folded: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || is_separator(*c))
        .map(|c| if is_separator(c) { ' ' } else { c })
        .collect::<String>()
        .to_lowercase();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    for article in ["a ", "an ", "the "] {
        if let Some(rest) = collapsed.strip_prefix(article) {
            return rest.to_string();
        }
    }
    collapsed
}

pub fn surname(name: &str) -> String {
    let family = match name.split_once(',') {
        Some((family, _)) => family,
        None => name.split_whitespace().last().unwrap_or(name),
    };
    normalize_title(family)
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '/' | ':' | '_')
}

pub trait SimilarityPolicy {
    fn score(&self, wanted: &str, candidate: &str) -> f64;

    fn threshold(&self) -> f64;

    fn accepts(&self, wanted: &str, candidate: &str) -> bool {
        self.score(wanted, candidate) >= self.threshold()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TitleSimilarity {
    threshold: f64,
}

impl TitleSimilarity {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }
}

impl Default for TitleSimilarity {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl SimilarityPolicy for TitleSimilarity {
    fn score(&self, wanted: &str, candidate: &str) -> f64 {
        let wanted = normalize_title(wanted);
        let candidate = normalize_title(candidate);
        if wanted.is_empty() || candidate.is_empty() {
            return 0.0;
        }
        normalized_levenshtein(&wanted, &candidate)
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExactTitle;

impl SimilarityPolicy for ExactTitle {
    fn score(&self, wanted: &str, candidate: &str) -> f64 {
        let wanted = normalize_title(wanted);
        if !wanted.is_empty() && wanted == normalize_title(candidate) {
            1.0
        } else {
            0.0
        }
    }

    fn threshold(&self) -> f64 {
        1.0
    }
}
