//! Feature extraction for product descriptions.
//!
//! Provides the text side of classification:
//! - Normalization (case, accents, punctuation, lemmas, stopwords)
//! - Keyword sets with lexicon synonyms
//! - Closed-set attribute detection (usage, material, processing, origin)
//! - Phonetic and fuzzy lexical comparison

mod attributes;
pub mod lexicon;

pub use attributes::matches_term;
pub use lexicon::{strip_plural, Lexicon, LexiconError, LexiconSource};

use attributes::AttributeTables;
use hsclass_model::{
    Attributes, Degraded, DegradedReason, ExtractedFeatures, Origin, RequestAttributes, Usage,
};
use rphonetic::{Encoder, Metaphone, Soundex};
use std::collections::BTreeSet;
use tracing::debug;

/// Lowercase, strip accents, turn punctuation into spaces, collapse whitespace.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        let c = strip_accent(c);
        if c.is_alphanumeric() {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        _ => c,
    }
}

/// Turns raw product text into `ExtractedFeatures`.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    lexicon: Option<Lexicon>,
    tables: AttributeTables,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(Lexicon::builtin())
    }
}

impl FeatureExtractor {
    pub fn new(lexicon: Lexicon) -> Self {
        let mut extractor = Self {
            lexicon: Some(lexicon),
            tables: AttributeTables::build(fold),
        };
        extractor.tables = AttributeTables::build(|t| extractor.normalize(t));
        extractor
    }

    /// Extractor with no lexical resources; every extraction is degraded.
    pub fn without_lexicon() -> Self {
        Self {
            lexicon: None,
            tables: AttributeTables::build(fold),
        }
    }

    pub fn has_lexicon(&self) -> bool {
        self.lexicon.is_some()
    }

    /// Full normalization. Idempotent: `normalize(normalize(t)) == normalize(t)`.
    ///
    /// Without a lexicon this is `fold`.
    pub fn normalize(&self, text: &str) -> String {
        let folded = fold(text);
        let Some(lexicon) = &self.lexicon else {
            return folded;
        };
        folded
            .split(' ')
            .filter(|t| !t.is_empty() && !lexicon.is_stopword(t))
            .map(|t| lexicon.lemmatize(t))
            .filter(|t| !lexicon.is_stopword(t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Single-token usage vocabulary as `(normalized term, usage)`, in table
    /// order.
    pub fn usage_terms(&self) -> Vec<(String, Usage)> {
        self.tables
            .usage
            .single_terms()
            .map(|(usage, term)| (term.to_string(), usage))
            .collect()
    }

    pub fn extract(&self, text: &str) -> Result<ExtractedFeatures, Degraded<ExtractedFeatures>> {
        self.extract_with_attrs(text, &RequestAttributes::default())
    }

    /// Extract features, letting explicit request attributes override the
    /// ones detected in the text.
    pub fn extract_with_attrs(
        &self,
        text: &str,
        attrs: &RequestAttributes,
    ) -> Result<ExtractedFeatures, Degraded<ExtractedFeatures>> {
        let normalized_text = self.normalize(text);
        let mut features = ExtractedFeatures {
            keywords: self.keywords(&normalized_text),
            normalized_text,
            attributes: Attributes::default(),
        };

        if self.lexicon.is_none() {
            debug!("lemmatizer unavailable, returning unlemmatized features");
            return Err(Degraded {
                reason: DegradedReason::LemmatizerUnavailable,
                partial: features,
            });
        }

        for extra in [&attrs.brand, &attrs.measurements].into_iter().flatten() {
            let normalized = self.normalize(extra);
            features.keywords.extend(normalized.split(' ').filter(|t| !t.is_empty()).map(str::to_string));
        }

        features.attributes = self.detect_attributes(&features, attrs);
        debug!(
            keywords = features.keywords.len(),
            attributes = ?features.attributes,
            "features extracted"
        );
        Ok(features)
    }

    fn keywords(&self, normalized: &str) -> BTreeSet<String> {
        let mut keywords = BTreeSet::new();
        for token in normalized.split(' ').filter(|t| !t.is_empty()) {
            keywords.insert(token.to_string());
            if let Some(lexicon) = &self.lexicon {
                keywords.extend(lexicon.synonyms(token).iter().cloned());
            }
        }
        keywords
    }

    fn detect_attributes(&self, features: &ExtractedFeatures, attrs: &RequestAttributes) -> Attributes {
        let mut detected = Attributes {
            usage_primary: self.tables.usage.best(features),
            material_principal: self.tables.material.best(features),
            processing_level: self.tables.processing.first(features),
            origin: self.tables.origin.best(features),
        };

        if let Some(usage) = attrs.usage.as_deref().and_then(|u| self.tables.usage.best(&self.attribute_features(u))) {
            detected.usage_primary = Some(usage);
        }
        if let Some(material) = attrs
            .material
            .as_deref()
            .and_then(|m| self.tables.material.best(&self.attribute_features(m)))
        {
            detected.material_principal = Some(material);
        }
        if let Some(origin) = attrs.origin.as_deref().filter(|o| !o.trim().is_empty()) {
            detected.origin = Some(self.tables.origin.best(&self.attribute_features(origin)).unwrap_or(Origin::Other));
        }

        detected
    }

    /// Features of a short attribute value, used to look it up in the tables.
    fn attribute_features(&self, value: &str) -> ExtractedFeatures {
        let normalized_text = self.normalize(value);
        ExtractedFeatures {
            keywords: self.keywords(&normalized_text),
            normalized_text,
            attributes: Attributes::default(),
        }
    }
}

/// Phonetic encoding results for a word.
#[derive(Debug, Clone, Default)]
pub struct PhoneticCodes {
    pub soundex: Option<String>,
    pub metaphone: Option<String>,
}

/// Compute phonetic encodings for a word.
pub fn compute_phonetics(text: &str) -> PhoneticCodes {
    let soundex = Soundex::default();
    let metaphone = Metaphone::default();

    let soundex_code = soundex.encode(text);
    let metaphone_code = metaphone.encode(text);

    PhoneticCodes {
        soundex: if soundex_code.is_empty() { None } else { Some(soundex_code) },
        metaphone: if metaphone_code.is_empty() { None } else { Some(metaphone_code) },
    }
}

/// Shortest word compared phonetically; shorter words collide too often.
pub const MIN_PHONETIC_LEN: usize = 5;

/// Two words sound alike under both Soundex and Metaphone.
///
/// Used to tolerate misspellings like "colour"/"color" in rule keywords.
pub fn phonetic_equivalent(a: &str, b: &str) -> bool {
    if a.chars().count() < MIN_PHONETIC_LEN || b.chars().count() < MIN_PHONETIC_LEN {
        return false;
    }
    let ca = compute_phonetics(a);
    let cb = compute_phonetics(b);
    matches!((&ca.soundex, &cb.soundex), (Some(x), Some(y)) if x == y)
        && matches!((&ca.metaphone, &cb.metaphone), (Some(x), Some(y)) if x == y)
}

/// Order-insensitive fuzzy similarity of two normalized texts, in [0, 1].
pub fn lexical_similarity(a: &str, b: &str) -> f32 {
    let a = token_sort(a);
    let b = token_sort(b);
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b) as f32
}

fn token_sort(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Best fuzzy score of `query` against any window of `target` with the same
/// token count. Catches short queries embedded in long catalog titles.
pub fn partial_similarity(query: &str, target: &str) -> f32 {
    let q: Vec<&str> = query.split_whitespace().collect();
    let t: Vec<&str> = target.split_whitespace().collect();
    if q.is_empty() || t.is_empty() {
        return 0.0;
    }
    if t.len() <= q.len() {
        return lexical_similarity(query, target);
    }
    t.windows(q.len())
        .map(|w| lexical_similarity(query, &w.join(" ")))
        .fold(0.0, f32::max)
}
