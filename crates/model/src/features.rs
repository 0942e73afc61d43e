//! Extracted product features.
//!
//! The attribute set is closed: every attribute has its own enum, so an
//! unknown attribute name cannot reach the scoring stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Primary use of the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    Computing,
    Telecom,
    Apparel,
    Footwear,
    Food,
    Beverage,
    LiveAnimals,
    Vehicles,
    Machinery,
    Tools,
    Construction,
    Toys,
    Medical,
    Stationery,
    Furniture,
    Jewelry,
    Chemicals,
    Agriculture,
    HouseholdAppliances,
}

/// Material that gives the product its essential character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Material {
    Plastic,
    Rubber,
    Steel,
    Iron,
    Aluminium,
    Copper,
    Wood,
    Paper,
    Glass,
    Ceramic,
    Cotton,
    Wool,
    Synthetic,
    Leather,
    Gold,
    Silver,
    Animal,
    Vegetable,
}

/// How far the goods have been worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingLevel {
    Raw,
    SemiFinished,
    Finished,
    /// Incomplete, unfinished or unassembled article.
    Unassembled,
    /// Mixture or composite goods.
    Mixture,
}

/// Country of origin, where one of the tracked trade partners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    China,
    UnitedStates,
    Germany,
    Japan,
    Mexico,
    Brazil,
    Argentina,
    Colombia,
    SouthKorea,
    India,
    Other,
}

/// Attribute names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    UsagePrimary,
    MaterialPrincipal,
    ProcessingLevel,
    Origin,
}

/// Attribute value; one variant per attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Usage(Usage),
    Material(Material),
    Processing(ProcessingLevel),
    Origin(Origin),
}

impl FeatureKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsagePrimary => "usage_primary",
            Self::MaterialPrincipal => "material_principal",
            Self::ProcessingLevel => "processing_level",
            Self::Origin => "origin",
        }
    }
}

impl FeatureValue {
    pub fn as_str(&self) -> String {
        // serde's snake_case rendering is the canonical spelling
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// The closed attribute set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_primary: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_principal: Option<Material>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_level: Option<ProcessingLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Present attributes as key/value pairs, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (FeatureKey, FeatureValue)> + '_ {
        [
            self.usage_primary
                .map(|v| (FeatureKey::UsagePrimary, FeatureValue::Usage(v))),
            self.material_principal
                .map(|v| (FeatureKey::MaterialPrincipal, FeatureValue::Material(v))),
            self.processing_level
                .map(|v| (FeatureKey::ProcessingLevel, FeatureValue::Processing(v))),
            self.origin.map(|v| (FeatureKey::Origin, FeatureValue::Origin(v))),
        ]
        .into_iter()
        .flatten()
    }

    pub fn get(&self, key: FeatureKey) -> Option<FeatureValue> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// Features derived from one request's text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFeatures {
    /// Lowercased, accent-free, lemmatized text with stopwords removed
    pub normalized_text: String,

    /// Normalized tokens plus lexicon synonyms
    pub keywords: BTreeSet<String>,

    pub attributes: Attributes,
}

impl ExtractedFeatures {
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.contains(keyword)
    }

    /// True when `phrase` occurs in the normalized text on word boundaries.
    pub fn contains_phrase(&self, phrase: &str) -> bool {
        if phrase.is_empty() {
            return false;
        }
        let haystack = format!(" {} ", self.normalized_text);
        haystack.contains(&format!(" {} ", phrase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_iter_in_key_order() {
        let attrs = Attributes {
            usage_primary: Some(Usage::Computing),
            origin: Some(Origin::China),
            ..Default::default()
        };
        let pairs: Vec<_> = attrs.iter().collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, FeatureKey::UsagePrimary);
        assert_eq!(pairs[1], (FeatureKey::Origin, FeatureValue::Origin(Origin::China)));
        assert!(Attributes::default().is_empty());
    }

    #[test]
    fn test_feature_value_spelling() {
        assert_eq!(FeatureValue::Usage(Usage::HouseholdAppliances).as_str(), "household_appliances");
        assert_eq!(FeatureValue::Material(Material::Cotton).as_str(), "cotton");
    }

    #[test]
    fn test_contains_phrase_respects_word_boundaries() {
        let features = ExtractedFeatures {
            normalized_text: "cotton t shirt knit".to_string(),
            ..Default::default()
        };
        assert!(features.contains_phrase("t shirt"));
        assert!(!features.contains_phrase("shir"));
        assert!(!features.contains_phrase(""));
    }
}
