//! The rule book: class specifications and keyword rules.

use hsclass_model::{Catalog, CodeLevel, HsCode, LegalRef, Material, RuleClass};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleBookError {
    #[error("failed to read rule book {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rule book: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate rule id: {0}")]
    DuplicateId(String),
    #[error("rule {0} has no trigger keywords")]
    NoKeywords(String),
    #[error("rule {id} has invalid priority weight {weight}")]
    BadWeight { id: String, weight: f32 },
}

/// Class-level keywords applied to every proposal of that class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub class: RuleClass,
    #[serde(default)]
    pub confirming: Vec<String>,
    #[serde(default)]
    pub contra: Vec<String>,
    #[serde(default)]
    pub legal_refs: Vec<LegalRef>,
}

/// A rule proposing one code when any trigger keyword matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub id: String,
    pub class: RuleClass,

    /// Trigger keywords or phrases; any one suffices
    pub keywords: Vec<String>,

    pub code: HsCode,

    #[serde(default = "default_priority_weight")]
    pub priority_weight: f32,

    #[serde(default)]
    pub confirming: Vec<String>,

    #[serde(default)]
    pub contra: Vec<String>,

    /// Material the code is defined by, for composite-goods bonuses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<Material>,

    #[serde(default)]
    pub legal_refs: Vec<LegalRef>,
}

fn default_priority_weight() -> f32 {
    1.0
}

/// Serde-loadable table of interpretation rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleBook {
    #[serde(default)]
    pub classes: Vec<ClassSpec>,
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
}

/// Weight of rules derived from catalog keywords; curated rules outrank them.
pub const CATALOG_RULE_WEIGHT: f32 = 0.5;

impl RuleBook {
    pub fn from_json(json: &str) -> Result<Self, RuleBookError> {
        let book: Self = serde_json::from_str(json)?;
        book.validate()?;
        Ok(book)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleBookError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RuleBookError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), RuleBookError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleBookError::DuplicateId(rule.id.clone()));
            }
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                return Err(RuleBookError::NoKeywords(rule.id.clone()));
            }
            if !rule.priority_weight.is_finite() || rule.priority_weight < 0.0 {
                return Err(RuleBookError::BadWeight {
                    id: rule.id.clone(),
                    weight: rule.priority_weight,
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn class_spec(&self, class: RuleClass) -> Option<&ClassSpec> {
        self.classes.iter().find(|c| c.class == class)
    }

    /// Add GRI 1 rules built from the keyword text of catalog headings and
    /// subheadings. Entries without keywords are skipped.
    pub fn with_catalog_headings(mut self, catalog: &dyn Catalog) -> Self {
        let existing: HashSet<String> = self.rules.iter().map(|r| r.id.clone()).collect();
        for entry in catalog.entries() {
            if !matches!(entry.level(), CodeLevel::Heading | CodeLevel::Subheading) {
                continue;
            }
            let keywords = split_keywords(&entry.keywords);
            if keywords.is_empty() {
                continue;
            }
            let id = format!("gri1-catalog-{}", entry.code.digits());
            if existing.contains(&id) {
                continue;
            }
            self.rules.push(KeywordRule {
                id,
                class: RuleClass::Gri1,
                keywords,
                code: entry.code.clone(),
                priority_weight: CATALOG_RULE_WEIGHT,
                confirming: Vec::new(),
                contra: Vec::new(),
                material: None,
                legal_refs: vec![LegalRef::Rule(RuleClass::Gri1)],
            });
        }
        self
    }

    /// Built-in rule book covering common trade goods.
    pub fn builtin() -> Self {
        let classes = vec![
            class(
                RuleClass::Gri1,
                &["incluido", "comprendido", "included", "specifically", "especificamente"],
                &["excluido", "no incluido", "excluding", "excepto", "except", "salvo", "no comprende", "not included"],
            ),
            class(
                RuleClass::Gri2,
                &["incompleto", "sin terminar", "unfinished", "incomplete", "unassembled", "mezcla", "mixture", "mixed"],
                &[],
            ),
            class(
                RuleClass::Gri3,
                &["caracter esencial", "essential character", "material principal", "especifico", "specific"],
                &[],
            ),
            class(RuleClass::Gri4, &["analogia", "similar", "akin", "analogous"], &[]),
            class(
                RuleClass::Gri5,
                &["estuche", "case", "caja", "box", "empaque", "packaging"],
                &["durable use", "utilizacion durable", "reusable"],
            ),
            class(RuleClass::Gri6, &["subpartida", "subheading"], &[]),
        ];

        let rules = vec![
            rule("gri1-laptop", RuleClass::Gri1, &["laptop", "portable computer", "notebook computer"], "847130")
                .confirming(&["computer", "intel", "ram", "ssd", "inch", "processor", "battery", "keyboard"])
                .refs(&[LegalRef::Note("84/5".into())]),
            rule("gri1-desktop", RuleClass::Gri1, &["desktop computer", "workstation"], "847150")
                .confirming(&["processor", "intel", "ram", "tower"])
                .refs(&[LegalRef::Note("84/5".into())]),
            rule("gri1-mouse", RuleClass::Gri1, &["mouse"], "847160")
                .confirming(&["usb", "wireless", "optical", "computer"])
                .contra(&["live", "rodent", "animal"]),
            rule("gri1-keyboard", RuleClass::Gri1, &["keyboard"], "847160")
                .confirming(&["usb", "wireless", "computer", "mechanical"])
                .contra(&["piano", "musical"]),
            rule("gri1-smartphone", RuleClass::Gri1, &["smartphone", "mobile phone", "cell phone"], "851713")
                .confirming(&["android", "ios", "5g", "4g", "sim", "camera"])
                .refs(&[LegalRef::Note("85/5".into())]),
            rule("gri1-router", RuleClass::Gri1, &["router", "modem"], "851762")
                .confirming(&["wifi", "ethernet", "network"]),
            rule("gri1-tshirt-cotton", RuleClass::Gri1, &["t shirt", "tshirt"], "610910")
                .confirming(&["cotton", "knit", "knitted"])
                .contra(&["polyester", "synthetic"])
                .material(Material::Cotton),
            rule("gri1-tshirt-other", RuleClass::Gri1, &["t shirt", "tshirt"], "610990")
                .weight(0.9)
                .confirming(&["polyester", "synthetic", "elastane"])
                .contra(&["cotton"])
                .material(Material::Synthetic),
            rule("gri1-coffee-roasted", RuleClass::Gri1, &["roasted coffee", "cafe tostado"], "090121")
                .weight(1.1)
                .confirming(&["ground", "bean", "arabica"])
                .contra(&["instant", "soluble"]),
            rule("gri1-coffee", RuleClass::Gri1, &["coffee", "cafe"], "090111")
                .confirming(&["green", "unroasted", "bean", "raw"])
                .contra(&["roasted", "instant", "soluble"]),
            rule("gri1-live-bovine", RuleClass::Gri1, &["bovine", "cattle", "calf"], "010229")
                .confirming(&["live", "breeding"])
                .contra(&["meat", "frozen", "carcass"])
                .refs(&[LegalRef::Note("01/1".into())]),
            rule("gri1-bovine-meat", RuleClass::Gri1, &["beef", "bovine meat"], "020130")
                .confirming(&["fresh", "chilled", "boneless"])
                .contra(&["live", "frozen"]),
            rule("gri1-leather-shoe", RuleClass::Gri1, &["leather shoe", "leather footwear"], "640399")
                .weight(1.1)
                .confirming(&["leather", "sole"])
                .material(Material::Leather),
            rule("gri1-shoe", RuleClass::Gri1, &["shoe", "footwear", "sneaker"], "640419")
                .confirming(&["textile", "canvas"]),
            rule("gri1-refrigerator", RuleClass::Gri1, &["refrigerator"], "841821")
                .confirming(&["household", "compression", "door"]),
            rule("gri1-washing-machine", RuleClass::Gri1, &["washing machine"], "845011")
                .confirming(&["household", "automatic", "kg"]),
            rule("gri1-drill", RuleClass::Gri1, &["drill"], "846721")
                .confirming(&["electric", "cordless", "hand"])
                .contra(&["oil", "rig"]),
            rule("gri1-toy", RuleClass::Gri1, &["toy", "doll", "puzzle"], "950300")
                .confirming(&["child", "plush", "game"]),
            rule("gri1-syringe", RuleClass::Gri1, &["syringe"], "901831")
                .confirming(&["medical", "sterile", "disposable"]),
            rule("gri1-thermometer", RuleClass::Gri1, &["thermometer"], "902511")
                .confirming(&["clinical", "digital", "liquid"]),
            rule("gri1-chair", RuleClass::Gri1, &["chair"], "940161")
                .confirming(&["upholstered", "wood", "seat"])
                .material(Material::Wood),
            rule("gri1-bicycle", RuleClass::Gri1, &["bicycle"], "871200")
                .confirming(&["pedal", "wheel", "frame"]),
            rule("gri1-car", RuleClass::Gri1, &["car", "automobile", "passenger vehicle"], "870323")
                .confirming(&["gasoline", "petrol", "engine", "cc"])
                .contra(&["toy", "scale model"]),
            rule("gri1-wine", RuleClass::Gri1, &["wine"], "220421")
                .confirming(&["grape", "bottle", "red", "white"]),
            rule("gri1-beer", RuleClass::Gri1, &["beer"], "220300")
                .confirming(&["malt", "lager", "bottle"]),
            rule("gri1-honey", RuleClass::Gri1, &["honey"], "040900")
                .confirming(&["natural", "bee"]),
            rule("gri1-cement", RuleClass::Gri1, &["cement"], "252329")
                .confirming(&["portland", "bag"]),
            rule("gri1-pencil", RuleClass::Gri1, &["pencil"], "960910")
                .confirming(&["graphite", "wood"]),
            rule("gri1-fertilizer", RuleClass::Gri1, &["fertilizer"], "310520")
                .confirming(&["nitrogen", "phosphorus", "potassium", "npk"]),
            rule("gri1-glove", RuleClass::Gri1, &["glove"], "401519")
                .confirming(&["rubber", "latex", "nitrile"])
                .material(Material::Rubber),
            rule("gri1-jewellery", RuleClass::Gri1, &["necklace", "bracelet", "earring"], "711319")
                .confirming(&["gold", "silver", "precious"])
                .material(Material::Gold),
            rule("gri2-unassembled-bicycle", RuleClass::Gri2, &["unassembled bicycle", "bicycle kit"], "871200")
                .confirming(&["frame", "wheel"])
                .material(Material::Steel)
                .refs(&[LegalRef::Rule(RuleClass::Gri2)]),
            rule("gri2-unassembled-furniture", RuleClass::Gri2, &["unassembled furniture", "flat pack", "mueble desarmado"], "940360")
                .confirming(&["wood", "board", "panel"])
                .material(Material::Wood),
            rule("gri3-computer-set", RuleClass::Gri3, &["laptop bundle", "computer set", "laptop set"], "847130")
                .confirming(&["mouse", "case", "charger"]),
            rule("gri4-smartwatch", RuleClass::Gri4, &["smartwatch", "smart watch"], "851762")
                .confirming(&["bluetooth", "notification", "heart rate"]),
            rule("gri5-laptop-case", RuleClass::Gri5, &["laptop case", "laptop bag", "laptop sleeve"], "420212")
                .weight(1.2)
                .confirming(&["padded", "zipper"])
                .material(Material::Synthetic),
            rule("gri5-camera-case", RuleClass::Gri5, &["camera case", "estuche camara"], "420292")
                .weight(1.2),
            rule("gri6-portable-computer", RuleClass::Gri6, &["portable", "lightweight"], "847130")
                .weight(0.5)
                .confirming(&["laptop", "computer"]),
            rule("gri6-smartphone", RuleClass::Gri6, &["smartphone"], "851713")
                .weight(0.5)
                .confirming(&["touchscreen", "android", "ios"]),
        ]
        .into_iter()
        .filter_map(RuleDraft::build)
        .collect();

        Self { classes, rules }
    }
}

/// Split catalog keyword text on commas, or on whitespace when there are none.
fn split_keywords(text: &str) -> Vec<String> {
    let parts: Vec<&str> = if text.contains(',') {
        text.split(',').collect()
    } else {
        text.split_whitespace().collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| p.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

fn class(rule_class: RuleClass, confirming: &[&str], contra: &[&str]) -> ClassSpec {
    ClassSpec {
        class: rule_class,
        confirming: strings(confirming),
        contra: strings(contra),
        legal_refs: vec![LegalRef::Rule(rule_class)],
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

struct RuleDraft {
    id: &'static str,
    class: RuleClass,
    keywords: &'static [&'static str],
    code: &'static str,
    priority_weight: f32,
    confirming: Vec<String>,
    contra: Vec<String>,
    material: Option<Material>,
    legal_refs: Vec<LegalRef>,
}

fn rule(
    id: &'static str,
    class: RuleClass,
    keywords: &'static [&'static str],
    code: &'static str,
) -> RuleDraft {
    RuleDraft {
        id,
        class,
        keywords,
        code,
        priority_weight: default_priority_weight(),
        confirming: Vec::new(),
        contra: Vec::new(),
        material: None,
        legal_refs: Vec::new(),
    }
}

impl RuleDraft {
    fn weight(mut self, w: f32) -> Self {
        self.priority_weight = w;
        self
    }

    fn confirming(mut self, items: &[&str]) -> Self {
        self.confirming = strings(items);
        self
    }

    fn contra(mut self, items: &[&str]) -> Self {
        self.contra = strings(items);
        self
    }

    fn material(mut self, m: Material) -> Self {
        self.material = Some(m);
        self
    }

    fn refs(mut self, refs: &[LegalRef]) -> Self {
        self.legal_refs = refs.to_vec();
        self
    }

    fn build(self) -> Option<KeywordRule> {
        let code = match HsCode::parse(self.code) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(rule = self.id, error = %e, "skipping builtin rule with invalid code");
                return None;
            }
        };
        Some(KeywordRule {
            id: self.id.to_string(),
            class: self.class,
            keywords: strings(self.keywords),
            code,
            priority_weight: self.priority_weight,
            confirming: self.confirming,
            contra: self.contra,
            material: self.material,
            legal_refs: self.legal_refs,
        })
    }
}
