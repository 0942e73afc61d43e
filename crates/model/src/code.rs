//! Harmonized System codes and their hierarchy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A classification code, stored as its digits only.
///
/// Accepts any of the usual spellings (`8471.30`, `84.71.30`, `8471300000`)
/// and keeps the digits, so two spellings of the same code compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HsCode(String);

/// Errors parsing a code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("code has no digits: {0:?}")]
    NoDigits(String),
    #[error("code must have an even number of digits between 2 and 10: {0:?}")]
    BadLength(String),
}

impl HsCode {
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(CodeError::NoDigits(raw.to_string()));
        }
        if digits.len() < 2 || digits.len() > 10 || digits.len() % 2 != 0 {
            return Err(CodeError::BadLength(raw.to_string()));
        }
        Ok(Self(digits))
    }

    /// The raw digit string.
    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Two-digit chapter number.
    pub fn chapter(&self) -> u8 {
        self.0[..2].parse().unwrap_or(0)
    }

    /// Four-digit heading, if the code is at least that specific.
    pub fn heading(&self) -> Option<&str> {
        self.0.get(..4)
    }

    /// Six-digit international subheading, if present.
    pub fn hs6(&self) -> Option<&str> {
        self.0.get(..6)
    }

    /// Key used to merge candidates that differ only below the subheading.
    pub fn merge_key(&self) -> &str {
        self.hs6().unwrap_or(&self.0)
    }

    pub fn level(&self) -> CodeLevel {
        match self.0.len() {
            2 => CodeLevel::Chapter,
            4 => CodeLevel::Heading,
            6 => CodeLevel::Subheading,
            _ => CodeLevel::National,
        }
    }

    pub fn section(&self) -> HsSection {
        HsSection::from_chapter(self.chapter())
    }

    /// True when `prefix` is this code or one of its ancestors.
    pub fn starts_with(&self, prefix: &HsCode) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for HsCode {
    /// Dotted form: `8471.30.00.00`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.0;
        if d.len() <= 4 {
            return f.write_str(d);
        }
        f.write_str(&d[..4])?;
        let mut rest = &d[4..];
        while !rest.is_empty() {
            let take = rest.len().min(2);
            write!(f, ".{}", &rest[..take])?;
            rest = &rest[take..];
        }
        Ok(())
    }
}

impl TryFrom<String> for HsCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HsCode> for String {
    fn from(code: HsCode) -> Self {
        code.0
    }
}

/// Depth of a code in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeLevel {
    Chapter,
    Heading,
    Subheading,
    National,
}

/// The 21 sections of the nomenclature, used as the broad category of a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HsSection {
    LiveAnimals,
    VegetableProducts,
    FatsAndOils,
    PreparedFoodstuffs,
    MineralProducts,
    Chemicals,
    PlasticsAndRubber,
    HidesAndLeather,
    Wood,
    Paper,
    Textiles,
    Footwear,
    StoneAndGlass,
    PreciousMetals,
    BaseMetals,
    MachineryAndElectrical,
    Vehicles,
    Instruments,
    Arms,
    MiscellaneousManufactured,
    Art,
    Unknown,
}

impl HsSection {
    pub fn from_chapter(chapter: u8) -> Self {
        match chapter {
            1..=5 => Self::LiveAnimals,
            6..=14 => Self::VegetableProducts,
            15 => Self::FatsAndOils,
            16..=24 => Self::PreparedFoodstuffs,
            25..=27 => Self::MineralProducts,
            28..=38 => Self::Chemicals,
            39..=40 => Self::PlasticsAndRubber,
            41..=43 => Self::HidesAndLeather,
            44..=46 => Self::Wood,
            47..=49 => Self::Paper,
            50..=63 => Self::Textiles,
            64..=67 => Self::Footwear,
            68..=70 => Self::StoneAndGlass,
            71 => Self::PreciousMetals,
            72..=83 => Self::BaseMetals,
            84..=85 => Self::MachineryAndElectrical,
            86..=89 => Self::Vehicles,
            90..=92 => Self::Instruments,
            93 => Self::Arms,
            94..=96 => Self::MiscellaneousManufactured,
            97 => Self::Art,
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::LiveAnimals => "live animals and animal products",
            Self::VegetableProducts => "vegetable products",
            Self::FatsAndOils => "fats and oils",
            Self::PreparedFoodstuffs => "prepared foodstuffs and beverages",
            Self::MineralProducts => "mineral products",
            Self::Chemicals => "chemical products",
            Self::PlasticsAndRubber => "plastics and rubber",
            Self::HidesAndLeather => "hides, skins and leather",
            Self::Wood => "wood and articles of wood",
            Self::Paper => "paper and paperboard",
            Self::Textiles => "textiles and textile articles",
            Self::Footwear => "footwear and headgear",
            Self::StoneAndGlass => "stone, ceramic and glass",
            Self::PreciousMetals => "precious metals and jewellery",
            Self::BaseMetals => "base metals",
            Self::MachineryAndElectrical => "machinery and electrical equipment",
            Self::Vehicles => "vehicles",
            Self::Instruments => "optical, medical and measuring instruments",
            Self::Arms => "arms and ammunition",
            Self::MiscellaneousManufactured => "miscellaneous manufactured articles",
            Self::Art => "works of art",
            Self::Unknown => "unknown",
        }
    }
}
