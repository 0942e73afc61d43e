//! Term tables mapping normalized vocabulary onto the closed attribute set.

use hsclass_model::{ExtractedFeatures, Material, Origin, ProcessingLevel, Usage};

/// True when `term` is a keyword, or a phrase present in the normalized text.
pub fn matches_term(features: &ExtractedFeatures, term: &str) -> bool {
    features.has_keyword(term) || (term.contains(' ') && features.contains_phrase(term))
}

/// Terms per attribute value, normalized through the active lexicon.
#[derive(Debug, Clone)]
pub(crate) struct TermTable<T> {
    entries: Vec<(T, Vec<String>)>,
}

impl<T: Copy> TermTable<T> {
    pub(crate) fn build(raw: &[(T, &[&str])], normalize: impl Fn(&str) -> String) -> Self {
        let entries = raw
            .iter()
            .map(|(value, terms)| {
                let terms = terms
                    .iter()
                    .map(|t| normalize(t))
                    .filter(|t| !t.is_empty())
                    .collect();
                (*value, terms)
            })
            .collect();
        Self { entries }
    }

    fn hits<'a>(&'a self, features: &'a ExtractedFeatures) -> impl Iterator<Item = (T, usize)> + 'a {
        self.entries.iter().map(move |(value, terms)| {
            let n = terms.iter().filter(|t| matches_term(features, t)).count();
            (*value, n)
        })
    }

    /// Value with the most matching terms. Ties go to the earlier entry.
    pub(crate) fn best(&self, features: &ExtractedFeatures) -> Option<T> {
        let mut best: Option<(T, usize)> = None;
        for (value, n) in self.hits(features) {
            if n > 0 && best.map_or(true, |(_, m)| n > m) {
                best = Some((value, n));
            }
        }
        best.map(|(v, _)| v)
    }

    /// Single-token terms with their value, in table order.
    pub(crate) fn single_terms(&self) -> impl Iterator<Item = (T, &str)> + '_ {
        self.entries.iter().flat_map(|(value, terms)| {
            terms
                .iter()
                .filter(|t| !t.contains(' '))
                .map(move |t| (*value, t.as_str()))
        })
    }

    /// First value, in table order, with any matching term.
    pub(crate) fn first(&self, features: &ExtractedFeatures) -> Option<T> {
        self.hits(features).find(|(_, n)| *n > 0).map(|(v, _)| v)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AttributeTables {
    pub usage: TermTable<Usage>,
    pub material: TermTable<Material>,
    pub processing: TermTable<ProcessingLevel>,
    pub origin: TermTable<Origin>,
}

impl AttributeTables {
    pub(crate) fn build(normalize: impl Fn(&str) -> String) -> Self {
        Self {
            usage: TermTable::build(USAGE_TERMS, &normalize),
            material: TermTable::build(MATERIAL_TERMS, &normalize),
            processing: TermTable::build(PROCESSING_TERMS, &normalize),
            origin: TermTable::build(ORIGIN_TERMS, &normalize),
        }
    }
}

const USAGE_TERMS: &[(Usage, &[&str])] = &[
    (
        Usage::Computing,
        &[
            "laptop", "computer", "mouse", "keyboard", "server", "ram", "ssd", "processor",
            "cpu", "intel", "tablet", "printer", "scanner", "hard drive", "motherboard",
        ],
    ),
    (
        Usage::Telecom,
        &["smartphone", "phone", "router", "modem", "antenna", "wifi", "transceiver", "headphone"],
    ),
    (
        Usage::Apparel,
        &[
            "shirt", "t shirt", "tshirt", "trousers", "dress", "jacket", "sweater", "garment",
            "clothing", "sock", "jeans", "knit", "knitted",
        ],
    ),
    (Usage::Footwear, &["shoe", "boot", "sandal", "sneaker", "footwear", "sole"]),
    (
        Usage::Food,
        &[
            "coffee", "chocolate", "cocoa", "honey", "meat", "beef", "fish", "cheese", "cereal",
            "fruit", "sugar", "rice", "flour", "food", "roasted", "edible",
        ],
    ),
    (Usage::Beverage, &["wine", "beer", "juice", "beverage", "whisky", "liquor", "drink"]),
    (
        Usage::LiveAnimals,
        &["live", "bovine", "calf", "cattle", "horse", "pig", "poultry", "breeding"],
    ),
    (
        Usage::Vehicles,
        &["car", "vehicle", "motorcycle", "bicycle", "truck", "trailer", "automobile"],
    ),
    (
        Usage::Machinery,
        &["machine", "compressor", "pump", "engine", "motor", "turbine", "generator", "lathe"],
    ),
    (Usage::Tools, &["drill", "hammer", "screwdriver", "saw", "wrench", "tool", "plier"]),
    (
        Usage::Construction,
        &["cement", "brick", "tile", "plaster", "beam", "construction", "concrete"],
    ),
    (Usage::Toys, &["toy", "doll", "puzzle", "ball", "game", "plush"]),
    (
        Usage::Medical,
        &[
            "syringe", "thermometer", "mask", "glove", "bandage", "medical", "surgical",
            "medicine", "diagnostic",
        ],
    ),
    (Usage::Stationery, &["pencil", "pen", "eraser", "stapler", "notebook paper", "envelope"]),
    (
        Usage::Furniture,
        &["chair", "table", "desk", "sofa", "bed", "furniture", "shelf", "cabinet", "wardrobe"],
    ),
    (
        Usage::Jewelry,
        &["necklace", "ring", "bracelet", "earring", "jewelry", "jewellery", "watch"],
    ),
    (
        Usage::Chemicals,
        &["acid", "solvent", "resin", "polymer", "adhesive", "paint", "reagent", "chemical"],
    ),
    (Usage::Agriculture, &["seed", "fertilizer", "pesticide", "seedling", "harvest"]),
    (
        Usage::HouseholdAppliances,
        &["refrigerator", "washing machine", "microwave", "blender", "oven", "vacuum cleaner"],
    ),
];

const MATERIAL_TERMS: &[(Material, &[&str])] = &[
    (Material::Plastic, &["plastic", "polyethylene", "pvc", "polypropylene", "acrylic"]),
    (Material::Rubber, &["rubber", "latex", "vulcanized"]),
    (Material::Steel, &["steel", "stainless", "inox"]),
    (Material::Iron, &["iron", "cast iron"]),
    (Material::Aluminium, &["aluminium"]),
    (Material::Copper, &["copper", "brass", "bronze"]),
    (Material::Wood, &["wood", "timber", "plywood", "bamboo"]),
    (Material::Paper, &["paper", "cardboard", "paperboard"]),
    (Material::Glass, &["glass", "crystal"]),
    (Material::Ceramic, &["ceramic", "porcelain", "stoneware"]),
    (Material::Cotton, &["cotton"]),
    (Material::Wool, &["wool", "cashmere"]),
    (Material::Synthetic, &["polyester", "nylon", "synthetic", "elastane", "spandex"]),
    (Material::Leather, &["leather", "suede"]),
    (Material::Gold, &["gold"]),
    (Material::Silver, &["silver"]),
    (Material::Animal, &["bovine", "beef", "pork", "poultry", "hide", "bone"]),
    (Material::Vegetable, &["bean", "grain", "plant", "vegetable", "leaf"]),
];

/// Order is precedence: the first level with a hit wins.
const PROCESSING_TERMS: &[(ProcessingLevel, &[&str])] = &[
    (
        ProcessingLevel::Unassembled,
        &[
            "unassembled", "disassembled", "incomplete", "unfinished", "sin terminar",
            "desarmado", "incompleto", "ckd", "kit",
        ],
    ),
    (
        ProcessingLevel::Mixture,
        &["mixture", "blend", "mixed", "composite", "mezcla", "mixto", "combined"],
    ),
    (
        ProcessingLevel::Raw,
        &["raw", "unroasted", "crude", "unprocessed", "fresh", "crudo", "natural"],
    ),
    (
        ProcessingLevel::SemiFinished,
        &["semi finished", "semifinished", "ingot", "blank", "billet", "semielaborado"],
    ),
    (ProcessingLevel::Finished, &["finished", "assembled", "ready", "terminado", "roasted"]),
];

const ORIGIN_TERMS: &[(Origin, &[&str])] = &[
    (Origin::China, &["china", "chinese", "prc"]),
    (
        Origin::UnitedStates,
        &["usa", "united states", "eeuu", "estados unidos", "american"],
    ),
    (Origin::Germany, &["germany", "german", "alemania"]),
    (Origin::Japan, &["japan", "japanese", "japon"]),
    (Origin::Mexico, &["mexico", "mexican"]),
    (Origin::Brazil, &["brazil", "brasil", "brazilian"]),
    (Origin::Argentina, &["argentina", "argentine"]),
    (Origin::Colombia, &["colombia", "colombian"]),
    (Origin::SouthKorea, &["korea", "south korea", "corea", "korean"]),
    (Origin::India, &["india", "indian"]),
];
