//! Lexical resources: lemma table, synonyms and stopwords.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::fold;

#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("failed to read lexicon {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse lexicon: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("lexicon has no lemma entries")]
    Empty,
}

/// On-disk lexicon layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexiconSource {
    #[serde(default)]
    pub lemmas: HashMap<String, String>,
    #[serde(default)]
    pub synonyms: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub stopwords: Vec<String>,
}

/// Resolved lexicon. Every lemma maps to itself, so lemmatizing twice is
/// the same as lemmatizing once.
#[derive(Debug, Clone)]
pub struct Lexicon {
    lemmas: HashMap<String, String>,
    synonyms: HashMap<String, Vec<String>>,
    stopwords: HashSet<String>,
}

/// Longest chain followed when one lemma entry points at another key.
const MAX_LEMMA_CHAIN: usize = 8;

impl Lexicon {
    pub fn new(source: LexiconSource) -> Self {
        let raw: HashMap<String, String> = source
            .lemmas
            .into_iter()
            .map(|(k, v)| (fold(&k), fold(&v)))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty() && !k.contains(' ') && !v.contains(' '))
            .collect();

        let mut lemmas: HashMap<String, String> = raw
            .keys()
            .map(|k| {
                let mut current = &raw[k];
                for _ in 0..MAX_LEMMA_CHAIN {
                    match raw.get(current) {
                        Some(next) if next != current => current = next,
                        _ => break,
                    }
                }
                (k.clone(), current.clone())
            })
            .collect();

        let finals: Vec<String> = lemmas.values().cloned().collect();
        for lemma in finals {
            lemmas.insert(lemma.clone(), lemma);
        }

        let synonyms = source
            .synonyms
            .into_iter()
            .map(|(k, vs)| {
                let vs = vs.iter().map(|v| fold(v)).filter(|v| !v.is_empty()).collect();
                (fold(&k), vs)
            })
            .collect();

        let stopwords = source.stopwords.iter().map(|s| fold(s)).collect();

        Self {
            lemmas,
            synonyms,
            stopwords,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, LexiconError> {
        let source: LexiconSource = serde_json::from_str(json)?;
        if source.lemmas.is_empty() {
            return Err(LexiconError::Empty);
        }
        Ok(Self::new(source))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LexiconError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| LexiconError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Built-in English/Spanish lexicon for product descriptions.
    pub fn builtin() -> Self {
        let lemmas = BUILTIN_LEMMAS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let synonyms = BUILTIN_SYNONYMS
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect();
        let stopwords = BUILTIN_STOPWORDS.iter().map(|s| s.to_string()).collect();

        Self::new(LexiconSource {
            lemmas,
            synonyms,
            stopwords,
        })
    }

    /// Lemma of an already folded token.
    pub fn lemmatize(&self, token: &str) -> String {
        if let Some(lemma) = self.lemmas.get(token) {
            return lemma.clone();
        }
        let stripped = strip_plural(token);
        match self.lemmas.get(&stripped) {
            Some(lemma) => lemma.clone(),
            None => stripped,
        }
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }

    pub fn synonyms(&self, lemma: &str) -> &[String] {
        self.synonyms.get(lemma).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Regular plural stripping.
///
/// The result never ends in a strippable `s`, which keeps the rule stable
/// under repetition.
pub fn strip_plural(token: &str) -> String {
    if token.chars().count() <= 3 || token.chars().any(|c| c.is_ascii_digit()) {
        return token.to_string();
    }
    if let Some(stem) = token.strip_suffix("ies") {
        if stem.chars().count() >= 2 {
            return format!("{}y", stem);
        }
    }
    if token.ends_with("ss") || token.ends_with("us") || token.ends_with("is") {
        return token.to_string();
    }
    match token.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => token.to_string(),
    }
}

const BUILTIN_LEMMAS: &[(&str, &str)] = &[
    ("mice", "mouse"),
    ("ratones", "raton"),
    ("knives", "knife"),
    ("leaves", "leaf"),
    ("shelves", "shelf"),
    ("children", "child"),
    ("feet", "foot"),
    ("teeth", "tooth"),
    ("women", "woman"),
    ("men", "man"),
    ("boxes", "box"),
    ("glasses", "glass"),
    ("watches", "watch"),
    ("dresses", "dress"),
    ("brushes", "brush"),
    ("clothes", "clothing"),
    ("trousers", "trousers"),
    ("pants", "trousers"),
    ("jeans", "jeans"),
    ("series", "series"),
    ("computadores", "computador"),
    ("computadoras", "computadora"),
    ("portatiles", "portatil"),
    ("televisores", "televisor"),
    ("celulares", "celular"),
    ("motores", "motor"),
    ("compresores", "compresor"),
    ("refrigeradores", "refrigerador"),
    ("auriculares", "auricular"),
    ("audifonos", "audifono"),
    ("impresoras", "impresora"),
    ("cargadores", "cargador"),
    ("baterias", "bateria"),
    ("servidores", "servidor"),
    ("animales", "animal"),
    ("bovinos", "bovino"),
    ("terneros", "ternero"),
    ("vivos", "vivo"),
    ("prendas", "prenda"),
    ("camisetas", "camiseta"),
    ("zapatos", "zapato"),
    ("juguetes", "juguete"),
    ("guantes", "guante"),
    ("relojes", "reloj"),
    ("lapices", "lapiz"),
    ("muebles", "mueble"),
    ("semillas", "semilla"),
    ("herramientas", "herramienta"),
    ("maquinas", "maquina"),
    ("equipos", "equipo"),
    ("piezas", "pieza"),
    ("partes", "parte"),
    ("laptops", "laptop"),
    ("computers", "computer"),
    ("batteries", "battery"),
    ("accessories", "accessory"),
];

const BUILTIN_SYNONYMS: &[(&str, &[&str])] = &[
    ("portatil", &["laptop"]),
    ("notebook", &["laptop"]),
    ("computador", &["computer"]),
    ("computadora", &["computer"]),
    ("ordenador", &["computer"]),
    ("pc", &["computer"]),
    ("raton", &["mouse"]),
    ("teclado", &["keyboard"]),
    ("celular", &["smartphone", "phone"]),
    ("movil", &["smartphone", "phone"]),
    ("telefono", &["phone"]),
    ("smartphone", &["phone"]),
    ("enrutador", &["router"]),
    ("servidor", &["server"]),
    ("impresora", &["printer"]),
    ("auricular", &["headphone"]),
    ("audifono", &["headphone"]),
    ("tableta", &["tablet"]),
    ("cargador", &["charger"]),
    ("bateria", &["battery"]),
    ("pantalla", &["display", "screen"]),
    ("camiseta", &["t shirt", "tshirt"]),
    ("tshirt", &["t shirt"]),
    ("camisa", &["shirt"]),
    ("prenda", &["garment"]),
    ("ropa", &["clothing"]),
    ("zapato", &["shoe", "footwear"]),
    ("calzado", &["footwear"]),
    ("algodon", &["cotton"]),
    ("lana", &["wool"]),
    ("cuero", &["leather"]),
    ("acero", &["steel"]),
    ("hierro", &["iron"]),
    ("aluminio", &["aluminium"]),
    ("aluminum", &["aluminium"]),
    ("cobre", &["copper"]),
    ("plastico", &["plastic"]),
    ("caucho", &["rubber"]),
    ("madera", &["wood"]),
    ("wooden", &["wood"]),
    ("vidrio", &["glass"]),
    ("ceramica", &["ceramic"]),
    ("papel", &["paper"]),
    ("carton", &["cardboard"]),
    ("oro", &["gold"]),
    ("plata", &["silver"]),
    ("cafe", &["coffee"]),
    ("cacao", &["cocoa"]),
    ("miel", &["honey"]),
    ("vino", &["wine"]),
    ("cerveza", &["beer"]),
    ("bebida", &["beverage"]),
    ("ternero", &["bovine", "calf"]),
    ("vaca", &["bovine", "cattle"]),
    ("toro", &["bovine", "cattle"]),
    ("bovino", &["bovine"]),
    ("vivo", &["live"]),
    ("automovil", &["car", "vehicle"]),
    ("carro", &["car", "vehicle"]),
    ("coche", &["car", "vehicle"]),
    ("motocicleta", &["motorcycle"]),
    ("moto", &["motorcycle"]),
    ("bicicleta", &["bicycle"]),
    ("bici", &["bicycle"]),
    ("nevera", &["refrigerator"]),
    ("refrigerador", &["refrigerator"]),
    ("fridge", &["refrigerator"]),
    ("lavadora", &["washing machine"]),
    ("microondas", &["microwave"]),
    ("taladro", &["drill"]),
    ("martillo", &["hammer"]),
    ("destornillador", &["screwdriver"]),
    ("herramienta", &["tool"]),
    ("maquina", &["machine"]),
    ("compresor", &["compressor"]),
    ("juguete", &["toy"]),
    ("muneca", &["doll"]),
    ("rompecabezas", &["puzzle"]),
    ("pelota", &["ball"]),
    ("termometro", &["thermometer"]),
    ("mascarilla", &["mask"]),
    ("guante", &["glove"]),
    ("jeringa", &["syringe"]),
    ("reloj", &["watch"]),
    ("collar", &["necklace"]),
    ("anillo", &["ring"]),
    ("mueble", &["furniture"]),
    ("silla", &["chair"]),
    ("mesa", &["table"]),
    ("lapiz", &["pencil"]),
    ("boligrafo", &["pen"]),
    ("cemento", &["cement"]),
    ("ladrillo", &["brick"]),
    ("pintura", &["paint"]),
    ("fertilizante", &["fertilizer"]),
    ("abono", &["fertilizer"]),
    ("semilla", &["seed"]),
    ("estuche", &["case"]),
    ("caja", &["box"]),
    ("empaque", &["packaging"]),
];

const BUILTIN_STOPWORDS: &[&str] = &[
    // English
    "a", "an", "the", "and", "or", "of", "for", "with", "in", "on", "to", "by", "from", "at",
    "is", "are", "be", "this", "that", "it", "as", "its", "into", "made",
    // Spanish
    "el", "la", "los", "las", "de", "del", "y", "o", "en", "un", "una", "unos", "unas", "es",
    "son", "para", "con", "por", "se", "su", "sus", "que", "como", "mas", "muy", "este", "esta",
    "al", "lo", "sobre",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_plural() {
        assert_eq!(strip_plural("laptops"), "laptop");
        assert_eq!(strip_plural("glass"), "glass");
        assert_eq!(strip_plural("virus"), "virus");
        assert_eq!(strip_plural("bus"), "bus");
        assert_eq!(strip_plural("16gbs"), "16gbs");
        assert_eq!(strip_plural("accessories"), "accessory");
    }

    #[test]
    fn test_lemmatize_irregular_and_regular() {
        let lex = Lexicon::builtin();
        assert_eq!(lex.lemmatize("mice"), "mouse");
        assert_eq!(lex.lemmatize("camisetas"), "camiseta");
        assert_eq!(lex.lemmatize("keyboards"), "keyboard");
    }

    #[test]
    fn test_lemma_chains_are_resolved() {
        let mut source = LexiconSource::default();
        source.lemmas.insert("a1".into(), "b1".into());
        source.lemmas.insert("b1".into(), "c1".into());
        let lex = Lexicon::new(source);
        assert_eq!(lex.lemmatize("a1"), "c1");
        assert_eq!(lex.lemmatize("c1"), "c1");
    }

    #[test]
    fn test_lemmas_are_fixed_points() {
        let lex = Lexicon::builtin();
        for (_, lemma) in BUILTIN_LEMMAS {
            let once = lex.lemmatize(lemma);
            assert_eq!(lex.lemmatize(&once), once);
        }
    }

    #[test]
    fn test_from_json_requires_lemmas() {
        assert!(matches!(Lexicon::from_json("{}"), Err(LexiconError::Empty)));
        let lex = Lexicon::from_json(r#"{"lemmas": {"Cámaras": "cámara"}, "stopwords": ["De"]}"#).unwrap();
        assert_eq!(lex.lemmatize("camaras"), "camara");
        assert!(lex.is_stopword("de"));
    }

    #[test]
    fn test_synonyms_are_folded() {
        let lex = Lexicon::builtin();
        assert_eq!(lex.synonyms("portatil"), &["laptop".to_string()]);
        assert!(lex.synonyms("unknown").is_empty());
    }
}
