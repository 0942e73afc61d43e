//! Choice of a national extension under an HS6 subheading.

use hsclass_features::fold;
use hsclass_model::{Catalog, CatalogEntry, CodeLevel, EmbeddingCandidate, HsCode, RequestAttributes};
use std::collections::BTreeSet;

/// Distinct attribute tokens a child must contain to be chosen outright.
pub const MIN_ATTRIBUTE_HITS: usize = 2;
/// Attribute tokens this short are ignored.
const MIN_TOKEN_CHARS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementMethod {
    /// Code was not an HS6 or had no national children
    Unchanged,
    AttributeMatch { hits: usize },
    Embedding,
    FirstChild,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    pub code: HsCode,
    /// Catalog title of the chosen child
    pub title: Option<String>,
    pub method: RefinementMethod,
}

impl Refinement {
    fn unchanged(code: &HsCode) -> Self {
        Self {
            code: code.clone(),
            title: None,
            method: RefinementMethod::Unchanged,
        }
    }

    fn chose(entry: &CatalogEntry, method: RefinementMethod) -> Self {
        Self {
            code: entry.code.clone(),
            title: Some(entry.title.clone()),
            method,
        }
    }
}

fn national_children<'c>(code: &HsCode, catalog: &'c dyn Catalog) -> Vec<&'c CatalogEntry> {
    let mut children: Vec<&CatalogEntry> = catalog
        .children(code)
        .into_iter()
        .filter(|e| e.level() == CodeLevel::National)
        .collect();
    if children.is_empty() {
        children = catalog
            .entries()
            .filter(|e| e.level() == CodeLevel::National && e.code.starts_with(code))
            .collect();
    }
    children.sort_by(|a, b| a.code.cmp(&b.code));
    children
}

fn attribute_tokens(attrs: &RequestAttributes) -> BTreeSet<String> {
    attrs
        .values()
        .flat_map(|v| fold(v).split(' ').map(str::to_string).collect::<Vec<_>>())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .collect()
}

/// Pick a national child of `code`: by request attribute tokens found in the
/// child's title or keywords, else by retrieved similarity, else the first.
pub fn refine(
    code: &HsCode,
    attrs: &RequestAttributes,
    retrieved: &[EmbeddingCandidate],
    catalog: &dyn Catalog,
) -> Refinement {
    if code.level() != CodeLevel::Subheading {
        return Refinement::unchanged(code);
    }
    let children = national_children(code, catalog);
    let Some(first) = children.first() else {
        return Refinement::unchanged(code);
    };

    let tokens = attribute_tokens(attrs);
    if tokens.len() >= MIN_ATTRIBUTE_HITS {
        for child in &children {
            let line = fold(&child.match_text());
            let hits = tokens.iter().filter(|t| line.contains(t.as_str())).count();
            if hits >= MIN_ATTRIBUTE_HITS {
                return Refinement::chose(child, RefinementMethod::AttributeMatch { hits });
            }
        }
    }

    let by_similarity = children
        .iter()
        .filter_map(|child| {
            retrieved
                .iter()
                .find(|r| r.code == child.code)
                .map(|r| (*child, r.similarity))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.code.cmp(&a.0.code)));
    if let Some((child, _)) = by_similarity {
        return Refinement::chose(child, RefinementMethod::Embedding);
    }

    Refinement::chose(first, RefinementMethod::FirstChild)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsclass_model::InMemoryCatalog;
    use pretty_assertions::assert_eq;

    fn code(s: &str) -> HsCode {
        HsCode::parse(s).unwrap()
    }

    fn child(c: &str, parent: &str, title: &str, keywords: &str) -> CatalogEntry {
        let mut e = CatalogEntry::new(code(c), title, keywords);
        e.parent_code = Some(code(parent));
        e
    }

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new(vec![
            CatalogEntry::new(code("847130"), "Portable computers", "laptop notebook"),
            child("8471300000", "847130", "Portable computers, other", ""),
            child("8471300010", "847130", "Portable computers of aluminium, with keyboard", "aluminium keyboard"),
        ])
    }

    #[test]
    fn test_attribute_match() {
        let attrs = RequestAttributes {
            material: Some("Aluminium".into()),
            measurements: Some("keyboard 15 in".into()),
            ..Default::default()
        };
        let r = refine(&code("847130"), &attrs, &[], &catalog());
        assert_eq!(r.code, code("8471300010"));
        assert_eq!(r.method, RefinementMethod::AttributeMatch { hits: 2 });
    }

    #[test]
    fn test_embedding_fallback() {
        let retrieved = vec![EmbeddingCandidate {
            code: code("8471300010"),
            similarity: 0.6,
            title: String::new(),
        }];
        let r = refine(&code("847130"), &RequestAttributes::default(), &retrieved, &catalog());
        assert_eq!(r.code, code("8471300010"));
        assert_eq!(r.method, RefinementMethod::Embedding);
    }

    #[test]
    fn test_first_child_fallback() {
        let r = refine(&code("847130"), &RequestAttributes::default(), &[], &catalog());
        assert_eq!(r.code, code("8471300000"));
        assert_eq!(r.title.as_deref(), Some("Portable computers, other"));
        assert_eq!(r.method, RefinementMethod::FirstChild);
    }

    #[test]
    fn test_children_found_by_prefix() {
        let catalog = InMemoryCatalog::new(vec![CatalogEntry::new(code("0901110000"), "Coffee, not roasted", "")]);
        let r = refine(&code("090111"), &RequestAttributes::default(), &[], &catalog);
        assert_eq!(r.code, code("0901110000"));
    }

    #[test]
    fn test_non_subheading_unchanged() {
        let r = refine(&code("8471300000"), &RequestAttributes::default(), &[], &catalog());
        assert_eq!(r.method, RefinementMethod::Unchanged);
        let r = refine(&code("852872"), &RequestAttributes::default(), &[], &catalog());
        assert_eq!(r, Refinement::unchanged(&code("852872")));
    }
}
