//! Naming conventions for key columns and entity names.

use serde::{Deserialize, Serialize};

use crate::profile::file_stem;

/// Column naming conventions used to propose foreign-key candidates.
///
/// Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConventions {
    /// Suffixes marking a foreign key (`customer_id`)
    pub fk_suffixes: Vec<String>,
    /// Prefixes marking a foreign key (`fk_customer`)
    pub fk_prefixes: Vec<String>,
    /// Bare primary key names (`id`) that stand for the file's own entity
    pub pk_names: Vec<String>,
}

impl Default for NamingConventions {
    fn default() -> Self {
        Self {
            fk_suffixes: vec!["_id".into(), "_code".into(), "_key".into()],
            fk_prefixes: vec!["fk_".into(), "ref_".into()],
            pk_names: vec!["id".into(), "pk".into(), "key".into(), "code".into()],
        }
    }
}

impl NamingConventions {
    pub fn with_fk_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fk_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fk_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fk_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the name is a bare primary key name such as `id`.
    pub fn is_pk_name(&self, column: &str) -> bool {
        self.pk_names
            .iter()
            .any(|pk| pk.eq_ignore_ascii_case(column))
    }

    /// The base name with a foreign-key suffix or prefix removed.
    ///
    /// Returns `None` for columns that do not follow a key convention.
    /// `customer_id` becomes `customer`; `fk_customer` becomes `customer`.
    pub fn strip_key_affix(&self, column: &str) -> Option<String> {
        let name = column.to_lowercase();
        for suffix in &self.fk_suffixes {
            let suffix = suffix.to_lowercase();
            if name.len() > suffix.len() && name.ends_with(&suffix) {
                return Some(name[..name.len() - suffix.len()].to_string());
            }
        }
        for prefix in &self.fk_prefixes {
            let prefix = prefix.to_lowercase();
            if name.len() > prefix.len() && name.starts_with(&prefix) {
                return Some(name[prefix.len()..].to_string());
            }
        }
        None
    }

    /// Every base a foreign-key column may refer to, most specific first.
    ///
    /// Qualified keys resolve to their trailing segments as well, so
    /// `parent_sector_id` yields `parent_sector` and `sector`.
    pub fn child_bases(&self, column: &str) -> Vec<String> {
        let Some(base) = self.strip_key_affix(column) else {
            return Vec::new();
        };
        let mut bases = vec![base.clone()];
        for (idx, ch) in base.char_indices() {
            if ch == '_' && idx + 1 < base.len() {
                bases.push(base[idx + 1..].to_string());
            }
        }
        bases
    }

    /// Bases a referenced column answers to inside the file `file_id`.
    ///
    /// A key-style column answers to its stripped base, any column answers to
    /// its own lowercase name, and a bare pk name (`id`) answers to the file's
    /// singular entity stem.
    pub fn parent_bases(&self, column: &str, file_id: &str) -> Vec<String> {
        let mut bases = vec![column.to_lowercase()];
        if let Some(base) = self.strip_key_affix(column) {
            bases.push(base);
        }
        if self.is_pk_name(column) {
            bases.push(entity_stem(file_id));
        }
        bases
    }

    /// Whether `column` is the file's own identifier (`sector_id` in `sectors`).
    pub fn is_own_key(&self, column: &str, file_id: &str) -> bool {
        if self.is_pk_name(column) {
            return true;
        }
        let stem = file_stem(file_id).to_lowercase();
        let entity = entity_stem(file_id);
        self.strip_key_affix(column)
            .map(|base| base == entity || base == stem)
            .unwrap_or(false)
    }
}

/// Singular form of an English plural, for file-derived entity names.
pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() > 3 && lower.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if lower.ends_with("xes")
        || lower.ends_with("ses")
        || lower.ends_with("ches")
        || lower.ends_with("shes")
    {
        word[..word.len() - 2].to_string()
    } else if word.len() > 1 && lower.ends_with('s') && !lower.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Lowercase singular stem of a file (`exchanges.parquet` -> `exchange`).
pub fn entity_stem(file_id: &str) -> String {
    singularize(file_stem(file_id)).to_lowercase()
}

/// Display name of the entity stored in a file (`order_items.csv` -> `OrderItem`).
pub fn entity_name(file_id: &str) -> String {
    singularize(file_stem(file_id))
        .split(|c: char| c == '_' || c == '-' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_key_affix() {
        let n = NamingConventions::default();
        assert_eq!(n.strip_key_affix("customer_id").as_deref(), Some("customer"));
        assert_eq!(n.strip_key_affix("Exchange_Code").as_deref(), Some("exchange"));
        assert_eq!(n.strip_key_affix("fk_region").as_deref(), Some("region"));
        assert_eq!(n.strip_key_affix("_id"), None);
        assert_eq!(n.strip_key_affix("exchange"), None);
    }

    #[test]
    fn test_child_bases_include_qualified_tails() {
        let n = NamingConventions::default();
        assert_eq!(n.child_bases("parent_sector_id"), vec!["parent_sector", "sector"]);
        assert_eq!(n.child_bases("customer_id"), vec!["customer"]);
        assert!(n.child_bases("name").is_empty());
    }

    #[test]
    fn test_parent_bases() {
        let n = NamingConventions::default();
        assert_eq!(n.parent_bases("id", "customers.csv"), vec!["id", "customer"]);
        assert_eq!(
            n.parent_bases("customer_id", "customers.csv"),
            vec!["customer_id", "customer"]
        );
    }

    #[test]
    fn test_own_key() {
        let n = NamingConventions::default();
        assert!(n.is_own_key("sector_id", "sectors.parquet"));
        assert!(n.is_own_key("exchange_code", "exchanges.parquet"));
        assert!(n.is_own_key("id", "orders.csv"));
        assert!(!n.is_own_key("parent_sector_id", "sectors.parquet"));
        assert!(!n.is_own_key("customer_id", "orders.csv"));
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("branches"), "branch");
        assert_eq!(singularize("customers"), "customer");
        assert_eq!(singularize("business"), "business");
        assert_eq!(singularize("s"), "s");
    }

    #[test]
    fn test_entity_name() {
        assert_eq!(entity_name("order_items.csv"), "OrderItem");
        assert_eq!(entity_name("data/sectors.parquet"), "Sector");
        assert_eq!(entity_name("prices_2024_01.parquet"), "Prices202401");
    }

    #[test]
    fn test_custom_suffixes() {
        let n = NamingConventions::default().with_fk_suffixes(["_ref"]);
        assert_eq!(n.strip_key_affix("account_ref").as_deref(), Some("account"));
        assert_eq!(n.strip_key_affix("account_id"), None);
    }
}
