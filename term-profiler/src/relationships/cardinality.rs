//! Relationship multiplicity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::detector::{Relationship, RelationshipCandidate};
use crate::error::{ProfilerError, Result};

/// Default uniqueness ratio at which a column counts as unique-like.
pub const DEFAULT_UNIQUE_THRESHOLD: f64 = 0.99;

/// Multiplicity of a parent/child relationship, read in detection direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    pub const ALL: [Cardinality; 4] = [
        Cardinality::OneToOne,
        Cardinality::OneToMany,
        Cardinality::ManyToOne,
        Cardinality::ManyToMany,
    ];

    /// Parses the spellings accepted in hint files.
    ///
    /// Case-insensitive; `-` and spaces are read as `_`. Accepts `one_to_many`,
    /// `ONE_TO_MANY`, `1:n`, `1:*`, `n:1`, `*:1`, `1:1`, `n:m`, `*:*` and
    /// `m:n`.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value
            .trim()
            .to_lowercase()
            .replace(|c: char| c == '-' || c == ' ', "_");
        match normalized.as_str() {
            "one_to_one" | "1:1" => Some(Self::OneToOne),
            "one_to_many" | "1:n" | "1:*" | "1:m" => Some(Self::OneToMany),
            "many_to_one" | "n:1" | "*:1" | "m:1" => Some(Self::ManyToOne),
            "many_to_many" | "n:m" | "m:n" | "*:*" | "n:n" => Some(Self::ManyToMany),
            _ => None,
        }
    }

    /// Canonical name, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneToOne => "ONE_TO_ONE",
            Self::OneToMany => "ONE_TO_MANY",
            Self::ManyToOne => "MANY_TO_ONE",
            Self::ManyToMany => "MANY_TO_MANY",
        }
    }

    /// Mermaid `erDiagram` connector.
    pub fn mermaid_symbol(self) -> &'static str {
        match self {
            Self::OneToOne => "||--||",
            Self::OneToMany => "||--o{",
            Self::ManyToOne => "}o--||",
            Self::ManyToMany => "}o--o{",
        }
    }

    /// Graphviz edge attributes.
    pub fn dot_style(self) -> &'static str {
        match self {
            Self::OneToOne => r#"arrowhead="none", arrowtail="none""#,
            Self::OneToMany => r#"arrowhead="crow", arrowtail="none""#,
            Self::ManyToOne => r#"arrowhead="none", arrowtail="crow""#,
            Self::ManyToMany => r#"arrowhead="crow", arrowtail="crow""#,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cardinality {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            ProfilerError::Configuration(format!("Unknown relationship type '{s}'"))
        })
    }
}

/// Assigns a [`Cardinality`] from the uniqueness of both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardinalityClassifier {
    unique_threshold: f64,
}

impl Default for CardinalityClassifier {
    fn default() -> Self {
        Self {
            unique_threshold: DEFAULT_UNIQUE_THRESHOLD,
        }
    }
}

impl CardinalityClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unique_threshold(mut self, threshold: f64) -> Self {
        self.unique_threshold = threshold;
        self
    }

    pub fn unique_threshold(&self) -> f64 {
        self.unique_threshold
    }

    /// Turns a candidate into a [`Relationship`].
    ///
    /// A multiplicity declared by a hint takes precedence over the ratios.
    pub fn classify(
        &self,
        candidate: &RelationshipCandidate,
        parent_unique_ratio: f64,
        child_unique_ratio: f64,
    ) -> Relationship {
        let cardinality = candidate
            .declared
            .unwrap_or_else(|| self.classify_ratios(parent_unique_ratio, child_unique_ratio));
        Relationship {
            parent_entity: candidate.parent.file.clone(),
            parent_column: candidate.parent.column.clone(),
            child_entity: candidate.child.file.clone(),
            child_column: candidate.child.column.clone(),
            cardinality,
            confidence: candidate.confidence,
            source: candidate.source,
        }
    }

    /// Lookup over the two unique-like flags.
    pub fn classify_ratios(
        &self,
        parent_unique_ratio: f64,
        child_unique_ratio: f64,
    ) -> Cardinality {
        let parent_unique = parent_unique_ratio >= self.unique_threshold;
        let child_unique = child_unique_ratio >= self.unique_threshold;
        match (parent_unique, child_unique) {
            (true, true) => Cardinality::OneToOne,
            (true, false) => Cardinality::OneToMany,
            (false, true) => Cardinality::ManyToOne,
            (false, false) => Cardinality::ManyToMany,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_table() {
        let c = CardinalityClassifier::new();
        assert_eq!(c.classify_ratios(1.0, 1.0), Cardinality::OneToOne);
        assert_eq!(c.classify_ratios(1.0, 0.4), Cardinality::OneToMany);
        assert_eq!(c.classify_ratios(0.4, 1.0), Cardinality::ManyToOne);
        assert_eq!(c.classify_ratios(0.4, 0.4), Cardinality::ManyToMany);
    }

    #[test]
    fn test_declared_type_wins() {
        use crate::relationships::{ColumnRef, MatchKind, RelationshipSource};

        let candidate = RelationshipCandidate {
            parent: ColumnRef::new("exchanges.csv", "exchange_code"),
            child: ColumnRef::new("instruments.csv", "exchange"),
            match_kind: MatchKind::Stripped,
            source: RelationshipSource::Hint,
            confidence: 1.0,
            overlap: None,
            declared: Some(Cardinality::ManyToMany),
            parent_rows: 3,
        };
        let c = CardinalityClassifier::new();
        let rel = c.classify(&candidate, 1.0, 0.5);
        assert_eq!(rel.cardinality, Cardinality::ManyToMany);
        assert_eq!(rel.parent_entity, "exchanges.csv");

        let undeclared = RelationshipCandidate {
            declared: None,
            ..candidate
        };
        assert_eq!(c.classify(&undeclared, 1.0, 0.5).cardinality, Cardinality::OneToMany);
    }

    #[test]
    fn test_rounding_tolerance() {
        let c = CardinalityClassifier::new();
        assert_eq!(c.classify_ratios(0.995, 0.5), Cardinality::OneToMany);
        assert_eq!(c.classify_ratios(0.98, 0.5), Cardinality::ManyToMany);
        let loose = c.with_unique_threshold(0.95);
        assert_eq!(loose.classify_ratios(0.98, 0.5), Cardinality::OneToMany);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Cardinality::parse("one_to_many"), Some(Cardinality::OneToMany));
        assert_eq!(Cardinality::parse("One-To-Many"), Some(Cardinality::OneToMany));
        assert_eq!(Cardinality::parse("1:*"), Some(Cardinality::OneToMany));
        assert_eq!(Cardinality::parse("*:1"), Some(Cardinality::ManyToOne));
        assert_eq!(Cardinality::parse("N:M"), Some(Cardinality::ManyToMany));
        assert_eq!(Cardinality::parse("1:1"), Some(Cardinality::OneToOne));
        assert_eq!(Cardinality::parse("sometimes"), None);
        assert!("sometimes".parse::<Cardinality>().is_err());
    }

    #[test]
    fn test_serialized_names() {
        for cardinality in Cardinality::ALL {
            let json = serde_json::to_string(&cardinality).unwrap();
            assert_eq!(json, format!("\"{}\"", cardinality.as_str()));
            assert_eq!(Cardinality::parse(cardinality.as_str()), Some(cardinality));
        }
    }

    #[test]
    fn test_mermaid_symbols() {
        assert_eq!(Cardinality::OneToMany.mermaid_symbol(), "||--o{");
        assert_eq!(Cardinality::ManyToOne.mermaid_symbol(), "}o--||");
    }
}
