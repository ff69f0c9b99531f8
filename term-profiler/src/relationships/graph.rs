//! Entity/relationship graph with diagram and JSON export.
//!
//! Entities live in an arena and edges refer to them by [`EntityId`], so
//! self-references and cycles need no special representation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::cardinality::Cardinality;
use super::detector::Relationship;
use super::naming::{entity_name, entity_stem, NamingConventions};
use crate::error::{ProfilerError, Result};
use crate::profile::{file_stem, FileProfile};

/// Index of an entity in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub usize);

/// A file taking part in at least one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// File id, unique within the graph
    pub file: String,
    /// Display name derived from the file stem (`order_items.csv` -> `OrderItem`)
    pub name: String,
    /// Key column, or columns for a composite key
    pub primary_key: Vec<String>,
}

impl Entity {
    pub fn new(file: impl Into<String>) -> Self {
        let file = file.into();
        Self {
            name: entity_name(&file),
            file,
            primary_key: Vec::new(),
        }
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// A relationship whose ends are resolved to arena indices.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipEdge {
    pub parent: EntityId,
    pub child: EntityId,
    pub relationship: Relationship,
}

/// One hop of a join path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub from: EntityId,
    pub from_column: String,
    pub to: EntityId,
    pub to_column: String,
}

/// Entity in the exported document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityExport {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub primary_key: KeyColumns,
}

/// Key columns of an exported entity.
///
/// A single column is written as a plain string, a composite key as an
/// array. An empty string means no key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyColumns {
    Single(String),
    Composite(Vec<String>),
}

impl Default for KeyColumns {
    fn default() -> Self {
        Self::Single(String::new())
    }
}

impl From<&[String]> for KeyColumns {
    fn from(columns: &[String]) -> Self {
        match columns {
            [] => Self::default(),
            [column] => Self::Single(column.clone()),
            _ => Self::Composite(columns.to_vec()),
        }
    }
}

impl KeyColumns {
    pub fn columns(&self) -> Vec<String> {
        match self {
            Self::Single(column) if column.is_empty() => Vec::new(),
            Self::Single(column) => vec![column.clone()],
            Self::Composite(columns) => columns.clone(),
        }
    }
}

/// Serialized form produced by [`RelationshipGraph::to_dict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub entities: Vec<EntityExport>,
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub has_cycles: bool,
}

/// Counts and roles of a graph's entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub by_cardinality: BTreeMap<Cardinality, usize>,
    /// Entities never referenced as a child, self-references aside
    pub roots: Vec<String>,
    /// Entities never referenced as a parent, self-references aside
    pub leaves: Vec<String>,
    pub self_references: usize,
    pub has_cycles: bool,
}

/// Entities and the relationships between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipGraph {
    entities: Vec<Entity>,
    edges: Vec<RelationshipEdge>,
}

impl RelationshipGraph {
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.iter().map(|e| &e.relationship)
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Looks up an entity by its exact file id.
    pub fn entity_by_file(&self, file: &str) -> Option<EntityId> {
        self.entities
            .iter()
            .position(|e| e.file == file)
            .map(EntityId)
    }

    /// Finds an entity by file id, file stem, entity name or singular stem,
    /// ignoring case.
    pub fn resolve_entity(&self, reference: &str) -> Option<EntityId> {
        if let Some(id) = self.entity_by_file(reference) {
            return Some(id);
        }
        let wanted = reference.to_lowercase();
        self.entities
            .iter()
            .position(|e| {
                file_stem(&e.file).to_lowercase() == wanted
                    || e.name.to_lowercase() == wanted
                    || entity_stem(&e.file) == wanted
            })
            .map(EntityId)
    }

    /// Relationships in which `file` is the parent or the child.
    pub fn relationships_for(&self, file: &str) -> Vec<&Relationship> {
        self.relationships()
            .filter(|r| r.parent_entity == file || r.child_entity == file)
            .collect()
    }

    /// Whether following parent-to-child edges can return to an entity.
    /// A self-reference is a cycle.
    pub fn has_cycles(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.entities.len()];
        for edge in &self.edges {
            adjacency[edge.parent.0].push(edge.child.0);
        }

        let mut marks = vec![Mark::New; self.entities.len()];
        for start in 0..self.entities.len() {
            if marks[start] != Mark::New {
                continue;
            }
            // (node, next neighbour index)
            let mut stack = vec![(start, 0usize)];
            marks[start] = Mark::Active;
            while let Some((node, next)) = stack.pop() {
                if let Some(&target) = adjacency[node].get(next) {
                    stack.push((node, next + 1));
                    match marks[target] {
                        Mark::Active => return true,
                        Mark::New => {
                            marks[target] = Mark::Active;
                            stack.push((target, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                }
            }
        }
        false
    }

    /// Shortest chain of relationships linking two entities, edges taken in
    /// either direction. An entity reaches itself with an empty path.
    pub fn find_path(&self, from: EntityId, to: EntityId) -> Option<Vec<JoinStep>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut previous: HashMap<usize, (usize, JoinStep)> = HashMap::new();
        let mut queue = VecDeque::from([from.0]);
        while let Some(node) = queue.pop_front() {
            for edge in &self.edges {
                let rel = &edge.relationship;
                let step = if edge.parent.0 == node {
                    JoinStep {
                        from: edge.parent,
                        from_column: rel.parent_column.clone(),
                        to: edge.child,
                        to_column: rel.child_column.clone(),
                    }
                } else if edge.child.0 == node {
                    JoinStep {
                        from: edge.child,
                        from_column: rel.child_column.clone(),
                        to: edge.parent,
                        to_column: rel.parent_column.clone(),
                    }
                } else {
                    continue;
                };

                let next = step.to.0;
                if next == from.0 || previous.contains_key(&next) {
                    continue;
                }
                previous.insert(next, (node, step));
                if next == to.0 {
                    let mut path = Vec::new();
                    let mut cursor = next;
                    while cursor != from.0 {
                        let (before, step) = previous.remove(&cursor)?;
                        path.push(step);
                        cursor = before;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// The export document, entities and relationships in graph order.
    pub fn to_dict(&self) -> GraphExport {
        GraphExport {
            entities: self
                .entities
                .iter()
                .map(|e| EntityExport {
                    file: e.file.clone(),
                    name: Some(e.name.clone()),
                    primary_key: KeyColumns::from(e.primary_key.as_slice()),
                })
                .collect(),
            relationships: self.relationships().cloned().collect(),
            has_cycles: self.has_cycles(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_dict())?)
    }

    /// Rebuilds a graph from its export document.
    ///
    /// Relationships naming entities missing from the entity list are an
    /// error; `has_cycles` is recomputed rather than trusted.
    pub fn from_dict(export: &GraphExport) -> Result<Self> {
        let entities: Vec<Entity> = export
            .entities
            .iter()
            .map(|e| Entity {
                file: e.file.clone(),
                name: e.name.clone().unwrap_or_else(|| entity_name(&e.file)),
                primary_key: e.primary_key.columns(),
            })
            .collect();

        let mut graph = RelationshipGraph {
            entities,
            edges: Vec::with_capacity(export.relationships.len()),
        };
        for rel in &export.relationships {
            let parent = graph.entity_by_file(&rel.parent_entity).ok_or_else(|| {
                ProfilerError::Serialization(format!(
                    "Relationship references unknown entity '{}'",
                    rel.parent_entity
                ))
            })?;
            let child = graph.entity_by_file(&rel.child_entity).ok_or_else(|| {
                ProfilerError::Serialization(format!(
                    "Relationship references unknown entity '{}'",
                    rel.child_entity
                ))
            })?;
            graph.edges.push(RelationshipEdge {
                parent,
                child,
                relationship: rel.clone(),
            });
        }
        Ok(graph)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let export: GraphExport = serde_json::from_str(text)?;
        Self::from_dict(&export)
    }

    /// Mermaid `erDiagram`, entities sorted by name and edges by entity name
    /// then target.
    ///
    /// An entity is drawn under its name when that name is a valid Mermaid
    /// identifier shared with no other entity. Otherwise its node is keyed by
    /// the sanitized file id and carries the name as an alias label.
    pub fn to_mermaid(&self) -> String {
        let ids = self.mermaid_ids();
        let mut lines = vec!["erDiagram".to_string()];

        let mut entities: Vec<(usize, &Entity)> = self.entities.iter().enumerate().collect();
        entities.sort_by(|(_, a), (_, b)| a.name.cmp(&b.name).then_with(|| a.file.cmp(&b.file)));
        for (idx, entity) in entities {
            let node = if ids[idx] == entity.name {
                entity.name.clone()
            } else {
                format!("{}[\"{}\"]", ids[idx], entity.name.replace('"', "'"))
            };
            if entity.primary_key.is_empty() {
                lines.push(format!("    {node}"));
                continue;
            }
            lines.push(format!("    {node} {{"));
            for column in &entity.primary_key {
                lines.push(format!("        string {} PK", mermaid_attribute(column)));
            }
            lines.push("    }".to_string());
        }

        for edge in self.sorted_edges() {
            let rel = &edge.relationship;
            lines.push(format!(
                "    {} {} {} : \"{} -> {}\"",
                ids[edge.parent.0],
                rel.cardinality.mermaid_symbol(),
                ids[edge.child.0],
                rel.parent_column.replace('"', "'"),
                rel.child_column.replace('"', "'"),
            ));
        }

        lines.join("\n")
    }

    /// Node identifier of every entity, by arena index.
    fn mermaid_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entities
            .iter()
            .map(|e| {
                let shared = self.entities.iter().filter(|o| o.name == e.name).count() > 1;
                if !shared && is_mermaid_identifier(&e.name) {
                    e.name.clone()
                } else {
                    let id = mermaid_attribute(&e.file);
                    if id.starts_with(|c: char| c.is_ascii_alphabetic()) {
                        id
                    } else {
                        format!("e_{id}")
                    }
                }
            })
            .collect();

        // sanitizing can still collide (`a-b.csv`, `a_b.csv`)
        for idx in 0..ids.len() {
            if ids[..idx].contains(&ids[idx]) || ids[idx + 1..].contains(&ids[idx]) {
                ids[idx] = format!("{}_{idx}", ids[idx]);
            }
        }
        ids
    }

    /// Graphviz digraph with crow's-foot arrowheads on the "many" ends.
    ///
    /// Nodes are keyed by file id and labelled with the entity name.
    pub fn to_dot(&self) -> String {
        let mut lines = vec![
            "digraph EntityRelationship {".to_string(),
            "    rankdir=LR;".to_string(),
            "    node [shape=record, fontname=\"Helvetica\"];".to_string(),
            String::new(),
        ];

        let mut entities: Vec<&Entity> = self.entities.iter().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.file.cmp(&b.file)));
        for entity in entities {
            let key = if entity.primary_key.is_empty() {
                "...".to_string()
            } else {
                entity.primary_key.join("|")
            };
            lines.push(format!(
                "    \"{}\" [label=\"{{{}|{}}}\"];",
                dot_escape(&entity.file),
                dot_escape(&entity.name),
                dot_escape(&key)
            ));
        }
        lines.push(String::new());

        for edge in self.sorted_edges() {
            let rel = &edge.relationship;
            lines.push(format!(
                "    \"{}\" -> \"{}\" [label=\"{} -> {}\", {}, dir=both];",
                dot_escape(&self.entity(edge.parent).file),
                dot_escape(&self.entity(edge.child).file),
                dot_escape(&rel.parent_column),
                dot_escape(&rel.child_column),
                rel.cardinality.dot_style(),
            ));
        }
        lines.push("}".to_string());
        lines.join("\n")
    }

    pub fn summary(&self) -> GraphSummary {
        let mut by_cardinality = BTreeMap::new();
        let mut is_child = vec![false; self.entities.len()];
        let mut is_parent = vec![false; self.entities.len()];
        let mut self_references = 0;

        for edge in &self.edges {
            *by_cardinality
                .entry(edge.relationship.cardinality)
                .or_insert(0) += 1;
            if edge.parent == edge.child {
                self_references += 1;
                continue;
            }
            is_child[edge.child.0] = true;
            is_parent[edge.parent.0] = true;
        }

        let names = |flags: &[bool]| -> Vec<String> {
            self.entities
                .iter()
                .zip(flags)
                .filter(|(_, flag)| !**flag)
                .map(|(e, _)| e.name.clone())
                .collect()
        };

        GraphSummary {
            entity_count: self.entities.len(),
            relationship_count: self.edges.len(),
            by_cardinality,
            roots: names(&is_child),
            leaves: names(&is_parent),
            self_references,
            has_cycles: self.has_cycles(),
        }
    }

    fn sorted_edges(&self) -> Vec<&RelationshipEdge> {
        let mut edges: Vec<&RelationshipEdge> = self.edges.iter().collect();
        edges.sort_by(|a, b| {
            let (ap, ac) = (self.entity(a.parent), self.entity(a.child));
            let (bp, bc) = (self.entity(b.parent), self.entity(b.child));
            ap.name
                .cmp(&bp.name)
                .then_with(|| ac.name.cmp(&bc.name))
                .then_with(|| a.relationship.parent_column.cmp(&b.relationship.parent_column))
                .then_with(|| a.relationship.child_column.cmp(&b.relationship.child_column))
        });
        edges
    }
}

fn mermaid_attribute(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn is_mermaid_identifier(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn dot_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('{', "\\{")
        .replace('}', "\\}")
}

/// Assembles a [`RelationshipGraph`].
#[derive(Debug, Clone)]
pub struct RelationshipGraphBuilder {
    pk_threshold: f64,
    naming: NamingConventions,
}

impl Default for RelationshipGraphBuilder {
    fn default() -> Self {
        Self {
            pk_threshold: 0.95,
            naming: NamingConventions::default(),
        }
    }
}

impl RelationshipGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pk_threshold(mut self, threshold: f64) -> Self {
        self.pk_threshold = threshold;
        self
    }

    pub fn with_naming(mut self, naming: NamingConventions) -> Self {
        self.naming = naming;
        self
    }

    /// Builds the graph from explicit entities and relationships.
    ///
    /// Entities referenced only by a relationship are added on the fly, and a
    /// parent column is recorded as its entity's key when none was given.
    #[instrument(
        skip(self, entities, relationships),
        fields(entities = entities.len(), relationships = relationships.len())
    )]
    pub fn build(
        &self,
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    ) -> RelationshipGraph {
        let mut graph = RelationshipGraph {
            entities: Vec::with_capacity(entities.len()),
            edges: Vec::with_capacity(relationships.len()),
        };
        for entity in entities {
            if graph.entity_by_file(&entity.file).is_none() {
                graph.entities.push(entity);
            }
        }

        for relationship in relationships {
            let parent = intern(&mut graph.entities, &relationship.parent_entity);
            let child = intern(&mut graph.entities, &relationship.child_entity);
            let key = &mut graph.entities[parent.0].primary_key;
            if key.is_empty() {
                key.push(relationship.parent_column.clone());
            }
            graph.edges.push(RelationshipEdge {
                parent,
                child,
                relationship,
            });
        }

        debug!(
            entities = graph.entities.len(),
            edges = graph.edges.len(),
            "Built relationship graph"
        );
        graph
    }

    /// Builds the graph over the files that take part in a relationship.
    ///
    /// A file's key is the column other files reference; a file that is only
    /// ever a child uses its best key candidate, if it has one.
    pub fn build_from_profiles(
        &self,
        profiles: &[FileProfile],
        relationships: Vec<Relationship>,
    ) -> RelationshipGraph {
        let entities = profiles
            .iter()
            .filter(|p| {
                relationships
                    .iter()
                    .any(|r| r.parent_entity == p.file_id || r.child_entity == p.file_id)
            })
            .map(|profile| {
                let mut key: Vec<String> = Vec::new();
                for rel in relationships.iter().filter(|r| r.parent_entity == profile.file_id) {
                    if !key.contains(&rel.parent_column) {
                        key.push(rel.parent_column.clone());
                    }
                }
                if key.is_empty() {
                    key.extend(self.key_candidate(profile));
                }
                Entity::new(profile.file_id.clone()).with_primary_key(key)
            })
            .collect();
        self.build(entities, relationships)
    }

    fn key_candidate(&self, profile: &FileProfile) -> Option<String> {
        let candidates: Vec<_> = profile
            .columns
            .iter()
            .filter(|c| profile.is_key_candidate(c, self.pk_threshold))
            .collect();
        candidates
            .iter()
            .find(|c| self.naming.is_own_key(&c.name, &profile.file_id))
            .or_else(|| candidates.first())
            .map(|c| c.name.clone())
    }
}

fn intern(entities: &mut Vec<Entity>, file: &str) -> EntityId {
    match entities.iter().position(|e| e.file == file) {
        Some(idx) => EntityId(idx),
        None => {
            entities.push(Entity::new(file));
            EntityId(entities.len() - 1)
        }
    }
}
