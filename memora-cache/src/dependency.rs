//! Invalidation graph between named resources.
//!
//! Resources declare relations to other resources together with the delete
//! rule of the foreign key. `CASCADE` and `SET NULL` become edges; every other
//! rule leaves dependent cached views untouched.
//!
//! # Examples
//!
//! ```
//! use memora_cache::{DependencyGraph, OnDelete, ResourceSchema};
//!
//! let graph = DependencyGraph::build(&[
//!     ResourceSchema::new("User").cascade("Post"),
//!     ResourceSchema::new("Post").cascade("Comment"),
//!     ResourceSchema::new("Team").relation("User", OnDelete::SetNull),
//! ])
//! .unwrap();
//!
//! assert_eq!(graph.affected_by_delete("User"), vec!["User", "Post", "Comment"]);
//! ```

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Delete rule of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
    SetDefault,
}

impl OnDelete {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for OnDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for OnDelete {
    type Error = CacheError;

    fn try_from(s: String) -> CacheResult<Self> {
        s.parse()
    }
}

impl From<OnDelete> for String {
    fn from(rule: OnDelete) -> Self {
        rule.as_str().to_string()
    }
}

impl FromStr for OnDelete {
    type Err = CacheError;

    /// Parse SQL spelling, case-insensitive, with spaces or underscores.
    fn from_str(s: &str) -> CacheResult<Self> {
        let normalized = s.trim().to_uppercase().replace('_', " ");
        match normalized.as_str() {
            "CASCADE" => Ok(Self::Cascade),
            "SET NULL" => Ok(Self::SetNull),
            "RESTRICT" => Ok(Self::Restrict),
            "NO ACTION" => Ok(Self::NoAction),
            "SET DEFAULT" => Ok(Self::SetDefault),
            _ => Err(CacheError::Config(format!("unknown delete rule: {}", s))),
        }
    }
}

/// A relation from a resource to a resource that depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// The dependent resource
    pub target: String,
    /// What deleting the source does to the target
    pub on_delete: OnDelete,
}

/// Declared relations of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub name: String,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl ResourceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: Vec::new(),
        }
    }

    /// Add a relation with any delete rule.
    pub fn relation(mut self, target: impl Into<String>, on_delete: OnDelete) -> Self {
        self.relations.push(Relation {
            target: target.into(),
            on_delete,
        });
        self
    }

    /// Add a cascading relation.
    pub fn cascade(self, target: impl Into<String>) -> Self {
        self.relation(target, OnDelete::Cascade)
    }

    /// Add a set-null relation.
    pub fn set_null(self, target: impl Into<String>) -> Self {
        self.relation(target, OnDelete::SetNull)
    }
}

/// Immutable adjacency lists built from resource schemas.
///
/// Cascade edges are guaranteed acyclic, so recursive expansion over them
/// terminates. Set-null edges may form cycles; they are only followed one
/// level.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    cascade: HashMap<String, Vec<String>>,
    set_null: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct Expansion {
    affected: Vec<String>,
    listed: HashSet<String>,
    // Resources whose own delete rules were applied
    expanded: HashSet<String>,
}

impl Expansion {
    fn list(&mut self, resource: &str) {
        if self.listed.insert(resource.to_string()) {
            self.affected.push(resource.to_string());
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    /// Build the graph, failing with [`CacheError::CyclicCascade`] when
    /// cascade edges form a cycle.
    pub fn build(schemas: &[ResourceSchema]) -> CacheResult<Self> {
        let mut graph = Self::default();

        for schema in schemas {
            for relation in &schema.relations {
                let edges = match relation.on_delete {
                    OnDelete::Cascade => &mut graph.cascade,
                    OnDelete::SetNull => &mut graph.set_null,
                    OnDelete::Restrict | OnDelete::NoAction | OnDelete::SetDefault => continue,
                };
                edges
                    .entry(schema.name.clone())
                    .or_default()
                    .push(relation.target.clone());
            }
        }

        if let Some(cycle) = graph.find_cascade_cycle() {
            return Err(CacheError::CyclicCascade(cycle));
        }

        Ok(graph)
    }

    /// Direct cascade targets of `resource`.
    pub fn cascade_targets(&self, resource: &str) -> &[String] {
        self.cascade.get(resource).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct set-null targets of `resource`.
    pub fn set_null_targets(&self, resource: &str) -> &[String] {
        self.set_null.get(resource).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resources whose cached views a mutation of `resource` invalidates.
    pub fn affected_by_mutation<'a>(&self, resource: &'a str) -> Vec<&'a str> {
        vec![resource]
    }

    /// Resources whose cached views a delete of `resource` invalidates.
    ///
    /// The resource itself, its set-null targets, then everything reachable
    /// through cascade edges, applying the same rule at each cascaded
    /// resource. Each resource is listed once, in first-visit order.
    pub fn affected_by_delete(&self, resource: &str) -> Vec<String> {
        let mut expansion = Expansion::default();
        self.expand_delete(resource, &mut expansion);
        expansion.affected
    }

    fn expand_delete(&self, resource: &str, expansion: &mut Expansion) {
        if !expansion.expanded.insert(resource.to_string()) {
            return;
        }
        expansion.list(resource);

        for target in self.set_null_targets(resource) {
            expansion.list(target);
        }
        for target in self.cascade_targets(resource) {
            self.expand_delete(target, expansion);
        }
    }

    /// Depth-first search over cascade edges. Returns the cycle path with
    /// the first resource repeated at the end.
    fn find_cascade_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();

        let mut roots: Vec<&str> = self.cascade.keys().map(String::as_str).collect();
        roots.sort_unstable();

        for root in roots {
            if !marks.contains_key(root)
                && let Some(cycle) = self.visit(root, &mut marks, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::Visiting);
        path.push(node);

        for next in self.cascade_targets(node) {
            match marks.get(next.as_str()) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == next.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = self.visit(next, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        None
    }
}
