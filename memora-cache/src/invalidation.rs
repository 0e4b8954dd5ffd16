//! Resource change notifications turned into tag clears.
//!
//! Each resource's cached views are tagged with the resource name. The ORM
//! layer calls [`Invalidator::notify_mutated`] or
//! [`Invalidator::notify_deleted`] once a change is committed.

use crate::dependency::{DependencyGraph, ResourceSchema};
use crate::error::CacheResult;
use crate::manager::CacheManager;
use futures::future::join_all;
use memora_log::debug;
use std::sync::Arc;

/// Binds a dependency graph to the cache whose entries it invalidates.
#[derive(Clone)]
pub struct Invalidator {
    graph: Arc<DependencyGraph>,
    cache: CacheManager,
}

impl Invalidator {
    /// Create an invalidator over an already built graph.
    pub fn new(graph: Arc<DependencyGraph>, cache: CacheManager) -> Self {
        Self { graph, cache }
    }

    /// Build the graph from schemas and bind it to `cache`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use memora_cache::*;
    ///
    /// # async fn example() -> CacheResult<()> {
    /// let cache = CacheManager::new(CacheConfig::new("blog")).await?;
    /// let invalidator = Invalidator::from_schemas(
    ///     &[
    ///         ResourceSchema::new("User").cascade("Post"),
    ///         ResourceSchema::new("Post"),
    ///     ],
    ///     cache,
    /// )?;
    ///
    /// // Clears everything tagged "User" or "Post".
    /// invalidator.notify_deleted("User").await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_schemas(schemas: &[ResourceSchema], cache: CacheManager) -> CacheResult<Self> {
        let graph = DependencyGraph::build(schemas)?;
        Ok(Self::new(Arc::new(graph), cache))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// A row of `resource` changed: clear that resource's tag only.
    pub async fn notify_mutated(&self, resource: &str) {
        for tag in self.graph.affected_by_mutation(resource) {
            self.cache.clear_by_tag(tag).await;
        }
    }

    /// A row of `resource` was deleted: clear its tag, the tags of its
    /// set-null dependents, and the tags of everything it cascades to.
    ///
    /// Returns the cleared resources.
    pub async fn notify_deleted(&self, resource: &str) -> Vec<String> {
        let affected = self.graph.affected_by_delete(resource);
        debug!("Delete of {} invalidates {:?}", resource, affected);
        join_all(affected.iter().map(|tag| self.cache.clear_by_tag(tag))).await;
        affected
    }
}
