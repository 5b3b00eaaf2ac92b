//! Citation neighbourhood of one paper.

use serde::Serialize;

use crate::paper::PaperId;

/// How a node relates to the root of a [`CitationGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Root,
    /// Cited by the root.
    Reference,
    /// Cites the root.
    Citer,
    /// Both cited by and citing the root.
    Mutual,
}

/// One paper in a citation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: PaperId,
    /// Title, when the paper's metadata is in the mirror.
    pub title: Option<String>,
    /// A metadata row exists for this paper.
    pub cached: bool,
    /// In-degree over the whole store.
    pub citation_count: u64,
    pub relation: Relation,
}

/// Directed edge `citing -> cited`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub citing: PaperId,
    pub cited: PaperId,
}

/// The root, its references, its citers, and every stored edge among them.
///
/// Nodes are ordered root first, then references in bibliography order,
/// then the remaining citers by ascending ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationGraph {
    pub root: PaperId,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl CitationGraph {
    /// Looks up a node by ID.
    #[must_use]
    pub fn node(&self, id: &PaperId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// References of the root, in bibliography order.
    pub fn references(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.relation, Relation::Reference | Relation::Mutual))
    }

    /// Papers citing the root.
    pub fn citers(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.relation, Relation::Citer | Relation::Mutual))
    }
}

/// Outcome of rebuilding citation edges for every paper with a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Papers with a downloaded source.
    pub papers: u64,
    /// Papers whose edges were rebuilt.
    pub updated: u64,
    pub failed: u64,
    /// Edges stored across all updated papers.
    pub edges: u64,
    pub interrupted: bool,
}
