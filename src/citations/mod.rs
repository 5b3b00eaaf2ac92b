//! Citation graph derived from downloaded source archives.
//!
//! Edges are extracted from each paper's bibliography (`.bbl`, `.bib`, or a
//! `thebibliography` block) by matching arXiv identifiers of both grammars.
//! A paper's outgoing edges are always replaced as a whole set.

mod engine;
mod extract;
mod graph;
mod source;

pub use engine::CitationEngine;
pub use extract::extract_arxiv_ids;
pub use graph::{CitationGraph, GraphEdge, GraphNode, RebuildReport, Relation};
pub use source::{
    Bibliography, BibliographyOrigin, SourceFormat, bibliography_blocks, read_bibliography, sniff,
};
