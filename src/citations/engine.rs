//! Citation edge maintenance and graph queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use super::extract::extract_arxiv_ids;
use super::graph::{CitationGraph, GraphEdge, GraphNode, RebuildReport, Relation};
use super::source::{BibliographyOrigin, read_bibliography};
use crate::error::MirrorError;
use crate::paper::{ArtifactKind, PaperId};
use crate::store::Store;

/// Builds citation edges from downloaded sources and answers graph queries.
#[derive(Debug, Clone)]
pub struct CitationEngine {
    store: Store,
}

impl CitationEngine {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Replaces the outgoing edges of `id` with the identifiers found in its
    /// source bibliography. Returns the number of edges stored.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::NotFound`] if the paper has no metadata row.
    /// - [`MirrorError::Precondition`] if its source is not downloaded or
    ///   cannot be read.
    /// - [`MirrorError::Store`] if the edge transaction fails.
    #[instrument(skip(self), fields(paper_id = %id))]
    pub async fn update_citations(&self, id: &PaperId) -> Result<usize, MirrorError> {
        let paper = self
            .store
            .get_paper(id)
            .await?
            .ok_or_else(|| MirrorError::paper_not_found(id.as_str()))?;
        let Some(path) = paper.artifact_path(ArtifactKind::Source) else {
            return Err(MirrorError::precondition(format!(
                "source archive for {id} is not downloaded"
            )));
        };
        let path = path.to_path_buf();

        let read_path = path.clone();
        let bibliography = tokio::task::spawn_blocking(move || read_bibliography(&read_path))
            .await
            .map_err(|e| MirrorError::precondition(format!("source reader for {id} failed: {e}")))?
            .map_err(|e| {
                let problem = if e.kind() == std::io::ErrorKind::FileTooLarge {
                    "rejected"
                } else {
                    "unreadable"
                };
                MirrorError::precondition(format!(
                    "source archive {} {problem}: {e}",
                    path.display()
                ))
            })?;

        if bibliography.origin == BibliographyOrigin::None {
            debug!(format = ?bibliography.format, "no bibliography found in source");
        }
        let cited = extract_arxiv_ids(&bibliography.text, Some(id));
        let stored = self.store.replace_citations(id, &cited).await?;
        debug!(
            origin = ?bibliography.origin,
            candidates = cited.len(),
            edges = stored,
            "citations updated"
        );
        Ok(stored)
    }

    /// Runs [`Self::update_citations`] for every paper with a downloaded
    /// source. Per-paper failures are logged and counted.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Store`] if the list of papers cannot be read.
    #[instrument(skip(self, interrupted))]
    pub async fn rebuild_all(&self, interrupted: &AtomicBool) -> Result<RebuildReport, MirrorError> {
        let ids = self.store.ids_with_source().await?;
        let mut report = RebuildReport {
            papers: ids.len() as u64,
            ..RebuildReport::default()
        };
        info!(papers = report.papers, "rebuilding citation edges");

        for id in &ids {
            if interrupted.load(Ordering::SeqCst) {
                report.interrupted = true;
                break;
            }
            match self.update_citations(id).await {
                Ok(edges) => {
                    report.updated += 1;
                    report.edges += edges as u64;
                }
                Err(error) => {
                    warn!(paper_id = %id, error = %error, "citation update failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            updated = report.updated,
            failed = report.failed,
            edges = report.edges,
            interrupted = report.interrupted,
            "citation rebuild finished"
        );
        Ok(report)
    }

    /// Builds the citation neighbourhood of `root`.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::NotFound`] if `root` has no metadata row and no
    ///   stored edges in either direction.
    /// - [`MirrorError::Store`] if a query fails.
    #[instrument(skip(self), fields(root = %root))]
    pub async fn graph(&self, root: &PaperId) -> Result<CitationGraph, MirrorError> {
        let references = self.store.references(root).await?;
        let citers = self.store.citers(root, None).await?;

        let mut relations: HashMap<PaperId, Relation> = HashMap::new();
        let mut order = vec![root.clone()];
        relations.insert(root.clone(), Relation::Root);
        for id in &references {
            if !relations.contains_key(id) {
                relations.insert(id.clone(), Relation::Reference);
                order.push(id.clone());
            }
        }
        for id in &citers {
            match relations.get(id).copied() {
                Some(Relation::Reference) => {
                    relations.insert(id.clone(), Relation::Mutual);
                }
                Some(_) => {}
                None => {
                    relations.insert(id.clone(), Relation::Citer);
                    order.push(id.clone());
                }
            }
        }

        let papers: HashMap<PaperId, String> = self
            .store
            .get_papers(&order)
            .await?
            .into_iter()
            .map(|paper| (paper.id.clone(), paper.title.clone()))
            .collect();
        if order.len() == 1 && !papers.contains_key(root) {
            return Err(MirrorError::paper_not_found(root.as_str()));
        }

        let degrees = self.store.in_degrees(&order).await?;
        let edges = self
            .store
            .edges_among(&order)
            .await?
            .into_iter()
            .map(|(citing, cited)| GraphEdge { citing, cited })
            .collect();

        let nodes = order
            .into_iter()
            .map(|id| {
                let title = papers.get(&id).cloned();
                GraphNode {
                    cached: title.is_some(),
                    citation_count: degrees.get(&id).copied().unwrap_or(0),
                    relation: relations.get(&id).copied().unwrap_or(Relation::Citer),
                    title,
                    id,
                }
            })
            .collect();

        Ok(CitationGraph {
            root: root.clone(),
            nodes,
            edges,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::source::test_support::tar_gz;
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::test_support::{memory_store, paper, pid};

    async fn with_source(store: &Store, dir: &tempfile::TempDir, id: &str, bbl: &str) {
        store.upsert_paper(&paper(id, &format!("Paper {id}"), "cs.LG")).await.unwrap();
        let path = dir.path().join(format!("{}.tar.gz", pid(id).file_stem()));
        std::fs::write(&path, tar_gz(&[("main.bbl", bbl)])).unwrap();
        assert!(
            store
                .mark_artifact_downloaded(&pid(id), ArtifactKind::Source, &path.to_string_lossy())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_update_citations_extracts_and_is_idempotent() {
        let store = memory_store().await;
        let dir = tempfile::tempdir().unwrap();
        with_source(
            &store,
            &dir,
            "2401.00001",
            "arXiv:2301.00001 hep-th/9901001 2302.00002v1 2399.99999 2401.00001",
        )
        .await;
        let engine = CitationEngine::new(store.clone());
        let id = pid("2401.00001");

        assert_eq!(engine.update_citations(&id).await.unwrap(), 3);
        let first = store.references(&id).await.unwrap();
        assert_eq!(engine.update_citations(&id).await.unwrap(), 3);
        assert_eq!(store.references(&id).await.unwrap(), first);
        assert_eq!(
            first,
            [pid("2301.00001"), pid("hep-th/9901001"), pid("2302.00002")]
        );
    }

    #[tokio::test]
    async fn test_update_requires_paper_and_source() {
        let store = memory_store().await;
        let engine = CitationEngine::new(store.clone());

        let err = engine.update_citations(&pid("2401.00009")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        store.upsert_paper(&paper("2401.00009", "No source", "cs.LG")).await.unwrap();
        let err = engine.update_citations(&pid("2401.00009")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn test_missing_source_file_is_precondition() {
        let store = memory_store().await;
        store.upsert_paper(&paper("2401.00001", "Gone", "cs.LG")).await.unwrap();
        store
            .mark_artifact_downloaded(&pid("2401.00001"), ArtifactKind::Source, "/nonexistent/x.tar.gz")
            .await
            .unwrap();
        let engine = CitationEngine::new(store);
        let err = engine.update_citations(&pid("2401.00001")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn test_oversized_source_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2401.00001.tar.gz");
        std::fs::File::create(&path)
            .unwrap()
            .set_len(super::super::source::MAX_ARCHIVE_BYTES + 1)
            .unwrap();

        let store = memory_store().await;
        store.upsert_paper(&paper("2401.00001", "Huge", "cs.LG")).await.unwrap();
        store
            .mark_artifact_downloaded(&pid("2401.00001"), ArtifactKind::Source, &path.to_string_lossy())
            .await
            .unwrap();
        let engine = CitationEngine::new(store);
        let err = engine.update_citations(&pid("2401.00001")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("archive too large"), "{err}");
    }

    #[tokio::test]
    async fn test_rebuild_all_counts_failures() {
        let store = memory_store().await;
        let dir = tempfile::tempdir().unwrap();
        with_source(&store, &dir, "2401.00001", "2301.00001").await;
        with_source(&store, &dir, "2401.00002", "2301.00001 2401.00001").await;
        store.upsert_paper(&paper("2401.00003", "Broken", "cs.LG")).await.unwrap();
        store
            .mark_artifact_downloaded(&pid("2401.00003"), ArtifactKind::Source, "/nonexistent/y")
            .await
            .unwrap();

        let engine = CitationEngine::new(store.clone());
        let report = engine.rebuild_all(&AtomicBool::new(false)).await.unwrap();
        assert_eq!(report.papers, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.edges, 3);

        let interrupted = engine.rebuild_all(&AtomicBool::new(true)).await.unwrap();
        assert!(interrupted.interrupted);
        assert_eq!(interrupted.updated, 0);
    }

    #[tokio::test]
    async fn test_graph_of_isolated_paper() {
        let store = memory_store().await;
        store.upsert_paper(&paper("2401.00001", "Alone", "cs.LG")).await.unwrap();
        let engine = CitationEngine::new(store);

        let graph = engine.graph(&pid("2401.00001")).await.unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.nodes[0].relation, Relation::Root);
        assert!(graph.nodes[0].cached);
        assert_eq!(graph.nodes[0].citation_count, 0);
    }

    #[tokio::test]
    async fn test_graph_unknown_root() {
        let engine = CitationEngine::new(memory_store().await);
        let err = engine.graph(&pid("2401.00001")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_graph_orders_and_annotates_nodes() {
        let store = memory_store().await;
        store.upsert_paper(&paper("2401.00005", "Root", "cs.LG")).await.unwrap();
        store.upsert_paper(&paper("2301.00002", "Ref B", "cs.LG")).await.unwrap();
        store.upsert_paper(&paper("2402.00009", "Citer", "cs.LG")).await.unwrap();

        let root = pid("2401.00005");
        store
            .replace_citations(&root, &[pid("2301.00002"), pid("2301.00001"), pid("2402.00001")])
            .await
            .unwrap();
        store.replace_citations(&pid("2402.00009"), &[root.clone(), pid("2301.00002")]).await.unwrap();
        store.replace_citations(&pid("2402.00001"), &[root.clone()]).await.unwrap();
        store.replace_citations(&pid("2403.00007"), &[pid("2301.00002")]).await.unwrap();

        let graph = CitationEngine::new(store).graph(&root).await.unwrap();
        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            ["2401.00005", "2301.00002", "2301.00001", "2402.00001", "2402.00009"]
        );

        let mutual = graph.node(&pid("2402.00001")).unwrap();
        assert_eq!(mutual.relation, Relation::Mutual);
        assert!(!mutual.cached);

        let popular = graph.node(&pid("2301.00002")).unwrap();
        assert_eq!(popular.citation_count, 3);
        assert_eq!(popular.title.as_deref(), Some("Ref B"));

        // 2403.00007 is outside the node set, so its edge is not included.
        assert_eq!(graph.edges.len(), 6);
        assert_eq!(graph.references().count(), 3);
        assert_eq!(graph.citers().count(), 2);
    }
}
