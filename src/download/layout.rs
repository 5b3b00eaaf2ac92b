//! On-disk layout of the mirror and remote artifact URLs.
//!
//! ```text
//! <root>/
//!   index.db
//!   pdf/<shard>/<stem>.pdf
//!   src/<shard>/<stem>.tar.gz
//! ```
//!
//! `<shard>` is `YYMM` for new-style IDs and `archive/YYMM` for old-style
//! ones; `<stem>` is the ID with `/` replaced by `_`.

use std::path::{Path, PathBuf};

use crate::paper::{ArtifactKind, PaperId};

/// Database file name under the root.
pub const INDEX_DB_FILE: &str = "index.db";

/// Default base for abstract, PDF and e-print URLs.
pub const DEFAULT_ARTIFACT_BASE_URL: &str = "https://arxiv.org";

/// Paths under a mirror root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorLayout {
    root: PathBuf,
}

impl MirrorLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Mirror root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/index.db`.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.root.join(INDEX_DB_FILE)
    }

    /// Final path of an artifact.
    #[must_use]
    pub fn artifact_path(&self, id: &PaperId, kind: ArtifactKind) -> PathBuf {
        let (dir, extension) = match kind {
            ArtifactKind::Pdf => ("pdf", "pdf"),
            ArtifactKind::Source => ("src", "tar.gz"),
        };
        self.root
            .join(dir)
            .join(id.shard())
            .join(format!("{}.{extension}", id.file_stem()))
    }
}

/// Remote URLs for a paper's pages and artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUrls {
    base: String,
}

impl Default for ArtifactUrls {
    fn default() -> Self {
        Self::new(DEFAULT_ARTIFACT_BASE_URL)
    }
}

impl ArtifactUrls {
    /// Creates URL builders over `base` (trailing slashes are ignored).
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// `{base}/abs/{id}`.
    #[must_use]
    pub fn abs_url(&self, id: &PaperId) -> String {
        format!("{}/abs/{id}", self.base)
    }

    /// `{base}/pdf/{id}.pdf` or `{base}/e-print/{id}`.
    #[must_use]
    pub fn artifact_url(&self, id: &PaperId, kind: ArtifactKind) -> String {
        match kind {
            ArtifactKind::Pdf => format!("{}/pdf/{id}.pdf", self.base),
            ArtifactKind::Source => format!("{}/e-print/{id}", self.base),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(raw: &str) -> PaperId {
        PaperId::parse(raw).unwrap()
    }

    #[test]
    fn test_new_style_paths() {
        let layout = MirrorLayout::new("/m");
        assert_eq!(layout.db_path(), PathBuf::from("/m/index.db"));
        assert_eq!(
            layout.artifact_path(&id("2401.00001"), ArtifactKind::Pdf),
            PathBuf::from("/m/pdf/2401/2401.00001.pdf")
        );
        assert_eq!(
            layout.artifact_path(&id("2401.00001"), ArtifactKind::Source),
            PathBuf::from("/m/src/2401/2401.00001.tar.gz")
        );
    }

    #[test]
    fn test_old_style_paths_are_sharded_by_archive() {
        let layout = MirrorLayout::new("/m");
        assert_eq!(
            layout.artifact_path(&id("hep-th/9901001"), ArtifactKind::Pdf),
            PathBuf::from("/m/pdf/hep-th/9901/hep-th_9901001.pdf")
        );
    }

    #[test]
    fn test_artifact_urls() {
        let urls = ArtifactUrls::new("https://export.arxiv.org/");
        assert_eq!(
            urls.abs_url(&id("2401.00001")),
            "https://export.arxiv.org/abs/2401.00001"
        );
        assert_eq!(
            urls.artifact_url(&id("2401.00001"), ArtifactKind::Pdf),
            "https://export.arxiv.org/pdf/2401.00001.pdf"
        );
        assert_eq!(
            urls.artifact_url(&id("math.GT/0309136"), ArtifactKind::Source),
            "https://export.arxiv.org/e-print/math/0309136"
        );
    }
}
