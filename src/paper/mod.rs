//! Paper entity and artifact kinds.

mod id;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

pub use id::{IdStyle, PaperId};

/// A downloadable file associated with a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered PDF.
    Pdf,
    /// Author-submitted source archive (TeX, bibliography, figures).
    Source,
}

impl ArtifactKind {
    /// Returns the string representation stored in logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Source => "source",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "source" | "src" => Ok(Self::Source),
            other => Err(MirrorError::validation(
                "artifact kind",
                format!("'{other}' (expected pdf or source)"),
            )),
        }
    }
}

/// Metadata and local artifact state for one paper.
///
/// Metadata fields are last-writer-wins on re-harvest. The artifact fields
/// (`*_path`, `*_downloaded`) are owned by the download pipeline and are only
/// ever changed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,
    pub created: Option<NaiveDate>,
    pub updated: Option<NaiveDate>,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: String,
    /// Space-separated category tags, primary first.
    pub categories: String,
    pub comments: String,
    pub journal_ref: String,
    pub doi: String,
    pub license: String,
    pub pdf_path: String,
    pub pdf_downloaded: bool,
    pub source_path: String,
    pub source_downloaded: bool,
}

impl Paper {
    /// Creates a paper with only its identifier and title set.
    #[must_use]
    pub fn new(id: PaperId, title: impl Into<String>) -> Self {
        Self {
            id,
            created: None,
            updated: None,
            title: title.into(),
            abstract_text: String::new(),
            authors: String::new(),
            categories: String::new(),
            comments: String::new(),
            journal_ref: String::new(),
            doi: String::new(),
            license: String::new(),
            pdf_path: String::new(),
            pdf_downloaded: false,
            source_path: String::new(),
            source_downloaded: false,
        }
    }

    /// Iterates the category tags.
    pub fn category_list(&self) -> impl Iterator<Item = &str> {
        self.categories.split_whitespace()
    }

    /// Returns the primary (first-listed) category.
    #[must_use]
    pub fn primary_category(&self) -> Option<&str> {
        self.category_list().next()
    }

    /// Returns whether the paper is tagged with `category`.
    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.category_list().any(|c| c == category)
    }

    /// Returns the downloaded flag for `kind`.
    #[must_use]
    pub fn is_downloaded(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Pdf => self.pdf_downloaded,
            ArtifactKind::Source => self.source_downloaded,
        }
    }

    /// Returns the local path for `kind` when it has been downloaded.
    #[must_use]
    pub fn artifact_path(&self, kind: ArtifactKind) -> Option<&Path> {
        let path = match kind {
            ArtifactKind::Pdf => &self.pdf_path,
            ArtifactKind::Source => &self.source_path,
        };
        (self.is_downloaded(kind) && !path.is_empty()).then(|| Path::new(path.as_str()))
    }

    /// Text handed to the embedding generator: `"{title}. {abstract}"`.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let title = self.title.trim().trim_end_matches('.');
        let abstract_text = self.abstract_text.trim();
        if abstract_text.is_empty() {
            title.to_string()
        } else {
            format!("{title}. {abstract_text}")
        }
    }

    /// Rough heap footprint, used by the byte-bounded front cache.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.id.as_str().len()
            + self.title.len()
            + self.abstract_text.len()
            + self.authors.len()
            + self.categories.len()
            + self.comments.len()
            + self.journal_ref.len()
            + self.doi.len()
            + self.license.len()
            + self.pdf_path.len()
            + self.source_path.len()
    }
}
