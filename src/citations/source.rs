//! Bibliography text from downloaded source archives.
//!
//! arXiv serves `e-print` payloads in three shapes, told apart by content:
//! a gzip-compressed tar of the submission, a single gzip-compressed file,
//! or an uncompressed file. Uncompressed tars are accepted as well.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Per-file read limit. Bibliographies are small; anything larger is a figure
/// or a dataset.
const MAX_ENTRY_BYTES: u64 = 32 * 1024 * 1024;

/// Largest archive read into memory.
pub const MAX_ARCHIVE_BYTES: u64 = MAX_ENTRY_BYTES * 8;

/// Payload shape, detected from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    TarGz,
    Tar,
    Gzip,
    Plain,
}

/// Where the bibliography text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BibliographyOrigin {
    /// Compiled `.bbl` file(s).
    Bbl,
    /// BibTeX database(s).
    Bib,
    /// `thebibliography` environment(s) in TeX sources.
    TexEnvironment,
    /// A single-file submission with no `thebibliography` block; the whole
    /// text is scanned.
    WholeText,
    None,
}

/// Text to scan for identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bibliography {
    pub format: SourceFormat,
    pub origin: BibliographyOrigin,
    pub text: String,
}

/// Reads the bibliography of the source archive at `path`.
///
/// Within a tar, `.bbl` files win over `.bib` files, which win over
/// `thebibliography` blocks in `.tex` files. Blocking; call from
/// `spawn_blocking`.
///
/// # Errors
///
/// Returns any IO error from opening, decompressing, or walking the archive,
/// and [`io::ErrorKind::FileTooLarge`] for archives over
/// [`MAX_ARCHIVE_BYTES`].
pub fn read_bibliography(path: &Path) -> io::Result<Bibliography> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    if len > MAX_ARCHIVE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::FileTooLarge,
            format!("archive too large: {len} bytes, limit is {MAX_ARCHIVE_BYTES}"),
        ));
    }
    let bytes = read_capped(file, MAX_ARCHIVE_BYTES)?;
    let format = sniff(&bytes)?;
    debug!(path = %path.display(), ?format, bytes = bytes.len(), "reading source archive");

    let bibliography = match format {
        SourceFormat::TarGz => from_tar(GzDecoder::new(bytes.as_slice()), format)?,
        SourceFormat::Tar => from_tar(bytes.as_slice(), format)?,
        SourceFormat::Gzip => {
            let text = read_capped(GzDecoder::new(bytes.as_slice()), MAX_ENTRY_BYTES)?;
            from_single_file(&String::from_utf8_lossy(&text), format)
        }
        SourceFormat::Plain => from_single_file(&String::from_utf8_lossy(&bytes), format),
    };
    Ok(bibliography)
}

/// Detects the payload shape. Gzip payloads are partly inflated to look for
/// a tar header.
///
/// # Errors
///
/// Returns an error if a gzip stream cannot be inflated far enough to tell.
pub fn sniff(bytes: &[u8]) -> io::Result<SourceFormat> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut head = Vec::with_capacity(512);
        GzDecoder::new(bytes).take(512).read_to_end(&mut head)?;
        return Ok(if is_tar(&head) {
            SourceFormat::TarGz
        } else {
            SourceFormat::Gzip
        });
    }
    Ok(if is_tar(bytes) {
        SourceFormat::Tar
    } else {
        SourceFormat::Plain
    })
}

fn is_tar(head: &[u8]) -> bool {
    head.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()) == Some(TAR_MAGIC)
}

fn read_capped(reader: impl Read, limit: u64) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.take(limit).read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn from_tar(reader: impl Read, format: SourceFormat) -> io::Result<Bibliography> {
    let mut bbl = Vec::new();
    let mut bib = Vec::new();
    let mut tex = Vec::new();

    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().to_ascii_lowercase();
        let bucket = if name.ends_with(".bbl") {
            &mut bbl
        } else if name.ends_with(".bib") {
            &mut bib
        } else if name.ends_with(".tex") {
            &mut tex
        } else {
            continue;
        };
        let content = read_capped(entry, MAX_ENTRY_BYTES)?;
        bucket.push(String::from_utf8_lossy(&content).into_owned());
    }

    let (origin, text) = if !bbl.is_empty() {
        (BibliographyOrigin::Bbl, bbl.join("\n"))
    } else if !bib.is_empty() {
        (BibliographyOrigin::Bib, bib.join("\n"))
    } else {
        let blocks: Vec<&str> = tex.iter().flat_map(|t| bibliography_blocks(t)).collect();
        if blocks.is_empty() {
            (BibliographyOrigin::None, String::new())
        } else {
            (BibliographyOrigin::TexEnvironment, blocks.join("\n"))
        }
    };
    Ok(Bibliography {
        format,
        origin,
        text,
    })
}

fn from_single_file(text: &str, format: SourceFormat) -> Bibliography {
    let blocks = bibliography_blocks(text);
    let (origin, text) = if blocks.is_empty() {
        (BibliographyOrigin::WholeText, text.to_string())
    } else {
        (BibliographyOrigin::TexEnvironment, blocks.join("\n"))
    };
    Bibliography {
        format,
        origin,
        text,
    }
}

/// Contents of every `thebibliography` environment in `tex`. An unterminated
/// environment runs to the end of the text.
pub fn bibliography_blocks(tex: &str) -> Vec<&str> {
    const BEGIN: &str = "\\begin{thebibliography}";
    const END: &str = "\\end{thebibliography}";

    let mut blocks = Vec::new();
    let mut rest = tex;
    while let Some(start) = rest.find(BEGIN) {
        let body = &rest[start + BEGIN.len()..];
        match body.find(END) {
            Some(end) => {
                blocks.push(&body[..end]);
                rest = &body[end + END.len()..];
            }
            None => {
                blocks.push(body);
                break;
            }
        }
    }
    blocks
}
