//! OAI-PMH response parsing (`metadataPrefix=arXiv`).
//!
//! Only the elements the mirror stores are read; everything else is skipped.
//! Element names are matched on their local part so namespace prefixes do not
//! matter.

use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::MirrorError;
use crate::paper::{Paper, PaperId};

/// One `<record>` from a `ListRecords` or `GetRecord` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Header identifier, e.g. `oai:arXiv.org:2401.00001`.
    pub identifier: String,
    pub datestamp: Option<NaiveDate>,
    /// Header carried `status="deleted"`; no metadata follows.
    pub deleted: bool,
    pub metadata: Option<ArxivMetadata>,
}

/// Contents of the `<arXiv>` metadata element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArxivMetadata {
    pub id: String,
    pub created: Option<NaiveDate>,
    pub updated: Option<NaiveDate>,
    /// Display names, `"forenames keyname suffix"`.
    pub authors: Vec<String>,
    pub title: String,
    pub categories: String,
    pub comments: String,
    pub journal_ref: String,
    pub doi: String,
    pub license: String,
    pub abstract_text: String,
}

impl RemoteRecord {
    /// Converts the record into a [`Paper`] with empty artifact columns.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Validation`] when the record is deleted, has no
    /// usable identifier, or has an empty title.
    pub fn to_paper(&self) -> Result<Paper, MirrorError> {
        let Some(meta) = self.metadata.as_ref().filter(|_| !self.deleted) else {
            return Err(MirrorError::validation(
                "record",
                format!("{} has no metadata", self.identifier),
            ));
        };

        let id = if meta.id.trim().is_empty() {
            PaperId::from_oai_identifier(&self.identifier)?
        } else {
            PaperId::parse(&meta.id)?
        };

        let title = collapse_whitespace(&meta.title);
        if title.is_empty() {
            return Err(MirrorError::validation(
                "record",
                format!("{id} has an empty title"),
            ));
        }

        let mut paper = Paper::new(id, title);
        paper.created = meta.created;
        paper.updated = meta.updated;
        paper.authors = meta.authors.join(", ");
        paper.categories = collapse_whitespace(&meta.categories);
        paper.abstract_text = meta.abstract_text.trim().to_string();
        paper.comments = collapse_whitespace(&meta.comments);
        paper.journal_ref = collapse_whitespace(&meta.journal_ref);
        paper.doi = meta.doi.trim().to_string();
        paper.license = meta.license.trim().to_string();
        Ok(paper)
    }
}

/// `<resumptionToken>` element: the token text plus its attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Resumption {
    pub token: String,
    pub complete_list_size: Option<u64>,
    pub cursor: Option<u64>,
}

/// `<error code="..">message</error>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OaiErrorElement {
    pub code: String,
    pub message: String,
}

/// Everything extracted from one response document.
#[derive(Debug, Default)]
pub(crate) struct OaiResponse {
    pub records: Vec<RemoteRecord>,
    pub resumption: Option<Resumption>,
    pub errors: Vec<OaiErrorElement>,
}

#[derive(Default)]
struct AuthorParts {
    keyname: String,
    forenames: String,
    suffix: String,
}

impl AuthorParts {
    fn display(&self) -> String {
        [&self.forenames, &self.keyname, &self.suffix]
            .iter()
            .map(|part| collapse_whitespace(part))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Default)]
struct ResponseBuilder {
    response: OaiResponse,
    saw_root: bool,
    record: Option<RemoteRecord>,
    in_header: bool,
    author: Option<AuthorParts>,
    error_code: Option<String>,
}

impl ResponseBuilder {
    fn open(&mut self, name: &str, element: &BytesStart<'_>) -> Result<(), String> {
        match name {
            "OAI-PMH" => self.saw_root = true,
            "record" => self.record = Some(RemoteRecord::default()),
            "header" => {
                self.in_header = true;
                if let Some(record) = self.record.as_mut() {
                    record.deleted = attribute(element, "status")?.as_deref() == Some("deleted");
                }
            }
            "arXiv" => {
                if let Some(record) = self.record.as_mut() {
                    record.metadata = Some(ArxivMetadata::default());
                }
            }
            "author" => self.author = Some(AuthorParts::default()),
            "resumptionToken" => {
                self.response.resumption = Some(Resumption {
                    token: String::new(),
                    complete_list_size: numeric_attribute(element, "completeListSize")?,
                    cursor: numeric_attribute(element, "cursor")?,
                });
            }
            "error" => {
                self.error_code = Some(attribute(element, "code")?.unwrap_or_default());
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str, text: &str) {
        match name {
            "record" => {
                if let Some(record) = self.record.take() {
                    self.response.records.push(record);
                }
                return;
            }
            "header" => {
                self.in_header = false;
                return;
            }
            "author" => {
                let display = self.author.take().map(|a| a.display()).unwrap_or_default();
                if !display.is_empty() {
                    if let Some(meta) = self.metadata_mut() {
                        meta.authors.push(display);
                    }
                }
                return;
            }
            "resumptionToken" => {
                if let Some(resumption) = self.response.resumption.as_mut() {
                    resumption.token = text.trim().to_string();
                }
                return;
            }
            "error" => {
                if let Some(code) = self.error_code.take() {
                    self.response.errors.push(OaiErrorElement {
                        code,
                        message: text.trim().to_string(),
                    });
                }
                return;
            }
            _ => {}
        }

        if let Some(author) = self.author.as_mut() {
            match name {
                "keyname" => author.keyname = text.to_string(),
                "forenames" => author.forenames = text.to_string(),
                "suffix" => author.suffix = text.to_string(),
                _ => {}
            }
            return;
        }

        if self.in_header {
            if let Some(record) = self.record.as_mut() {
                match name {
                    "identifier" => record.identifier = text.trim().to_string(),
                    "datestamp" => record.datestamp = parse_date(text),
                    _ => {}
                }
            }
            return;
        }

        let Some(meta) = self.metadata_mut() else {
            return;
        };
        let value = text.to_string();
        match name {
            "id" => meta.id = value,
            "created" => meta.created = parse_date(text),
            "updated" => meta.updated = parse_date(text),
            "title" => meta.title = value,
            "categories" => meta.categories = value,
            "comments" => meta.comments = value,
            "journal-ref" => meta.journal_ref = value,
            "doi" => meta.doi = value,
            "license" => meta.license = value,
            "abstract" => meta.abstract_text = value,
            _ => {}
        }
    }

    fn metadata_mut(&mut self) -> Option<&mut ArxivMetadata> {
        self.record.as_mut().and_then(|r| r.metadata.as_mut())
    }
}

/// Parses an OAI-PMH response document.
///
/// Returns a description of the problem when the document is not well-formed
/// XML or is not an OAI-PMH response at all.
pub(crate) fn parse_response(xml: &str) -> Result<OaiResponse, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut builder = ResponseBuilder::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = local_name(&element)?;
                builder.open(&name, &element)?;
                stack.push(name);
                text.clear();
            }
            Ok(Event::Empty(element)) => {
                let name = local_name(&element)?;
                builder.open(&name, &element)?;
                builder.close(&name, "");
                text.clear();
            }
            Ok(Event::Text(content)) => {
                let unescaped = content
                    .unescape()
                    .map_err(|e| format!("bad text at byte {}: {e}", reader.buffer_position()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(content)) => {
                text.push_str(&String::from_utf8_lossy(&content.into_inner()));
            }
            Ok(Event::End(_)) => {
                let Some(name) = stack.pop() else {
                    return Err("unbalanced closing tag".to_string());
                };
                builder.close(&name, &text);
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                ));
            }
        }
    }

    if !builder.saw_root {
        return Err("document is not an OAI-PMH response".to_string());
    }
    if !stack.is_empty() {
        return Err(format!("document truncated inside <{}>", stack.join("/")));
    }
    Ok(builder.response)
}

fn local_name(element: &BytesStart<'_>) -> Result<String, String> {
    std::str::from_utf8(element.local_name().as_ref())
        .map(str::to_string)
        .map_err(|e| format!("element name is not UTF-8: {e}"))
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| format!("bad attribute: {e}"))?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| format!("bad attribute value for {key}: {e}"))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn numeric_attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<u64>, String> {
    match attribute(element, key)? {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{key}=\"{value}\" is not a number")),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
