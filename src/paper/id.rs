//! arXiv identifier parsing and normalization.
//!
//! Two grammars are accepted:
//!
//! | Style | Example | Shape |
//! |-------|---------|-------|
//! | New | `2401.12345v2` | `YYMM.NNNN` (0704-1412) or `YYMM.NNNNN` (1501+) |
//! | Old | `hep-th/9901001` | `archive(.SC)?/YYMMNNN`, 1991-2007 |
//!
//! The version suffix, an `arXiv:` prefix and an old-style subject class
//! (`.SC`) are accepted on input and never stored, so `2401.12345v2` and
//! `arXiv:2401.12345` name the same paper, as do `math.GT/0309136` and
//! `math/0309136`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Archives that issued old-style identifiers.
const OLD_STYLE_ARCHIVES: &[&str] = &[
    "acc-phys", "adap-org", "alg-geom", "ao-sci", "astro-ph", "atom-ph", "bayes-an", "chao-dyn",
    "chem-ph", "cmp-lg", "comp-gas", "cond-mat", "cs", "dg-ga", "funct-an", "gr-qc", "hep-ex",
    "hep-lat", "hep-ph", "hep-th", "math", "math-ph", "mtrl-th", "nlin", "nucl-ex", "nucl-th",
    "patt-sol", "physics", "plasm-ph", "q-alg", "q-bio", "quant-ph", "solv-int", "supr-con",
];

#[allow(clippy::expect_used)]
static NEW_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2})(\d{2})\.(\d{4,5})(?:v\d+)?$").expect("new-style id regex is valid")
});

#[allow(clippy::expect_used)]
static OLD_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z]+(?:-[a-z]+)?)(?:\.([a-z]{2}))?/(\d{2})(\d{2})(\d{3})(?:v\d+)?$")
        .expect("old-style id regex is valid")
});

/// Which of the two identifier grammars an ID follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStyle {
    /// `YYMM.NNNNN`
    New,
    /// `archive/YYMMNNN`
    Old,
}

/// A validated, version-less arXiv identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperId(String);

impl PaperId {
    /// Parses and normalizes an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Validation`] when `raw` matches neither grammar,
    /// or matches one syntactically but names an impossible month, year, or
    /// archive.
    pub fn parse(raw: &str) -> Result<Self, MirrorError> {
        let trimmed = raw.trim();
        let body = strip_arxiv_prefix(trimmed);

        if let Some(caps) = NEW_STYLE.captures(body) {
            let yy: u32 = caps[1].parse().unwrap_or(0);
            let mm: u32 = caps[2].parse().unwrap_or(0);
            let number = &caps[3];
            validate_new_style(yy, mm, number).map_err(|reason| invalid(raw, reason))?;
            return Ok(Self(format!("{}{}.{number}", &caps[1], &caps[2])));
        }

        if let Some(caps) = OLD_STYLE.captures(body) {
            let archive = caps[1].to_ascii_lowercase();
            if !OLD_STYLE_ARCHIVES.contains(&archive.as_str()) {
                return Err(invalid(raw, "unknown archive"));
            }
            let yy: u32 = caps[3].parse().unwrap_or(0);
            let mm: u32 = caps[4].parse().unwrap_or(0);
            validate_old_style(yy, mm, &caps[5]).map_err(|reason| invalid(raw, reason))?;

            // The subject class is not part of the identity: arXiv harvests
            // `math.GT/0309136` as `math/0309136`.
            return Ok(Self(format!("{archive}/{}{}{}", &caps[3], &caps[4], &caps[5])));
        }

        Err(invalid(raw, "does not match either arXiv identifier grammar"))
    }

    /// Wraps an identifier read back from the store.
    ///
    /// Stored IDs were validated on the way in, so this skips the grammar check.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    /// Returns the identifier as stored.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns which grammar this identifier follows.
    #[must_use]
    pub fn style(&self) -> IdStyle {
        if self.0.contains('/') {
            IdStyle::Old
        } else {
            IdStyle::New
        }
    }

    /// Returns the directory shard for on-disk artifacts: `YYMM` for
    /// new-style IDs, `archive/YYMM` for old-style ones.
    #[must_use]
    pub fn shard(&self) -> String {
        match self.0.split_once('/') {
            Some((archive, number)) => format!("{archive}/{}", number.get(..4).unwrap_or(number)),
            None => self.0.get(..4).unwrap_or(&self.0).to_string(),
        }
    }

    /// Returns a filesystem-safe stem (`/` replaced by `_`).
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.0.replace('/', "_")
    }

    /// Returns the OAI-PMH identifier for this paper.
    #[must_use]
    pub fn oai_identifier(&self) -> String {
        format!("oai:arXiv.org:{}", self.0)
    }

    /// Parses an OAI-PMH identifier (`oai:arXiv.org:<id>`) or a bare ID.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Validation`] if the embedded ID is malformed.
    pub fn from_oai_identifier(identifier: &str) -> Result<Self, MirrorError> {
        let body = identifier
            .trim()
            .strip_prefix("oai:arXiv.org:")
            .unwrap_or(identifier);
        Self::parse(body)
    }
}

fn strip_arxiv_prefix(value: &str) -> &str {
    match value.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("arxiv:") => value[6..].trim_start(),
        _ => value,
    }
}

fn validate_new_style(yy: u32, mm: u32, number: &str) -> Result<(), &'static str> {
    if !(1..=12).contains(&mm) {
        return Err("month out of range");
    }
    let yymm = yy * 100 + mm;
    match number.len() {
        4 if !(704..=1412).contains(&yymm) => {
            return Err("four-digit sequence numbers were used from 0704 to 1412");
        }
        5 if yymm < 1501 => return Err("five-digit sequence numbers start at 1501"),
        _ => {}
    }
    if number.bytes().all(|b| b == b'0') {
        return Err("sequence number must be non-zero");
    }
    Ok(())
}

fn validate_old_style(yy: u32, mm: u32, number: &str) -> Result<(), &'static str> {
    if !(1..=12).contains(&mm) {
        return Err("month out of range");
    }
    if (8..91).contains(&yy) {
        return Err("old-style identifiers were issued from 1991 to 2007");
    }
    if number == "000" {
        return Err("sequence number must be non-zero");
    }
    Ok(())
}

fn invalid(raw: &str, reason: &str) -> MirrorError {
    MirrorError::validation("paper id", format!("'{}' {reason}", raw.trim()))
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PaperId {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PaperId {
    type Error = MirrorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PaperId> for String {
    fn from(id: PaperId) -> Self {
        id.0
    }
}

impl AsRef<str> for PaperId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_new_style_strips_version() {
        let id = PaperId::parse("2401.12345v3").unwrap();
        assert_eq!(id.as_str(), "2401.12345");
        assert_eq!(id.style(), IdStyle::New);
    }

    #[test]
    fn test_parse_new_style_four_digit_era() {
        assert_eq!(PaperId::parse("0704.0001").unwrap().as_str(), "0704.0001");
        assert_eq!(PaperId::parse("1412.9999v1").unwrap().as_str(), "1412.9999");
    }

    #[test]
    fn test_parse_accepts_arxiv_prefix_and_whitespace() {
        let id = PaperId::parse("  arXiv:2103.00020 ").unwrap();
        assert_eq!(id.as_str(), "2103.00020");
        let id = PaperId::parse("ARXIV: 2103.00020").unwrap();
        assert_eq!(id.as_str(), "2103.00020");
    }

    #[test]
    fn test_parse_old_style_normalizes_case() {
        let id = PaperId::parse("hep-th/9901001v2").unwrap();
        assert_eq!(id.as_str(), "hep-th/9901001");
        assert_eq!(id.style(), IdStyle::Old);

        let id = PaperId::parse("MATH.gt/0309136").unwrap();
        assert_eq!(id.as_str(), "math/0309136");
    }

    #[test]
    fn test_subject_class_does_not_split_identity() {
        let classed = PaperId::parse("math.GT/0309136v2").unwrap();
        let bare = PaperId::parse("math/0309136").unwrap();
        assert_eq!(classed, bare);
        assert_eq!(
            PaperId::from_oai_identifier("oai:arXiv.org:math/0309136").unwrap(),
            classed
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "",
            "2401",
            "2413.12345",   // month 13
            "2401.1234",    // 4-digit after 1412
            "0612.12345",   // 5-digit before 1501
            "0612.1234",    // new style before 0704
            "2401.00000",   // zero sequence
            "foo-bar/9901001",
            "hep-th/0801001", // old style after 2007
            "hep-th/9913001", // month 13
            "hep-th/990100",
        ] {
            let err = PaperId::parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{raw} should be rejected");
        }
    }

    #[test]
    fn test_shard_and_file_stem() {
        let new = PaperId::parse("2401.12345").unwrap();
        assert_eq!(new.shard(), "2401");
        assert_eq!(new.file_stem(), "2401.12345");

        let old = PaperId::parse("math.GT/0309136").unwrap();
        assert_eq!(old.shard(), "math/0309");
        assert_eq!(old.file_stem(), "math_0309136");
    }

    #[test]
    fn test_oai_identifier_round_trip() {
        let id = PaperId::parse("hep-th/9901001").unwrap();
        assert_eq!(id.oai_identifier(), "oai:arXiv.org:hep-th/9901001");
        assert_eq!(
            PaperId::from_oai_identifier("oai:arXiv.org:hep-th/9901001").unwrap(),
            id
        );
    }

    #[test]
    fn test_serde_uses_plain_string() {
        let id = PaperId::parse("2401.12345").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"2401.12345\"");
        let back: PaperId = serde_json::from_str("\"2401.12345v9\"").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<PaperId>("\"nope\"").is_err());
    }
}
