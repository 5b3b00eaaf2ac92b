//! arXiv identifier extraction from bibliography text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::paper::PaperId;

// The regex crate has no look-behind, so the left boundary is matched as a
// consumed character and the identifier is captured separately.

#[allow(clippy::expect_used)]
static NEW_STYLE_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^0-9a-z.])(\d{4}\.\d{4,5})(v\d+)?")
        .expect("new-style candidate regex is valid")
});

#[allow(clippy::expect_used)]
static OLD_STYLE_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^0-9a-z\-.])([a-z]+(?:-[a-z]+)?(?:\.[a-z]{2})?/\d{7})(v\d+)?")
        .expect("old-style candidate regex is valid")
});

/// Extracts cited identifiers from `text` in first-occurrence order.
///
/// Candidates of both grammars are validated with [`PaperId::parse`] (which
/// drops the version), de-duplicated, and `exclude` (the citing paper) is
/// removed.
#[must_use]
pub fn extract_arxiv_ids(text: &str, exclude: Option<&PaperId>) -> Vec<PaperId> {
    let mut candidates: Vec<(usize, PaperId)> = Vec::new();
    for pattern in [&*NEW_STYLE_CANDIDATE, &*OLD_STYLE_CANDIDATE] {
        for caps in pattern.captures_iter(text) {
            let Some(id_match) = caps.get(1) else {
                continue;
            };
            let end = caps.get(0).map_or(id_match.end(), |m| m.end());
            if text[end..].starts_with(|c: char| c.is_ascii_digit()) {
                trace!(candidate = id_match.as_str(), "identifier runs into more digits");
                continue;
            }
            match PaperId::parse(id_match.as_str()) {
                Ok(id) => candidates.push((id_match.start(), id)),
                Err(_) => trace!(candidate = id_match.as_str(), "discarding malformed candidate"),
            }
        }
    }

    candidates.sort_by_key(|(offset, _)| *offset);
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|(_, id)| id)
        .filter(|id| exclude != Some(id))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ids(text: &str) -> Vec<String> {
        extract_arxiv_ids(text, None)
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_three_valid_and_one_malformed() {
        let bbl = r"
            \bibitem{a} A. Author, arXiv:2401.00001v2.
            \bibitem{b} B. Author, hep-th/9901001.
            \bibitem{c} C. Author, \url{https://arxiv.org/abs/1501.00123}.
            \bibitem{d} D. Author, 2413.00001 (no such month).
        ";
        assert_eq!(ids(bbl), ["2401.00001", "hep-th/9901001", "1501.00123"]);
    }

    #[test]
    fn test_order_and_dedup_across_grammars() {
        let text = "math.GT/0309136 then 2401.00001 then arXiv:math/0309136v3 and 2401.00001";
        assert_eq!(ids(text), ["math/0309136", "2401.00001"]);
    }

    #[test]
    fn test_self_citation_dropped() {
        let own = PaperId::parse("2401.00001").unwrap();
        let found = extract_arxiv_ids("2401.00001 2401.00002", Some(&own));
        assert_eq!(found, [PaperId::parse("2401.00002").unwrap()]);
    }

    #[test]
    fn test_rejects_embedded_numbers() {
        // DOI fragments, decimals and over-long digit runs are not identifiers.
        assert!(ids("doi:10.1103/PhysRevD.2401.00001").is_empty());
        assert!(ids("value 1.2401.00001").is_empty());
        assert!(ids("2401.000012").is_empty());
        assert!(ids("hep-th/99010011").is_empty());
    }

    #[test]
    fn test_unknown_archive_rejected() {
        assert!(ids("foo-bar/9901001").is_empty());
    }

    #[test]
    fn test_adjacent_identifiers() {
        assert_eq!(
            ids("2401.00001,2401.00002;hep-ph/0101001"),
            ["2401.00001", "2401.00002", "hep-ph/0101001"]
        );
    }
}
