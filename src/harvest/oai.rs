//! OAI-PMH metadata source.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::record::{OaiResponse, RemoteRecord, parse_response};
use crate::download::{DownloadError, HttpClient};
use crate::paper::PaperId;

/// arXiv's OAI-PMH endpoint.
pub const DEFAULT_OAI_BASE_URL: &str = "https://oaipmh.arxiv.org/oai";

/// Metadata format requested from the endpoint.
pub const METADATA_PREFIX: &str = "arXiv";

const NO_RECORDS_MATCH: &str = "noRecordsMatch";
const ID_DOES_NOT_EXIST: &str = "idDoesNotExist";

/// Selective-harvest parameters of a `ListRecords` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncFilter {
    /// OAI set, e.g. `cs` or `physics:hep-th`.
    pub set: Option<String>,
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl SyncFilter {
    fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("verb", "ListRecords".to_string()),
            ("metadataPrefix", METADATA_PREFIX.to_string()),
        ];
        if let Some(set) = &self.set {
            params.push(("set", set.clone()));
        }
        if let Some(from) = self.from {
            params.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(until) = self.until {
            params.push(("until", until.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

impl std::fmt::Display for SyncFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unset = "*".to_string();
        write!(
            f,
            "set={} from={} until={}",
            self.set.as_deref().unwrap_or("*"),
            self.from.map_or_else(|| unset.clone(), |d| d.to_string()),
            self.until.map_or(unset, |d| d.to_string()),
        )
    }
}

/// One `ListRecords` request. A resumption token is never combined with
/// filter arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListRecordsRequest {
    Initial(SyncFilter),
    Resume(String),
}

impl ListRecordsRequest {
    /// Token that produced this request, or empty for the initial request.
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Initial(_) => "",
            Self::Resume(token) => token,
        }
    }

    fn query_params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Initial(filter) => filter.query_params(),
            Self::Resume(token) => vec![
                ("verb", "ListRecords".to_string()),
                ("resumptionToken", token.clone()),
            ],
        }
    }
}

/// One page of a `ListRecords` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRecordsPage {
    pub records: Vec<RemoteRecord>,
    /// Token for the next page; `None` or empty on the last page.
    pub resumption_token: Option<String>,
    pub complete_list_size: Option<u64>,
    pub cursor: Option<u64>,
}

impl ListRecordsPage {
    /// Next token, if another page follows.
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        self.resumption_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Failures of a metadata source.
#[derive(Debug, Error)]
pub enum OaiError {
    /// HTTP transport failed; may be retried depending on classification.
    #[error(transparent)]
    Transport(#[from] DownloadError),

    /// The body was not a usable OAI-PMH document.
    #[error("malformed OAI-PMH response from {url}: {message}")]
    Malformed { url: String, message: String },

    /// The endpoint answered with an OAI `<error>`.
    #[error("OAI-PMH error {code} from {url}: {message}")]
    Remote {
        url: String,
        code: String,
        message: String,
    },

    /// `GetRecord` for an identifier the repository does not know.
    #[error("record does not exist: {identifier}")]
    IdDoesNotExist { identifier: String },
}

/// Source of paper metadata records.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches one page of records.
    async fn list_records(&self, request: &ListRecordsRequest) -> Result<ListRecordsPage, OaiError>;

    /// Fetches a single record.
    async fn get_record(&self, id: &PaperId) -> Result<RemoteRecord, OaiError>;
}

/// [`MetadataSource`] over an OAI-PMH endpoint.
#[derive(Debug, Clone)]
pub struct OaiClient {
    http: HttpClient,
    base_url: String,
}

impl OaiClient {
    /// Creates a client for the endpoint at `base_url`.
    #[must_use]
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, params: &[(&'static str, String)]) -> Result<OaiResponse, OaiError> {
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let body = self.http.get_text(&self.base_url, &pairs).await?;
        parse_response(&body).map_err(|message| OaiError::Malformed {
            url: self.base_url.clone(),
            message,
        })
    }
}

#[async_trait]
impl MetadataSource for OaiClient {
    #[instrument(skip(self), fields(token = request.token()))]
    async fn list_records(&self, request: &ListRecordsRequest) -> Result<ListRecordsPage, OaiError> {
        let response = self.request(&request.query_params()).await?;

        if let Some(error) = response.errors.first() {
            if error.code == NO_RECORDS_MATCH {
                debug!("no records match the harvest filter");
                return Ok(ListRecordsPage::default());
            }
            warn!(code = %error.code, message = %error.message, "OAI-PMH error");
            return Err(OaiError::Remote {
                url: self.base_url.clone(),
                code: error.code.clone(),
                message: error.message.clone(),
            });
        }

        let (resumption_token, complete_list_size, cursor) = match response.resumption {
            Some(r) => (Some(r.token), r.complete_list_size, r.cursor),
            None => (None, None, None),
        };
        debug!(
            records = response.records.len(),
            complete_list_size, cursor, "fetched ListRecords page"
        );
        Ok(ListRecordsPage {
            records: response.records,
            resumption_token,
            complete_list_size,
            cursor,
        })
    }

    #[instrument(skip(self), fields(paper_id = %id))]
    async fn get_record(&self, id: &PaperId) -> Result<RemoteRecord, OaiError> {
        let identifier = id.oai_identifier();
        let params = [
            ("verb", "GetRecord".to_string()),
            ("identifier", identifier.clone()),
            ("metadataPrefix", METADATA_PREFIX.to_string()),
        ];
        let response = self.request(&params).await?;

        if let Some(error) = response.errors.first() {
            if error.code == ID_DOES_NOT_EXIST {
                return Err(OaiError::IdDoesNotExist { identifier });
            }
            return Err(OaiError::Remote {
                url: self.base_url.clone(),
                code: error.code.clone(),
                message: error.message.clone(),
            });
        }

        response
            .records
            .into_iter()
            .next()
            .ok_or_else(|| OaiError::Malformed {
                url: self.base_url.clone(),
                message: "GetRecord response without a record".to_string(),
            })
    }
}
