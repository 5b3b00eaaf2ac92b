//! Integration tests for metadata harvesting against a mock OAI-PMH endpoint.

mod support;

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::NaiveDate;
use mirror_core::{ErrorKind, Mirror, MirrorOptions, PaperId, SyncFilter, SyncOptions};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{method, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(id: &str, title: &str, categories: &str) -> String {
    format!(
        r#"<record>
  <header>
    <identifier>oai:arXiv.org:{id}</identifier>
    <datestamp>2024-01-15</datestamp>
    <setSpec>cs</setSpec>
  </header>
  <metadata>
    <arXiv xmlns="http://arxiv.org/OAI/arXiv/">
      <id>{id}</id>
      <created>2024-01-10</created>
      <authors>
        <author><keyname>Lovelace</keyname><forenames>Ada</forenames></author>
        <author><keyname>Babbage</keyname><forenames>Charles</forenames></author>
      </authors>
      <title>{title}</title>
      <categories>{categories}</categories>
      <abstract>  We study {title}.  </abstract>
    </arXiv>
  </metadata>
</record>"#
    )
}

fn page(records: &[String], token: &str, cursor: u64, total: u64) -> String {
    let resumption = if token.is_empty() {
        format!(r#"<resumptionToken completeListSize="{total}" cursor="{cursor}"/>"#)
    } else {
        format!(
            r#"<resumptionToken completeListSize="{total}" cursor="{cursor}">{token}</resumptionToken>"#
        )
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-02-01T00:00:00Z</responseDate>
  <ListRecords>{}{resumption}</ListRecords>
</OAI-PMH>"#,
        records.concat()
    )
}

fn first_page() -> String {
    page(
        &[
            record("2401.00001", "Sparse Attention", "cs.LG stat.ML"),
            record("2401.00002", "Graph Kernels", "cs.LG"),
            record("2401.00003", "Type Inference", "cs.PL"),
        ],
        "t1",
        0,
        5,
    )
}

fn last_page() -> String {
    page(
        &[
            record("2401.00004", "Consensus", "cs.DC"),
            // Re-sent record: upserted again, not duplicated.
            record("2401.00002", "Graph Kernels (revised)", "cs.LG"),
            record("2401.00005", "Lattice Codes", "cs.IT"),
        ],
        "",
        3,
        5,
    )
}

fn january_cs() -> SyncFilter {
    SyncFilter {
        set: Some("cs".to_string()),
        from: NaiveDate::from_ymd_opt(2024, 1, 1),
        until: NaiveDate::from_ymd_opt(2024, 1, 31),
    }
}

fn fast_options(batch_size: usize) -> SyncOptions {
    SyncOptions {
        batch_size,
        max_retries: 2,
        retry_base_delay: Duration::from_millis(5),
        request_interval: Duration::from_millis(10),
        ..SyncOptions::default()
    }
}

async fn mount_first_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("metadataPrefix", "arXiv"))
        .and(query_param("set", "cs"))
        .and(query_param("from", "2024-01-01"))
        .and(query_param("until", "2024-01-31"))
        .and(query_param_is_missing("resumptionToken"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first_page()))
        .mount(server)
        .await;
}

async fn open_mirror(dir: &TempDir, server: &MockServer) -> Mirror {
    let mut options = MirrorOptions::new(dir.path());
    options.oai_base_url = server.uri();
    Mirror::open(options).await.expect("mirror should open")
}

#[tokio::test]
async fn test_full_harvest_stores_every_unique_record() -> Result<(), Box<dyn std::error::Error>> {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    mount_first_page(&server).await;
    Mock::given(method("GET"))
        .and(query_param("resumptionToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(last_page()))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let mirror = open_mirror(&dir, &server).await;
    let report = mirror
        .sync_metadata(january_cs(), &fast_options(2), &AtomicBool::new(false))
        .await?;

    assert!(report.complete);
    assert!(!report.resumed);
    assert!(!report.interrupted);
    assert_eq!(report.pages, 2);
    assert_eq!(report.fetched, 6);
    assert_eq!(report.complete_list_size, Some(5));

    let stats = mirror.stats().await?;
    assert_eq!(stats.papers, 5);
    assert!(!stats.sync_pending);
    assert!(stats.last_sync.is_some());

    let revised = mirror.get_paper(&PaperId::parse("2401.00002")?).await?;
    assert_eq!(revised.title, "Graph Kernels (revised)");
    assert_eq!(revised.authors, "Ada Lovelace, Charles Babbage");
    assert_eq!(revised.abstract_text, "We study Graph Kernels (revised).");

    let categories = mirror.list_categories().await?;
    let names: Vec<&str> = categories.iter().map(|c| c.category.as_str()).collect();
    assert_eq!(names, ["cs.DC", "cs.IT", "cs.LG", "cs.PL", "stat.ML"]);

    mirror.close().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_page_leaves_resumable_checkpoint() -> Result<(), Box<dyn std::error::Error>> {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    mount_first_page(&server).await;
    Mock::given(method("GET"))
        .and(query_param("resumptionToken", "t1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let mirror = open_mirror(&dir, &server).await;
    let err = mirror
        .sync_metadata(january_cs(), &fast_options(2), &AtomicBool::new(false))
        .await
        .expect_err("second page keeps failing");

    assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    assert_eq!(err.progress().map(|p| p.committed), Some(3));

    let checkpoint = mirror.store().load_checkpoint().await?;
    assert_eq!(checkpoint.resumption_token, "t1");
    assert_eq!(checkpoint.filter, january_cs());
    assert_eq!(mirror.stats().await?.papers, 3);

    // A different filter must not silently discard the pending token.
    let other = SyncFilter {
        set: Some("math".to_string()),
        ..SyncFilter::default()
    };
    let err = mirror
        .sync_metadata(other, &fast_options(2), &AtomicBool::new(false))
        .await
        .expect_err("pending token belongs to another filter");
    assert_eq!(err.kind(), ErrorKind::Precondition);

    // Once the endpoint recovers, the run resumes from the stored token.
    server.reset().await;
    Mock::given(method("GET"))
        .and(query_param("resumptionToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(last_page()))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let report = mirror
        .sync_metadata(january_cs(), &fast_options(2), &AtomicBool::new(false))
        .await?;
    assert!(report.resumed);
    assert!(report.complete);
    assert_eq!(report.pages, 1);
    assert_eq!(mirror.stats().await?.papers, 5);
    assert!(!mirror.store().load_checkpoint().await?.is_pending());

    // An uninterrupted harvest into a fresh root stores identical rows.
    mount_first_page(&server).await;
    Mock::given(method("GET"))
        .and(query_param("resumptionToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(last_page()))
        .mount(&server)
        .await;
    let baseline_dir = TempDir::new()?;
    let baseline = open_mirror(&baseline_dir, &server).await;
    baseline
        .sync_metadata(january_cs(), &fast_options(2), &AtomicBool::new(false))
        .await?;
    for n in 1..=5 {
        let id = PaperId::parse(&format!("2401.0000{n}"))?;
        let resumed = mirror.store().load_paper(&id).await?;
        assert!(resumed.is_some(), "{id} missing after resume");
        assert_eq!(resumed, baseline.store().load_paper(&id).await?);
    }

    baseline.close().await;
    mirror.close().await;
    Ok(())
}

#[tokio::test]
async fn test_no_records_match_is_an_empty_complete_run() -> Result<(), Box<dyn std::error::Error>>
{
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "ListRecords"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<OAI-PMH><error code="noRecordsMatch">nothing in range</error></OAI-PMH>"#,
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let mirror = open_mirror(&dir, &server).await;
    let report = mirror
        .sync_metadata(january_cs(), &fast_options(10), &AtomicBool::new(false))
        .await?;

    assert!(report.complete);
    assert_eq!(report.fetched, 0);
    assert_eq!(mirror.stats().await?.papers, 0);
    Ok(())
}

#[tokio::test]
async fn test_bad_argument_is_a_protocol_error() -> Result<(), Box<dyn std::error::Error>> {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<OAI-PMH><error code="badArgument">unknown set</error></OAI-PMH>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let mirror = open_mirror(&dir, &server).await;
    let err = mirror
        .sync_metadata(january_cs(), &fast_options(10), &AtomicBool::new(false))
        .await
        .expect_err("remote error is not retried");
    assert_eq!(err.kind(), ErrorKind::Protocol);
    Ok(())
}

#[tokio::test]
async fn test_fetch_metadata_uses_get_record() -> Result<(), Box<dyn std::error::Error>> {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "GetRecord"))
        .and(query_param("identifier", "oai:arXiv.org:hep-th/9901001"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<OAI-PMH><GetRecord>{}</GetRecord></OAI-PMH>",
            record("hep-th/9901001", "Strings", "hep-th")
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("verb", "GetRecord"))
        .and(query_param("identifier", "oai:arXiv.org:2401.99999"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<OAI-PMH><error code="idDoesNotExist">no such id</error></OAI-PMH>"#,
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let mirror = open_mirror(&dir, &server).await;

    let paper = mirror.fetch_metadata(&PaperId::parse("hep-th/9901001")?).await?;
    assert_eq!(paper.title, "Strings");
    assert_eq!(paper.categories, "hep-th");

    let err = mirror
        .fetch_metadata(&PaperId::parse("2401.99999")?)
        .await
        .expect_err("unknown id");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}
