//! Metadata fetching and snapshot resolution against a live HTTP server.

use std::sync::Arc;
use std::time::Duration;

use debrepro_core::metadata::{FetchError, MetadataFetcher};
use debrepro_core::snapshot::{ResolveError, SnapshotResolver};
use debrepro_core::{BuildTimestamp, HttpError, HttpPageSource, PageSource};
use mockito::Matcher;

const STATUS: &str = r#"<html><body><header>
<span class="build-time">reproducible 2017-01-10 04:05 UTC</span>
<a href="/debian/testing/amd64/attr_2.4.47-2_amd64.buildinfo" title="Show: build info">buildinfo</a>
</header></body></html>"#;

const BUILDINFO: &str = "Format: 1.0
Source: attr
Binary: attr libattr1 libattr1-dev
Version: 1:2.4.47-2
Checksums-Sha256:
 5f7cf5e8e3c4a0f7d3c8a0c2b0b1a1e9f0d2c7e6b5a4d3c2b1a0f9e8d7c6b5a4 63256 attr_2.4.47-2_amd64.deb
Installed-Build-Depends:
 autoconf (= 2.69-10),
 libc6 (= 2.24-8)
";

fn pages() -> Arc<dyn PageSource> {
    Arc::new(HttpPageSource::new(Duration::from_secs(5)).unwrap())
}

fn listing(ids: &[&str]) -> String {
    let anchors: String = ids
        .iter()
        .map(|id| format!("<a href=\"{id}/\">{id}</a><br />\n"))
        .collect();
    format!("<html><body><p>{anchors}</p></body></html>")
}

#[tokio::test]
async fn fetches_target_from_status_and_buildinfo_pages() {
    let mut server = mockito::Server::new_async().await;
    let status = server
        .mock("GET", "/debian/rb-pkg/testing/amd64/attr.html")
        .with_status(200)
        .with_body(STATUS)
        .create_async()
        .await;
    let info = server
        .mock("GET", "/debian/testing/amd64/attr_2.4.47-2_amd64.buildinfo")
        .with_status(200)
        .with_body(BUILDINFO)
        .create_async()
        .await;

    let fetcher = MetadataFetcher::new(pages(), &server.url(), "testing", "amd64");
    let target = fetcher.fetch("attr").await.unwrap();

    status.assert_async().await;
    info.assert_async().await;
    assert_eq!(target.name, "attr");
    assert_eq!(target.version, "1:2.4.47-2");
    assert_eq!(target.build_dir(), "attr-2.4.47");
    assert_eq!(target.artifact.as_deref(), Some("attr_2.4.47-2_amd64.deb"));
    assert_eq!(target.dependencies.len(), 2);
    assert_eq!(
        target.build_time,
        BuildTimestamp::parse("2017-01-10 04:05").unwrap()
    );
}

#[tokio::test]
async fn missing_status_page_is_an_http_error() {
    let mut server = mockito::Server::new_async().await;
    let _missing = server
        .mock("GET", "/debian/rb-pkg/testing/amd64/ghost.html")
        .with_status(404)
        .create_async()
        .await;

    let fetcher = MetadataFetcher::new(pages(), &server.url(), "testing", "amd64");
    let err = fetcher.fetch("ghost").await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::Http(HttpError::Status { status: 404, .. })
    ));
}

#[tokio::test]
async fn malformed_buildinfo_is_a_parse_error() {
    let mut server = mockito::Server::new_async().await;
    let _status = server
        .mock("GET", "/debian/rb-pkg/testing/amd64/attr.html")
        .with_body(STATUS)
        .create_async()
        .await;
    let _info = server
        .mock("GET", "/debian/testing/amd64/attr_2.4.47-2_amd64.buildinfo")
        .with_body("Format: 1.0\nSource: attr\n")
        .create_async()
        .await;

    let fetcher = MetadataFetcher::new(pages(), &server.url(), "testing", "amd64");
    let err = fetcher.fetch("attr").await.unwrap_err();
    match err {
        FetchError::Parse { url, .. } => assert!(url.ends_with(".buildinfo")),
        other => panic!("expected parse error, got {other}"),
    }
}

#[tokio::test]
async fn resolves_snapshots_across_month_boundary() {
    let mut server = mockito::Server::new_async().await;
    let december = server
        .mock("GET", "/archive/debian/")
        .match_query(Matcher::Regex("year=2016;month=12".to_string()))
        .with_body(listing(&["20161230T000000Z", "20161231T120000Z"]))
        .create_async()
        .await;
    let january = server
        .mock("GET", "/archive/debian/")
        .match_query(Matcher::Regex("year=2017;month=01".to_string()))
        .with_body(listing(&["20170101T060000Z", "20170102T000000Z"]))
        .create_async()
        .await;

    let resolver = SnapshotResolver::new(pages(), &server.url(), "debian");
    let set = resolver
        .resolve(BuildTimestamp::parse("2017-01-01 03:00").unwrap())
        .await
        .unwrap();

    december.assert_async().await;
    january.assert_async().await;
    let ids: Vec<_> = set.snapshots().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["20161230T000000Z", "20161231T120000Z", "20170101T060000Z"]
    );
}

#[tokio::test]
async fn empty_listing_fails_resolution() {
    let mut server = mockito::Server::new_async().await;
    let _listing = server
        .mock("GET", "/archive/debian/")
        .match_query(Matcher::Any)
        .with_body(listing(&[]))
        .create_async()
        .await;

    let resolver = SnapshotResolver::new(pages(), &server.url(), "debian");
    let err = resolver
        .resolve(BuildTimestamp::parse("2017-01-15 12:00").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::NoSnapshotBefore(_)));
}

#[tokio::test]
async fn listing_server_error_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let _listing = server
        .mock("GET", "/archive/debian/")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let resolver = SnapshotResolver::new(pages(), &server.url(), "debian");
    let err = resolver
        .resolve(BuildTimestamp::parse("2017-01-15 12:00").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Http(HttpError::Status { status: 500, .. })
    ));
}
