//! End-to-end behavior of the dispatch loop, driven through the mock
//! adapter.

use async_trait::async_trait;
use hyper::StatusCode;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use veer::config::{RawConfig, RawMapping};
use veer::events::Event;
use veer::fs::{FileMeta, FileReader, FileSystem, LocalFileSystem};
use veer::handlers::{from_fn, CustomOutcome};
use veer::http_date::format_http_date;
use veer::MockServer;

/// Counts every stat/open before delegating to the real file system.
#[derive(Default)]
struct CountingFs {
    calls: AtomicUsize,
}

#[async_trait]
impl FileSystem for CountingFs {
    async fn stat(&self, path: &Path) -> io::Result<Option<FileMeta>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LocalFileSystem.stat(path).await
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LocalFileSystem.open(path).await
    }
}

fn mock(dir: &Path, mappings: Vec<RawMapping>) -> MockServer {
    MockServer::from_raw(RawConfig::new(mappings).with_cwd(dir)).unwrap()
}

fn drain(receiver: &mut broadcast::Receiver<Arc<Event>>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        names.push(event.name());
    }
    names
}

#[tokio::test]
async fn status_rule_answers_before_file_rule() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), "file a").unwrap();
    let fs = Arc::new(CountingFs::default());
    let mock = mock(
        dir.path(),
        vec![
            RawMapping::regex(r"^/a$").status(404),
            RawMapping::regex(r"^/(.*)").file("$1"),
        ],
    )
    .with_file_system(fs.clone());

    let response = mock.get("/a").send().await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body.is_empty());
    assert_eq!(fs.calls.load(Ordering::SeqCst), 0);

    let response = mock.get("/a/").send().await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(fs.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn file_rule_serves_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hello file").unwrap();
    let mock = mock(dir.path(), vec![RawMapping::regex(r"^/(.*)").file("$1")]);

    let response = mock.get("/hello.txt").send().await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "hello file");
    assert_eq!(response.header("content-length"), Some("10"));
    assert!(response.header("last-modified").is_none());

    let traversal = mock.get("/../hello.txt").send().await.unwrap();
    assert_eq!(traversal.text(), "hello file");
}

#[tokio::test]
async fn conditional_get_with_modified_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    std::fs::write(&path, "<p>page</p>").unwrap();
    let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
    let mock = mock(
        dir.path(),
        vec![RawMapping::regex(r"^/(.*)")
            .file("$1")
            .caching_strategy("modified")],
    );

    let first = mock.get("/page.html").send().await.unwrap();
    assert_eq!(first.status, StatusCode::OK);
    let last_modified = first.header("last-modified").unwrap().to_string();
    assert_eq!(last_modified, format_http_date(mtime));

    let cached = mock
        .get("/page.html")
        .header("If-Modified-Since", &last_modified)
        .send()
        .await
        .unwrap();
    assert_eq!(cached.status, StatusCode::NOT_MODIFIED);
    assert!(cached.body.is_empty());

    let older = format_http_date(mtime - Duration::from_secs(3600));
    let stale = mock
        .get("/page.html")
        .header("If-Modified-Since", &older)
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status, StatusCode::OK);
    assert_eq!(stale.text(), "<p>page</p>");

    let garbage = mock
        .get("/page.html")
        .header("If-Modified-Since", "yesterday")
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status, StatusCode::OK);
}

#[tokio::test]
async fn cyclic_redirects_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let config = RawConfig::new(vec![
        RawMapping::regex(r"^/a$").custom_handler(from_fn(|_, _| Ok(CustomOutcome::redirect("/b")))),
        RawMapping::regex(r"^/b$").custom_handler(from_fn(|_, _| Ok(CustomOutcome::redirect("/a")))),
    ])
    .with_cwd(dir.path())
    .with_max_redirects(5);
    let mock = MockServer::from_raw(config).unwrap();
    let mut events = mock.dispatcher().subscribe();

    let response = mock.get("/a").send().await.unwrap();
    assert_eq!(response.status, StatusCode::LOOP_DETECTED);
    assert_eq!(
        response.error_code().map(|code| code.name),
        Some("TOO_MANY_REDIRECTS")
    );

    let names = drain(&mut events);
    assert_eq!(names.iter().filter(|n| **n == "redirecting").count(), 5);
    assert_eq!(names.first(), Some(&"incoming"));
    assert_eq!(&names[names.len() - 2..], &["error", "redirected"]);
}

#[tokio::test]
async fn cache_extension_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mock = mock(
        dir.path(),
        vec![RawMapping::regex(r"^/store/(.+)$").custom("cache")],
    );

    let created = mock.request("POST", "/store/k").body("v1").send().await.unwrap();
    assert_eq!(created.status, StatusCode::CREATED);
    let fetched = mock.get("/store/k").send().await.unwrap();
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.text(), "v1");

    let updated = mock.request("POST", "/store/k").body("v2").send().await.unwrap();
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(mock.get("/store/k").send().await.unwrap().text(), "v2");

    let deleted = mock.request("DELETE", "/store/k").send().await.unwrap();
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let gone = mock.get("/store/k").send().await.unwrap();
    assert_eq!(gone.status, StatusCode::NO_CONTENT);
    assert!(gone.body.is_empty());
}

#[tokio::test]
async fn cache_stores_are_per_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let mock = mock(
        dir.path(),
        vec![
            RawMapping::regex(r"^/one/(.+)$").custom("cache"),
            RawMapping::regex(r"^/two/(.+)$").custom("cache"),
        ],
    );
    mock.request("PUT", "/one/k").body("1").send().await.unwrap();
    assert_eq!(mock.get("/one/k").send().await.unwrap().text(), "1");
    assert_eq!(mock.get("/two/k").send().await.unwrap().status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn ignore_if_not_found_resumes_below() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("public")).unwrap();
    std::fs::write(dir.path().join("public/exists.txt"), "static").unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let mock = mock(
        dir.path(),
        vec![
            RawMapping::regex(r"^/fallback$").status(500),
            RawMapping::regex(r"^/(.*)")
                .file("public/$1")
                .ignore_if_not_found(),
            RawMapping::any().custom_handler(from_fn(move |ctx, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(CustomOutcome::text(format!("fallback for {}", ctx.url)))
            })),
        ],
    );
    let mut events = mock.dispatcher().subscribe();

    let found = mock.get("/exists.txt").send().await.unwrap();
    assert_eq!(found.text(), "static");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let missing = mock.get("/missing.txt").send().await.unwrap();
    assert_eq!(missing.status, StatusCode::OK);
    assert_eq!(missing.text(), "fallback for /missing.txt");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The miss continues below the file rule without an error event
    assert_eq!(
        drain(&mut events),
        vec!["incoming", "redirected", "incoming", "redirecting", "redirected"]
    );
}

#[tokio::test]
async fn not_found_without_ignore_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mock = mock(
        dir.path(),
        vec![
            RawMapping::regex(r"^/(.*)").file("$1"),
            RawMapping::any().status(200),
        ],
    );
    let mut events = mock.dispatcher().subscribe();

    let response = mock.get("/nothing-here").send().await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json().unwrap()["code"], 2003);
    assert_eq!(drain(&mut events), vec!["incoming", "error", "redirected"]);
}

#[tokio::test]
async fn redirect_emits_redirecting_with_kind() {
    let dir = tempfile::tempdir().unwrap();
    let mock = mock(
        dir.path(),
        vec![
            RawMapping::regex(r"^/new$").status(204),
            RawMapping::regex(r"^/old$").custom_handler(from_fn(|_, _| Ok(CustomOutcome::redirect("/new")))),
        ],
    );
    let mut events = mock.dispatcher().subscribe();

    let response = mock.get("/old").send().await.unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 3);
    match seen[1].as_ref() {
        Event::Redirecting {
            url, kind, redirect, ..
        } => {
            assert_eq!(url, "/old");
            assert_eq!(*kind, "custom");
            assert_eq!(redirect, "/new");
        }
        other => panic!("unexpected {other:?}"),
    }
    match seen[2].as_ref() {
        Event::Redirected { status_code, .. } => assert_eq!(*status_code, 204),
        other => panic!("unexpected {other:?}"),
    }
    assert!(seen.iter().all(|event| event.id() == seen[0].id()));
}

#[tokio::test]
async fn handler_errors_are_500_and_redacted() {
    let dir = tempfile::tempdir().unwrap();
    let raw_id = Arc::new(AtomicU64::new(0));
    let seen = raw_id.clone();
    let mock = mock(
        dir.path(),
        vec![RawMapping::any().custom_handler(from_fn(move |ctx, _| {
            seen.store(ctx.id.as_u64(), Ordering::SeqCst);
            Err(format!("request {} exploded", ctx.id.as_u64()).into())
        }))],
    );
    let response = mock.get("/").send().await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json().unwrap();
    assert_eq!(body["code"], 2007);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("exploded"));
    let raw = raw_id.load(Ordering::SeqCst);
    assert!(!message.contains(&raw.to_string()));
    assert!(!message.contains(&format!("{raw:x}")));
}

#[tokio::test]
async fn modification_time_round_trips_through_http_dates() {
    let whole = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let formatted = format_http_date(whole);
    assert_eq!(veer::http_date::parse_http_date(&formatted), Some(whole));
}
