//! File handler: serves local content with optional conditional GET.

use super::Outcome;
use crate::body;
use crate::config::{CachingStrategy, FileTarget};
use crate::dispatch::RequestContext;
use crate::errors::Error;
use crate::fs::{FileMeta, FileSystem};
use crate::http_date::{format_http_date, parse_http_date, truncate_to_seconds};
use crate::normalize::{normalize, to_file_path};
use crate::response::ResponseBuilder;
use crate::template::interpolate;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use hyper::{Method, Response, StatusCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const INDEX_FILE: &str = "index.html";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub async fn serve(
    ctx: &RequestContext,
    captures: &[String],
    target: &FileTarget,
    cwd: &Path,
    fs: &dyn FileSystem,
) -> Outcome {
    let interpolated = interpolate(&target.template, captures, &ctx.template_data());
    let relative = interpolated
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let normalized = match normalize(relative) {
        Ok(normalized) => normalized,
        Err(e) => return Outcome::Failed(e),
    };
    let path = cwd.join(to_file_path(&normalized));

    let (path, meta) = match resolve(fs, path).await {
        Some(found) => found,
        None => {
            return Outcome::Failed(Error::FileNotFound {
                path: normalized,
            })
        }
    };
    debug!(path = %path.display(), size = meta.len, "Serving file");

    let mut builder = ResponseBuilder::new(StatusCode::OK)
        .header(
            CONTENT_TYPE.as_str(),
            content_type(&path, &target.mime_types),
        )
        .header(CONTENT_LENGTH.as_str(), &meta.len.to_string());

    if target.caching == Some(CachingStrategy::Modified) {
        let last_modified = format_http_date(meta.modified);
        let unchanged = ctx
            .header(IF_MODIFIED_SINCE.as_str())
            .and_then(parse_http_date)
            .is_some_and(|since| since == truncate_to_seconds(meta.modified));
        if unchanged {
            return Outcome::Completed(
                ResponseBuilder::new(StatusCode::NOT_MODIFIED)
                    .header(LAST_MODIFIED.as_str(), &last_modified)
                    .build(),
            );
        }
        builder = builder.header(LAST_MODIFIED.as_str(), &last_modified);
    }

    if ctx.method == Method::HEAD {
        return Outcome::Completed(builder.build());
    }

    let reader = match fs.open(&path).await {
        Ok(reader) => reader,
        Err(e) => {
            debug!(path = %path.display(), "Open failed after stat: {}", e);
            return Outcome::Failed(Error::FileNotFound { path: normalized });
        }
    };

    let (parts, _) = builder.build().into_parts();
    Outcome::Completed(Response::from_parts(parts, body::from_reader(reader)))
}

/// Stat the target; directories resolve to their index file.
async fn resolve(fs: &dyn FileSystem, path: PathBuf) -> Option<(PathBuf, FileMeta)> {
    let meta = fs.stat(&path).await.ok().flatten()?;
    if !meta.is_dir {
        return Some((path, meta));
    }
    let index = path.join(INDEX_FILE);
    match fs.stat(&index).await.ok().flatten() {
        Some(meta) if !meta.is_dir => Some((index, meta)),
        _ => None,
    }
}

pub fn content_type<'a>(path: &Path, overrides: &'a HashMap<String, String>) -> &'a str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if let Some(custom) = overrides.get(&extension) {
        return custom;
    }
    builtin_content_type(&extension)
}

fn builtin_content_type(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "xml" => "application/xml",
        "txt" | "log" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::http_date::format_http_date;
    use http_body_util::BodyExt;
    use hyper::HeaderMap;

    fn target(template: &str, caching: Option<CachingStrategy>) -> FileTarget {
        FileTarget {
            template: template.to_string(),
            caching,
            mime_types: HashMap::new(),
        }
    }

    fn request(method: Method, url: &str, headers: HeaderMap) -> RequestContext {
        RequestContext::new(method, url, headers, body::empty())
    }

    fn completed(outcome: Outcome) -> crate::response::DispatchResponse {
        match outcome {
            Outcome::Completed(response) => response,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs").join("index.html"), "<h1>docs</h1>").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_serves_file_with_headers() {
        let dir = fixture();
        let ctx = request(Method::GET, "/hello.txt", HeaderMap::new());
        let outcome = serve(
            &ctx,
            &["hello.txt".to_string()],
            &target("$1", None),
            dir.path(),
            &LocalFileSystem,
        )
        .await;
        let response = completed(outcome);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "11");
        assert!(response.headers().get(LAST_MODIFIED).is_none());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[tokio::test]
    async fn test_traversal_stays_inside_cwd() {
        let dir = fixture();
        let ctx = request(Method::GET, "/", HeaderMap::new());
        let outcome = serve(
            &ctx,
            &["../../hello.txt".to_string()],
            &target("$1", None),
            dir.path(),
            &LocalFileSystem,
        )
        .await;
        assert_eq!(completed(outcome).status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_file_fails_not_found() {
        let dir = fixture();
        let ctx = request(Method::GET, "/nope", HeaderMap::new());
        let outcome = serve(
            &ctx,
            &["nope.txt".to_string()],
            &target("$1", None),
            dir.path(),
            &LocalFileSystem,
        )
        .await;
        match outcome {
            Outcome::Failed(error) => assert!(error.is_not_found()),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_target_is_bad_request() {
        let dir = fixture();
        let ctx = request(Method::GET, "/", HeaderMap::new());
        let outcome = serve(
            &ctx,
            &["bad%zzname".to_string()],
            &target("$1", None),
            dir.path(),
            &LocalFileSystem,
        )
        .await;
        match outcome {
            Outcome::Failed(error) => assert_eq!(error.status(), StatusCode::BAD_REQUEST),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let dir = fixture();
        let ctx = request(Method::GET, "/docs/", HeaderMap::new());
        let response = completed(
            serve(
                &ctx,
                &["docs/".to_string()],
                &target("$1", None),
                dir.path(),
                &LocalFileSystem,
            )
            .await,
        );
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );

        let outcome = serve(
            &ctx,
            &["empty".to_string()],
            &target("$1", None),
            dir.path(),
            &LocalFileSystem,
        )
        .await;
        assert!(matches!(outcome, Outcome::Failed(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_conditional_get() {
        let dir = fixture();
        let modified = std::fs::metadata(dir.path().join("hello.txt"))
            .unwrap()
            .modified()
            .unwrap();
        let caching = target("hello.txt", Some(CachingStrategy::Modified));

        let first = completed(
            serve(
                &request(Method::GET, "/", HeaderMap::new()),
                &[],
                &caching,
                dir.path(),
                &LocalFileSystem,
            )
            .await,
        );
        let last_modified = first.headers().get(LAST_MODIFIED).unwrap().clone();
        assert_eq!(last_modified.to_str().unwrap(), format_http_date(modified));

        let mut headers = HeaderMap::new();
        headers.insert(IF_MODIFIED_SINCE, last_modified);
        let second = completed(
            serve(
                &request(Method::GET, "/", headers),
                &[],
                &caching,
                dir.path(),
                &LocalFileSystem,
            )
            .await,
        );
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        let body = second.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());

        let mut stale = HeaderMap::new();
        stale.insert(
            IF_MODIFIED_SINCE,
            "Sun, 06 Nov 1994 08:49:37 GMT".parse().unwrap(),
        );
        let third = completed(
            serve(
                &request(Method::GET, "/", stale),
                &[],
                &caching,
                dir.path(),
                &LocalFileSystem,
            )
            .await,
        );
        assert_eq!(third.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_head_has_headers_only() {
        let dir = fixture();
        let response = completed(
            serve(
                &request(Method::HEAD, "/", HeaderMap::new()),
                &[],
                &target("hello.txt", None),
                dir.path(),
                &LocalFileSystem,
            )
            .await,
        );
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "11");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[test]
    fn test_content_type_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("txt".to_string(), "text/x-custom".to_string());
        assert_eq!(content_type(Path::new("a.TXT"), &overrides), "text/x-custom");
        assert_eq!(content_type(Path::new("a.png"), &overrides), "image/png");
        assert_eq!(
            content_type(Path::new("noext"), &overrides),
            DEFAULT_CONTENT_TYPE
        );
    }
}
