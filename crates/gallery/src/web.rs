use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use config_model::{SharedConfig, TRASH_DIR_NAME};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

pub const API_KEY_HEADER: &str = "x-api-key";
const UPLOAD_FIELD: &str = "images";
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
struct GalleryState {
    root: Arc<PathBuf>,
    api_key: Option<Arc<str>>,
    title: Arc<str>,
}

pub async fn serve(config: SharedConfig) -> Result<()> {
    let addr = SocketAddr::new(
        config
            .gallery
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {:?}", config.gallery.bind_address))?,
        config.gallery.port,
    );
    if config.gallery.api_key.is_none() {
        info!("gallery.api-key unset; uploads are disabled");
    }
    let router = router(
        config.images.base_image_dir.clone(),
        config.gallery.api_key.clone(),
        config.general.name.clone(),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind gallery listener on {addr}"))?;
    info!(?addr, root = %config.images.base_image_dir.display(), "gallery listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gallery server exited")?;
    Ok(())
}

pub fn router(root: PathBuf, api_key: Option<String>, title: String) -> Router {
    let state = GalleryState {
        root: Arc::new(root),
        api_key: api_key.map(Arc::from),
        title: Arc::from(title),
    };
    Router::new()
        .route("/", get(list_sessions))
        .route("/images/{session}", get(show_session).post(upload_images))
        .route("/images/{session}/{file}", get(serve_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            term.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn list_sessions(State(state): State<GalleryState>) -> Response {
    let sessions = match session_names(&state.root).await {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(error = %err, root = %state.root.display(), "failed to list sessions");
            Vec::new()
        }
    };
    let items: String = sessions
        .iter()
        .map(|name| {
            let name = escape_html(name);
            format!("<li><a href='/images/{name}'>{name}</a></li>")
        })
        .collect();
    let body = if items.is_empty() {
        "<p>No sessions yet.</p>".to_string()
    } else {
        format!("<ul class='sessions'>{items}</ul>")
    };
    Html(page(&state.title, &body)).into_response()
}

async fn show_session(
    State(state): State<GalleryState>,
    UrlPath(session): UrlPath<String>,
) -> Response {
    let Some(dir) = session_dir(&state.root, &session) else {
        return not_found();
    };
    let files = match image_names(&dir).await {
        Ok(files) => files,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return not_found(),
        Err(err) => {
            warn!(error = %err, %session, "failed to read session");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to read session").into_response();
        }
    };
    let session_html = escape_html(&session);
    let figures: String = files
        .iter()
        .map(|file| {
            let file = escape_html(file);
            format!(
                "<figure><a href='/images/{session_html}/{file}'><img src='/images/{session_html}/{file}' alt='{file}' loading='lazy'></a></figure>"
            )
        })
        .collect();
    let body = format!(
        "<h2>{session_html}</h2><div class='grid'>{figures}</div><p class='back'><a href='/'>All sessions</a></p>"
    );
    Html(page(&state.title, &body)).into_response()
}

async fn serve_file(
    State(state): State<GalleryState>,
    UrlPath((session, file)): UrlPath<(String, String)>,
) -> Response {
    let Some(dir) = session_dir(&state.root, &session) else {
        return not_found();
    };
    let Some(file) = safe_component(&file) else {
        return not_found();
    };
    let Some(content_type) = image_content_type(Path::new(file)) else {
        return not_found();
    };
    match tokio::fs::read(dir.join(file)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(err) => {
            debug!(error = %err, %session, file, "file not served");
            not_found()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct UploadReport {
    message: String,
    saved_files: Vec<String>,
    skipped_files: Vec<String>,
}

/// Compare in constant time so response timing does not leak the key.
fn api_key_matches(expected: &str, given: &[u8]) -> bool {
    expected.as_bytes().ct_eq(given).into()
}

async fn upload_images(
    State(state): State<GalleryState>,
    UrlPath(session): UrlPath<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let authorized = match (&state.api_key, headers.get(API_KEY_HEADER)) {
        (Some(expected), Some(given)) => api_key_matches(expected, given.as_bytes()),
        _ => false,
    };
    if !authorized {
        warn!(%session, "upload rejected: missing or wrong api key");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    let Some(dir) = session_dir(&state.root, &session) else {
        return not_found();
    };

    let mut parts = 0usize;
    let mut dir_ready = false;
    let mut report = UploadReport {
        message: String::new(),
        saved_files: Vec::new(),
        skipped_files: Vec::new(),
    };
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, %session, "malformed upload");
                return (StatusCode::BAD_REQUEST, "malformed multipart body").into_response();
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        parts += 1;
        let original = field.file_name().unwrap_or_default().to_string();
        let Some(name) = sanitize_file_name(&original) else {
            report.skipped_files.push(original);
            continue;
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, %session, "upload interrupted");
                return (StatusCode::BAD_REQUEST, "malformed multipart body").into_response();
            }
        };
        if !dir_ready {
            if let Err(err) = tokio::fs::create_dir_all(&dir).await {
                warn!(error = %err, dir = %dir.display(), "failed to create session folder");
                return (StatusCode::INTERNAL_SERVER_ERROR, "failed to store upload")
                    .into_response();
            }
            dir_ready = true;
        }
        match write_new(&dir.join(&name), &bytes).await {
            Ok(()) => report.saved_files.push(name),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                report.skipped_files.push(name)
            }
            Err(err) => {
                warn!(error = %err, file = %name, "failed to store uploaded file");
                report.skipped_files.push(name);
            }
        }
    }

    if parts == 0 {
        return (StatusCode::BAD_REQUEST, "no images in request").into_response();
    }
    info!(
        %session,
        saved = report.saved_files.len(),
        skipped = report.skipped_files.len(),
        "upload stored"
    );
    report.message = format!(
        "{} file(s) saved to {}",
        report.saved_files.len(),
        session
    );
    (StatusCode::CREATED, Json(report)).into_response()
}

/// Create `path` and write `bytes`; an existing file is never replaced.
async fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

async fn session_names(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == TRASH_DIR_NAME || name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

async fn image_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if image_content_type(&path).is_none() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn session_dir(root: &Path, session: &str) -> Option<PathBuf> {
    let session = safe_component(session)?;
    if session == TRASH_DIR_NAME {
        return None;
    }
    Some(root.join(session))
}

/// A single path component: no separators, no `.`/`..`, not hidden.
fn safe_component(name: &str) -> Option<&str> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    valid.then_some(name)
}

/// Reduce an uploaded name to a plain image file name, or `None` when nothing
/// usable is left.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() || image_content_type(Path::new(&cleaned)).is_none() {
        return None;
    }
    Some(cleaned)
}

fn image_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html lang='en'><head><meta charset='utf-8'><meta name='viewport' content='width=device-width,initial-scale=1'><title>{title}</title><style>{}</style></head><body><main><h1>{title}</h1>{body}</main></body></html>",
        styles(),
        title = escape_html(title),
    )
}

fn styles() -> &'static str {
    "body{font-family:system-ui,sans-serif;margin:0;background:#111;color:#f5f5f5;}main{max-width:1100px;margin:0 auto;padding:2rem 1rem;}a{color:#7cc4ff;text-decoration:none;}ul.sessions{list-style:none;padding:0;display:flex;flex-wrap:wrap;gap:.75rem;}ul.sessions li a{display:block;padding:.6rem 1rem;background:#222;border-radius:10px;}div.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(240px,1fr));gap:1rem;}figure{margin:0;}figure img{width:100%;border-radius:10px;display:block;}p.back{margin-top:2rem;}"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    const BOUNDARY: &str = "gallery-test-boundary";

    fn app(tmp: &TempDir) -> Router {
        router(
            tmp.path().to_path_buf(),
            Some("secret".into()),
            "Test Booth".into(),
        )
    }

    fn multipart_body(parts: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, file_name, bytes) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(session: &str, key: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::post(format!("/images/{session}")).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body)).expect("request")
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn index_lists_sessions_but_not_trash() {
        let tmp = tempdir().expect("tempdir");
        for dir in ["0001", "0000", TRASH_DIR_NAME] {
            std::fs::create_dir(tmp.path().join(dir)).expect("mkdir");
        }
        let response = app(&tmp)
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        let first = html.find("0000").expect("0000 listed");
        let second = html.find("0001").expect("0001 listed");
        assert!(first < second);
        assert!(!html.contains(TRASH_DIR_NAME));
    }

    #[tokio::test]
    async fn session_page_shows_images_only() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("0001");
        std::fs::create_dir(&dir).expect("mkdir");
        std::fs::write(dir.join("Photobooth_1.jpg"), b"jpeg").expect("write");
        std::fs::write(dir.join("delivery_log.txt"), b"log").expect("write");

        let response = app(&tmp)
            .oneshot(Request::get("/images/0001").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("/images/0001/Photobooth_1.jpg"));
        assert!(!html.contains("delivery_log"));
    }

    #[tokio::test]
    async fn serves_image_with_content_type() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("0001");
        std::fs::create_dir(&dir).expect("mkdir");
        std::fs::write(dir.join("a.jpg"), b"jpeg-bytes").expect("write");
        std::fs::write(dir.join("delivery_log.txt"), b"log").expect("write");

        let response = app(&tmp)
            .oneshot(Request::get("/images/0001/a.jpg").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(body_text(response).await, "jpeg-bytes");

        let response = app(&tmp)
            .oneshot(
                Request::get("/images/0001/delivery_log.txt")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_is_not_found() {
        let tmp = tempdir().expect("tempdir");
        for uri in ["/images/..", "/images/%2E%2E/secret.jpg", "/images/Trash", "/images/.hidden"] {
            let response = app(&tmp)
                .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn upload_requires_api_key() {
        let tmp = tempdir().expect("tempdir");
        let body = multipart_body(&[("images", "a.jpg", "x")]);
        let response = app(&tmp)
            .oneshot(upload("0001", None, body.clone()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(&tmp)
            .oneshot(upload("0001", Some("wrong"), body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!tmp.path().join("0001").exists());
    }

    #[test]
    fn api_key_must_match_exactly() {
        assert!(api_key_matches("s3cret", b"s3cret"));
        assert!(!api_key_matches("s3cret", b"s3cre"));
        assert!(!api_key_matches("s3cret", b"s3cret!"));
        assert!(!api_key_matches("s3cret", b"S3cret"));
        assert!(!api_key_matches("s3cret", b""));
    }

    #[tokio::test]
    async fn upload_without_images_is_bad_request() {
        let tmp = tempdir().expect("tempdir");
        let body = multipart_body(&[("other", "a.jpg", "x")]);
        let response = app(&tmp)
            .oneshot(upload("0001", Some("secret"), body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_saves_new_files_and_never_overwrites() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("0001");
        std::fs::create_dir(&dir).expect("mkdir");
        std::fs::write(dir.join("existing.jpg"), b"original").expect("write");

        let body = multipart_body(&[
            ("images", "../../new photo.jpg", "new"),
            ("images", "existing.jpg", "replacement"),
            ("images", "notes.txt", "text"),
        ]);
        let response = app(&tmp)
            .oneshot(upload("0001", Some("secret"), body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let report: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(report["saved-files"], serde_json::json!(["new_photo.jpg"]));
        assert_eq!(
            report["skipped-files"],
            serde_json::json!(["existing.jpg", "notes.txt"])
        );
        assert_eq!(
            std::fs::read(dir.join("existing.jpg")).expect("read"),
            b"original"
        );
        assert_eq!(std::fs::read(dir.join("new_photo.jpg")).expect("read"), b"new");
    }

    #[test]
    fn sanitizer_keeps_plain_image_names() {
        assert_eq!(sanitize_file_name("IMG 01.JPG").as_deref(), Some("IMG_01.JPG"));
        assert_eq!(sanitize_file_name("C:\\x\\..\\a.png").as_deref(), Some("a.png"));
        assert_eq!(sanitize_file_name(".jpg"), None);
        assert_eq!(sanitize_file_name("script.sh"), None);
    }
}
