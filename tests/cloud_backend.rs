use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use photobooth::config::{NextcloudConfig, Secret};
use photobooth::delivery::cloud::NextcloudBackend;
use photobooth::delivery::share_to_cloud;
use photobooth::error::ErrorClass;
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    authorized: bool,
    body: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Ok,
    ShareRefused,
    Unauthorized,
}

#[derive(Clone)]
struct FakeNextcloud {
    mode: Mode,
    calls: Arc<Mutex<Vec<Recorded>>>,
}

async fn handle(
    State(fake): State<FakeNextcloud>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "));
    let path = uri.path().to_string();
    fake.calls.lock().push(Recorded {
        method: method.to_string(),
        path: path.clone(),
        authorized,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    match method.as_str() {
        // The configured root folder already exists.
        "MKCOL" if path.ends_with("/files/booth/Events") => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        "MKCOL" => StatusCode::CREATED.into_response(),
        "PUT" if fake.mode == Mode::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        "PUT" => StatusCode::CREATED.into_response(),
        "POST" if fake.mode == Mode::ShareRefused => (
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"ocs":{"meta":{"status":"failure","statuscode":404,"message":"Wrong path, file/folder doesn't exist"},"data":[]}}"#,
        )
            .into_response(),
        "POST" => (
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"ocs":{"meta":{"status":"ok","statuscode":200,"message":"OK"},"data":{"id":"12","share_type":3,"url":"https://cloud.example.com/s/AbCdEf"}}}"#,
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_fake(mode: Mode) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(handle).with_state(FakeNextcloud {
        mode,
        calls: calls.clone(),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/nextcloud"), calls)
}

fn backend(url: &str) -> NextcloudBackend {
    let cfg = NextcloudConfig {
        url: url.to_string(),
        username: "booth".into(),
        password: Secret::new("app-password"),
        folder: "Events".into(),
        ..NextcloudConfig::default()
    };
    NextcloudBackend::new(&cfg, "Photobooth").expect("backend")
}

fn session_with_images() -> (TempDir, PathBuf) {
    let tmp = tempdir().expect("tempdir");
    let session = tmp.path().join("0001");
    std::fs::create_dir(&session).expect("mkdir");
    std::fs::write(session.join("Photobooth_1.jpg"), b"one").expect("write");
    std::fs::write(session.join("Photobooth_2.jpg"), b"two").expect("write");
    std::fs::write(session.join("delivery_log.txt"), b"log").expect("write");
    (tmp, session)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uploads_session_and_returns_share_link() {
    let (url, calls) = spawn_fake(Mode::Ok).await;
    let (_tmp, session) = session_with_images();

    let share = share_to_cloud(&backend(&url), &session)
        .await
        .expect("upload")
        .expect("share link");
    assert_eq!(share.share_url, "https://cloud.example.com/s/AbCdEf");
    assert_eq!(share.qr_code_path, Some(session.join("qr_code.png")));
    assert!(session.join("qr_code.png").is_file());

    let calls = calls.lock().clone();
    assert!(calls.iter().all(|c| c.authorized));
    let summary: Vec<(String, String)> = calls
        .iter()
        .map(|c| (c.method.clone(), c.path.clone()))
        .collect();
    let dav = "/nextcloud/remote.php/dav/files/booth";
    assert_eq!(
        summary,
        vec![
            ("MKCOL".into(), format!("{dav}/Events")),
            ("MKCOL".into(), format!("{dav}/Events/Photobooth")),
            ("MKCOL".into(), format!("{dav}/Events/Photobooth/0001")),
            ("PUT".into(), format!("{dav}/Events/Photobooth/0001/Photobooth_1.jpg")),
            ("PUT".into(), format!("{dav}/Events/Photobooth/0001/Photobooth_2.jpg")),
            (
                "POST".into(),
                "/nextcloud/ocs/v2.php/apps/files_sharing/api/v1/shares".into()
            ),
        ]
    );
    assert_eq!(calls[3].body, "one");
    let form = &calls[5].body;
    assert!(form.contains("path=%2FEvents%2FPhotobooth%2F0001"), "{form}");
    assert!(form.contains("shareType=3"));
    assert!(form.contains("permissions=1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_share_is_no_result_not_an_error() {
    let (url, _calls) = spawn_fake(Mode::ShareRefused).await;
    let (_tmp, session) = session_with_images();

    let result = share_to_cloud(&backend(&url), &session)
        .await
        .expect("declined is not an error");
    assert_eq!(result, None);
    assert!(!session.join("qr_code.png").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_credentials_are_classified() {
    let (url, calls) = spawn_fake(Mode::Unauthorized).await;
    let (_tmp, session) = session_with_images();

    let err = share_to_cloud(&backend(&url), &session)
        .await
        .expect_err("upload must fail");
    assert_eq!(err.class, ErrorClass::Authentication);
    // No share is requested after a failed upload.
    assert!(calls.lock().iter().all(|c| c.method != "POST"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_server_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let (_tmp, session) = session_with_images();

    let err = share_to_cloud(&backend(&format!("http://{addr}")), &session)
        .await
        .expect_err("nothing listens there");
    assert_eq!(err.class, ErrorClass::Connection);
}
