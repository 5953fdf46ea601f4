//! End-to-end: real listener, real client, Log Sink attached.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use jscp::config::LoggingConfig;
use jscp::http::HttpServer;
use jscp::logging::{LogSink, SinkConfig};
use jscp::site::{Site, SiteRegistry};

mod common;
use common::{TestSite, PORT};

#[tokio::test]
async fn test_serve_and_log_access() {
    let site = TestSite::new("main", "127.0.0.1")
        .file("index.jscp", "<? let n = 0; for x in [1, 2, 3] { n = n + x } ?>sum=<? print n ?>")
        .file("form.jscp", "<? print method() + ' ' + param('q') ?>")
        .file("upload.jscp", "<? print upload('doc').original_name + ' ' + upload('doc').size ?>")
        .with(|c| c.uploads.enabled = true);
    let log_dir = site.dir.path().join("logs");

    let logging = LoggingConfig {
        console: false,
        directory: Some(log_dir.clone()),
        ..Default::default()
    };
    let sink = LogSink::start(SinkConfig::from(&logging));

    let mut registry = SiteRegistry::new();
    registry.insert(Site::load(site.config.clone(), Some(&sink), &logging).unwrap());
    let server = HttpServer::new(registry, site.staging_dir(), None);
    let app = server.router(PORT).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let response = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "sum=6");

    let response = client
        .post(format!("http://{addr}/form"))
        .form(&[("q", "rust")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "POST rust");

    let response = client
        .post(format!("http://{addr}/form"))
        .json(&serde_json::json!({ "q": "json" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "POST json");

    let form = reqwest::multipart::Form::new().part(
        "doc",
        reqwest::multipart::Part::text("abcdef").file_name("notes.txt"),
    );
    let response = client
        .post(format!("http://{addr}/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "notes.txt 6");

    let response = client.delete(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(response.status(), 403);

    sink.flush().await;
    let current = sink.current_file(&log_dir).await.unwrap();
    let contents = std::fs::read_to_string(log_dir.join(current)).unwrap();
    assert!(contents.contains("INFO: GET 127.0.0.1"), "{contents}");
    assert!(contents.contains("POST 127.0.0.1"));
    assert!(contents.contains("/form 200"));
    assert!(contents.contains("DELETE 127.0.0.1"));

    sink.terminate().await;
}
