// End-to-end failover against a mocked image provider.
// The first credential is rate limited on submit; the second completes after two polls.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use propabot_core::{DeliveryError, DeliveryTarget};
use propabot_generation::{ContentPipeline, JobPoller, PassThrough, PosterRequest};

#[derive(Default)]
struct ChannelSpy {
    uploads: Mutex<Vec<(PathBuf, Vec<u8>, String)>>,
}

#[async_trait]
impl DeliveryTarget for ChannelSpy {
    fn describe(&self) -> String {
        "channel:spy".into()
    }

    async fn send(&self, _content: &str) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn send_file(&self, path: &Path, _filename: &str, caption: &str) -> Result<(), DeliveryError> {
        let bytes = std::fs::read(path)?;
        self.uploads
            .lock()
            .unwrap()
            .push((path.to_path_buf(), bytes, caption.to_string()));
        Ok(())
    }
}

async fn mount_provider(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"id": "job-42", "urls": {"get": format!("{}/result/job-42", server.uri())}}
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/result/job-42"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"status": "processing", "outputs": []}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/result/job-42"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"status": "completed", "outputs": [format!("{}/files/poster.png", server.uri())]}
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/poster.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG\r\n\x1a\nposter".to_vec()))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn rate_limited_credential_fails_over_to_next() {
    let server = MockServer::start().await;
    mount_provider(&server).await;

    let artifacts = tempfile::tempdir().unwrap();
    let poller = JobPoller::new(format!("{}/submit", server.uri()))
        .with_polling(5, Duration::from_millis(10))
        .with_artifact_dir(artifacts.path());
    let pipeline = ContentPipeline::new(Arc::new(PassThrough), Arc::new(poller))
        .with_round_backoff(Duration::ZERO);

    let request = PosterRequest {
        text_prompt: "Report for duty".into(),
        image_style: "soviet propaganda poster style".into(),
        image_theme: "motivational".into(),
        caption: "A True Malborian Culture Piece:".into(),
        credentials: vec!["token-1".into(), "token-2".into()],
        max_retries: 3,
    };

    let target = ChannelSpy::default();
    let outcome = pipeline.generate_and_deliver(&request, &target).await.unwrap();

    assert_eq!(outcome.credential_index, 1);
    assert_eq!(outcome.attempts, 2);

    let uploads = target.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let (staged, bytes, caption) = &uploads[0];
    assert!(bytes.ends_with(b"poster"));
    assert_eq!(caption, "**A True Malborian Culture Piece:**");
    assert!(!staged.exists(), "artifact should be removed after delivery");
    assert_eq!(std::fs::read_dir(artifacts.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn empty_credential_list_never_touches_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let poller = JobPoller::new(format!("{}/submit", server.uri()));
    let pipeline = ContentPipeline::new(Arc::new(PassThrough), Arc::new(poller));
    let request = PosterRequest {
        text_prompt: "x".into(),
        image_style: "s".into(),
        image_theme: "t".into(),
        caption: "c".into(),
        credentials: vec![],
        max_retries: 3,
    };

    let target = ChannelSpy::default();
    let err = pipeline.generate_and_deliver(&request, &target).await.unwrap_err();
    assert!(err.to_string().contains("no credentials configured"));
    assert!(target.uploads.lock().unwrap().is_empty());
}
