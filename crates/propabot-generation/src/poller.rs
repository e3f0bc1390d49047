//! Submit → poll → download driver for asynchronous image-generation APIs.
//!
//! Wire format (WaveSpeed-style):
//!
//! | Step     | Request                               | Response                                        |
//! |----------|---------------------------------------|-------------------------------------------------|
//! | submit   | `POST submit_url` + bearer, JSON body | `{"data": {"id", "urls": {"get": poll_url}}}`   |
//! | poll     | `GET poll_url` + bearer               | `{"data": {"status", "outputs": [url], "error"}}` |
//! | download | `GET output_url`                      | raw image bytes                                 |

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use propabot_core::config::ImageSettings;

use crate::artifact::PosterArtifact;
use crate::error::JobError;
use crate::job::{ArtifactRef, GenerationJob, JobHandle};

/// Produces one poster image using exactly one credential.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, credential: &str) -> Result<PosterArtifact, JobError>;
}

pub struct JobPoller {
    client: reqwest::Client,
    submit_url: String,
    size: String,
    safety_checker: bool,
    max_attempts: u32,
    poll_interval: Duration,
    artifact_dir: PathBuf,
}

impl JobPoller {
    pub fn new(submit_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            submit_url: submit_url.into(),
            size: "768*1152".to_string(),
            safety_checker: true,
            max_attempts: 30,
            poll_interval: Duration::from_secs(2),
            artifact_dir: std::env::temp_dir(),
        }
    }

    pub fn from_settings(settings: &ImageSettings, artifact_dir: Option<&str>) -> Self {
        let mut poller = Self::new(settings.submit_url.clone())
            .with_polling(
                settings.max_poll_attempts,
                Duration::from_secs(settings.poll_interval_secs),
            )
            .with_size(settings.size.clone());
        poller.safety_checker = settings.safety_checker;
        if let Some(dir) = artifact_dir {
            poller = poller.with_artifact_dir(dir);
        }
        poller
    }

    pub fn with_polling(mut self, max_attempts: u32, poll_interval: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Create the provider job.
    pub async fn submit(&self, prompt: &str, credential: &str) -> Result<JobHandle, JobError> {
        let body = json!({
            "prompt": prompt,
            "size": self.size,
            "seed": -1,
            "enable_safety_checker": self.safety_checker,
            "enable_base64_output": false,
        });

        debug!(url = %self.submit_url, "submitting image job");
        let resp = self
            .client
            .post(&self.submit_url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(JobError::Submission {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| JobError::Parse(e.to_string()))?;
        Ok(JobHandle {
            id: parsed.data.id,
            poll_url: parsed.data.urls.get,
        })
    }

    /// Poll until the job reaches a terminal state or `max_attempts` polls were made.
    ///
    /// Returns on the first `completed`. A non-2xx poll aborts immediately.
    /// Sleeps `poll_interval` between polls but not after the last one.
    pub async fn await_completion(
        &self,
        job: &mut GenerationJob,
        credential: &str,
        max_attempts: u32,
        poll_interval: Duration,
    ) -> Result<ArtifactRef, JobError> {
        let max_attempts = max_attempts.max(1);
        job.start_polling();

        for attempt in 1..=max_attempts {
            let resp = self
                .client
                .get(&job.handle.poll_url)
                .bearer_auth(credential)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                job.fail(format!("poll returned {status}"));
                return Err(JobError::PollTransport {
                    status: status.as_u16(),
                    body,
                });
            }

            let poll: PollResponse = resp
                .json()
                .await
                .map_err(|e| JobError::Parse(e.to_string()))?;

            match poll.data.status.as_str() {
                "completed" => {
                    let Some(url) = poll.data.outputs.into_iter().next() else {
                        job.fail("completed without outputs");
                        return Err(JobError::JobFailed {
                            reason: "provider reported completion without outputs".into(),
                        });
                    };
                    let output = ArtifactRef(url);
                    job.complete(output.clone());
                    debug!(job_id = %job.handle.id, attempt, "image job completed");
                    return Ok(output);
                }
                "failed" => {
                    let reason = poll
                        .data
                        .error
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| "Unknown error".to_string());
                    job.fail(reason.clone());
                    return Err(JobError::JobFailed { reason });
                }
                other => {
                    debug!(job_id = %job.handle.id, attempt, status = %other, "image job pending");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(poll_interval).await;
            }
        }

        job.time_out();
        warn!(job_id = %job.handle.id, attempts = max_attempts, "image job timed out");
        Err(JobError::JobTimedOut {
            attempts: max_attempts,
        })
    }

    /// Fetch the finished image and stage it on disk.
    pub async fn download(&self, output: &ArtifactRef) -> Result<PosterArtifact, JobError> {
        let resp = self.client.get(output.url()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(JobError::Download {
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await?;
        Ok(PosterArtifact::write(&self.artifact_dir, bytes.to_vec()).await?)
    }
}

#[async_trait]
impl ImageGenerator for JobPoller {
    async fn generate(&self, prompt: &str, credential: &str) -> Result<PosterArtifact, JobError> {
        let handle = self.submit(prompt, credential).await?;
        info!(job_id = %handle.id, "image job submitted");

        let mut job = GenerationJob::submitted(prompt, handle);
        let output = self
            .await_completion(&mut job, credential, self.max_attempts, self.poll_interval)
            .await?;
        self.download(&output).await
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    data: SubmitData,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    id: String,
    urls: SubmitUrls,
}

#[derive(Debug, Deserialize)]
struct SubmitUrls {
    get: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    data: PollData,
}

#[derive(Debug, Deserialize)]
struct PollData {
    status: String,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poll_body(status: &str, outputs: &[&str]) -> serde_json::Value {
        serde_json::json!({"data": {"status": status, "outputs": outputs, "error": ""}})
    }

    fn pending_job(server: &MockServer) -> GenerationJob {
        GenerationJob::submitted(
            "UNITE",
            JobHandle {
                id: "job-1".into(),
                poll_url: format!("{}/result/job-1", server.uri()),
            },
        )
    }

    fn poller(server: &MockServer) -> JobPoller {
        JobPoller::new(format!("{}/submit", server.uri()))
    }

    #[tokio::test]
    async fn submit_parses_job_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": "abc", "urls": {"get": "http://poll/abc"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let handle = poller(&server).submit("UNITE", "tok").await.unwrap();
        assert_eq!(handle.id, "abc");
        assert_eq!(handle.poll_url, "http://poll/abc");
    }

    #[tokio::test]
    async fn submit_non_success_is_submission_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = poller(&server).submit("UNITE", "tok").await.unwrap_err();
        match err {
            JobError::Submission { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn returns_on_first_completed_poll() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/result/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(poll_body(
                "completed",
                &["http://cdn/out.png"],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = pending_job(&server);
        let out = poller(&server)
            .await_completion(&mut job, "tok", 5, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(out.url(), "http://cdn/out.png");
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn provider_failure_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/result/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"status": "failed", "outputs": [], "error": "nsfw content"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = pending_job(&server);
        let err = poller(&server)
            .await_completion(&mut job, "tok", 5, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::JobFailed { ref reason } if reason == "nsfw content"));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn single_attempt_times_out_after_one_poll() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/result/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(poll_body("processing", &[])))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = pending_job(&server);
        let err = poller(&server)
            .await_completion(&mut job, "tok", 1, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::JobTimedOut { attempts: 1 }));
        assert_eq!(job.status(), JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn times_out_after_exactly_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/result/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(poll_body("processing", &[])))
            .expect(3)
            .mount(&server)
            .await;

        let mut job = pending_job(&server);
        let err = poller(&server)
            .await_completion(&mut job, "tok", 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::JobTimedOut { attempts: 3 }));
    }

    #[tokio::test]
    async fn transport_error_aborts_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/result/job-1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = pending_job(&server);
        let err = poller(&server)
            .await_completion(&mut job, "tok", 10, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::PollTransport { status: 502, .. }));
    }

    #[tokio::test]
    async fn download_stages_artifact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let poller = poller(&server).with_artifact_dir(dir.path());
        let artifact = poller
            .download(&ArtifactRef(format!("{}/out.png", server.uri())))
            .await
            .unwrap();
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"\x89PNG-bytes");
        artifact.release().await;
    }

    #[tokio::test]
    async fn download_non_success_is_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = poller(&server)
            .download(&ArtifactRef(format!("{}/gone.png", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Download { status: 404 }));
    }
}
