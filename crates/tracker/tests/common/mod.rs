#![allow(dead_code)]

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracker::{AnalysisClient, AnalysisError, AnalysisResult, AnnotatedImage, EncodedFrame, ImageFormat};

pub const WAIT: Duration = Duration::from_secs(5);

/// One submitted request, answered by the test.
pub struct Call {
    pub frame: EncodedFrame,
    reply: oneshot::Sender<Result<AnalysisResult, AnalysisError>>,
}

impl Call {
    /// Succeeds with the submitted image as the annotated one.
    pub fn succeed(self, persons: u32, rate: Option<f64>) {
        let result = AnalysisResult {
            annotated: AnnotatedImage::new(self.frame.bytes.clone(), ImageFormat::Jpeg),
            person_count: persons,
            server_rate: rate,
        };
        let _ = self.reply.send(Ok(result));
    }

    pub fn fail(self, error: AnalysisError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Analysis client whose requests stay outstanding until the test answers.
pub struct GatedClient {
    calls: mpsc::UnboundedSender<Call>,
}

impl GatedClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Call>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Self { calls }, rx)
    }
}

#[async_trait]
impl AnalysisClient for GatedClient {
    async fn submit(&self, frame: EncodedFrame) -> Result<AnalysisResult, AnalysisError> {
        let (reply, answer) = oneshot::channel();
        if self.calls.send(Call { frame, reply }).is_err() {
            return Err(AnalysisError::Network("test harness gone".to_string()));
        }
        answer
            .await
            .unwrap_or_else(|_| Err(AnalysisError::Network("request abandoned".to_string())))
    }
}

pub async fn next_call(calls: &mut mpsc::UnboundedReceiver<Call>) -> Call {
    tokio::time::timeout(WAIT, calls.recv())
        .await
        .expect("timed out waiting for an analysis request")
        .expect("client dropped")
}

pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn eventually_async<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT;
    while !condition().await {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
