use crate::cache::StoreOutcome;
use crate::client::{AnalysisClient, AnalysisError};
use crate::encoder::FrameEncoder;
use crate::session::{InFlightPermit, Session};
use crate::status::{self, DisplayMetrics, StatusSink, StatusToken};
use capture::{Frame, LiveSource};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{self, MissedTickBehavior};
use tracing::Instrument;

/// Instruments recorded by every analysis request.
#[derive(Clone)]
pub struct DispatchMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    failures: Counter<u64>,
    discarded: Counter<u64>,
}

impl DispatchMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.01, 0.02, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
        ];
        Self {
            duration: meter
                .f64_histogram("analysis_request_duration_seconds")
                .with_description("Time from submission to completion of one analysis request")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            requests: meter
                .u64_counter("analysis_requests_total")
                .with_description("Total analysis requests issued")
                .build(),
            failures: meter
                .u64_counter("analysis_failures_total")
                .with_description("Analysis requests that produced no result")
                .build(),
            discarded: meter
                .u64_counter("analysis_results_discarded_total")
                .with_description("Successful results not accepted into the cache")
                .build(),
        }
    }

    fn failure(&self, kind: &'static str) {
        self.failures.add(1, &[KeyValue::new("kind", kind)]);
    }

    fn discard(&self, reason: &'static str) {
        self.discarded.add(1, &[KeyValue::new("reason", reason)]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTick {
    /// The session has stopped; the loop should exit.
    Inactive,
    /// The in-flight bound is reached; nothing was submitted.
    Saturated,
    Submitted { sequence: u64 },
}

/// Producer side of the pipeline: turns the freshest capture frame into an
/// analysis request whenever the in-flight bound allows it.
pub struct Dispatcher {
    session: Arc<Session>,
    source: Arc<dyn LiveSource>,
    client: Arc<dyn AnalysisClient>,
    encoder: FrameEncoder,
    status: Arc<dyn StatusSink>,
    metrics: DispatchMetrics,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Session>,
        source: Arc<dyn LiveSource>,
        client: Arc<dyn AnalysisClient>,
        encoder: FrameEncoder,
        status: Arc<dyn StatusSink>,
        metrics: DispatchMetrics,
    ) -> Self {
        Self {
            session,
            source,
            client,
            encoder,
            status,
            metrics,
        }
    }

    /// Must be called from within a tokio runtime; the request runs as a
    /// spawned task and completes even if the session stops meanwhile.
    pub fn tick(&self) -> DispatchTick {
        if !self.session.is_active() {
            return DispatchTick::Inactive;
        }

        let Some(permit) = self.session.try_reserve() else {
            return DispatchTick::Saturated;
        };
        let sequence = permit.sequence();
        let frame = self.source.current_frame();

        let request = Request {
            permit,
            frame,
            encoder: self.encoder,
            client: Arc::clone(&self.client),
            status: Arc::clone(&self.status),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(
            request
                .run()
                .instrument(tracing::info_span!("analysis_request", sequence)),
        );

        DispatchTick::Submitted { sequence }
    }

    pub async fn run(self, period: Duration) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(bound = self.session.bound(), "Dispatch loop started");
        loop {
            interval.tick().await;
            match self.tick() {
                DispatchTick::Inactive => break,
                DispatchTick::Submitted { sequence } if sequence.is_multiple_of(30) => {
                    tracing::debug!(sequence, "Analysis requests issued");
                }
                _ => {}
            }
        }
        tracing::debug!(issued = self.session.issued(), "Dispatch loop finished");
    }
}

struct Request {
    permit: InFlightPermit,
    frame: Frame,
    encoder: FrameEncoder,
    client: Arc<dyn AnalysisClient>,
    status: Arc<dyn StatusSink>,
    metrics: DispatchMetrics,
}

impl Request {
    /// The permit is released when this returns, on every path.
    async fn run(self) {
        let Request {
            permit,
            frame,
            encoder,
            client,
            status: sink,
            metrics,
        } = self;
        let sequence = permit.sequence();
        let session = Arc::clone(permit.session());
        let start = Instant::now();
        metrics.requests.add(1, &[]);

        let encoded = match tokio::task::spawn_blocking(move || encoder.encode(&frame)).await {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Frame encoding failed");
                metrics.failure("encode");
                session.cache().while_open(|| {
                    sink.on_status(StatusToken::Error, Some(status::PROCESSING_ERROR))
                });
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Encoding task failed");
                metrics.failure("encode");
                return;
            }
        };

        let outcome = client.submit(encoded).await;
        metrics
            .duration
            .record(start.elapsed().as_secs_f64(), &[]);

        match outcome {
            Ok(result) => {
                let persons = result.person_count;
                let stored = session.cache().store_and(sequence, result, |stored| {
                    let token = if persons > 0 {
                        StatusToken::Detecting
                    } else {
                        StatusToken::Active
                    };
                    sink.on_status(token, None);
                    sink.on_metrics(&DisplayMetrics {
                        fps: stored.server_rate.filter(|rate| *rate > 0.0),
                        person_count: Some(persons),
                    });
                });

                match stored {
                    StoreOutcome::Stored => {
                        tracing::trace!(persons, "Analysis result stored");
                    }
                    StoreOutcome::Stale { held } => {
                        tracing::debug!(held, "Discarding result older than cached one");
                        metrics.discard("stale");
                    }
                    StoreOutcome::Closed => {
                        tracing::debug!("Discarding result completed after stop");
                        metrics.discard("stopped");
                    }
                }
            }
            Err(e) => {
                metrics.failure(e.kind());
                let (token, message) = match &e {
                    AnalysisError::Network(_) => (StatusToken::Offline, status::CONNECTION_ERROR),
                    AnalysisError::Service { .. } | AnalysisError::Malformed(_) => {
                        (StatusToken::Error, status::PROCESSING_ERROR)
                    }
                };

                let reported = session
                    .cache()
                    .while_open(|| sink.on_status(token, Some(message)));
                if reported {
                    tracing::warn!(error = %e, kind = e.kind(), "Analysis request failed");
                } else {
                    tracing::debug!(error = %e, "Analysis request failed after stop");
                }
            }
        }
    }
}
