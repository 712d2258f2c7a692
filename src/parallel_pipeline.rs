// THEORY:
// The batch analyzer runs many independent `analyze` requests at once. Each
// request is a pure computation over its own bytes; the only thing the workers
// share is the pipeline, whose model sits behind an `Arc` and is never written
// after startup. No locks are needed around it.
//
// A dispatcher hands tasks round-robin to a fixed set of workers. Every worker
// moves the CPU-heavy decode and feature work onto the blocking pool, so the
// async runtime stays responsive, and answers through a oneshot channel. The
// caller keeps the receivers in submission order, so results come back in
// input order no matter which request finishes first.

use crate::error::AnalysisError;
use crate::pipeline::{AnalysisRequest, AnalysisResult, NsbPipeline};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub type AnalysisOutcome = Result<AnalysisResult, AnalysisError>;

pub struct AnalysisTask {
    pub request: AnalysisRequest,
    pub result_sender: oneshot::Sender<AnalysisOutcome>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<AnalysisTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers. Must be called from within a tokio runtime.
    pub fn new(pipeline: NsbPipeline, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<AnalysisTask>();
        let mut workers = Vec::with_capacity(worker_count);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<AnalysisTask>())
            .unzip();

        // Spawn dispatcher
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        // Spawn workers
        for (worker_id, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let worker_pipeline = pipeline.clone();

            let worker = tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let pipeline = worker_pipeline.clone();
                    let request = task.request;
                    let outcome = tokio::task::spawn_blocking(move || pipeline.analyze_request(&request))
                        .await
                        .unwrap_or_else(|err| {
                            Err(AnalysisError::Internal(format!("worker {worker_id} failed: {err}")))
                        });

                    let _ = task.result_sender.send(outcome);
                }
                debug!("Worker {} stopped", worker_id);
            });

            workers.push(worker);
        }

        Self { task_sender, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues one request and waits for its outcome.
    pub async fn submit(&self, request: AnalysisRequest) -> AnalysisOutcome {
        let (result_sender, result_receiver) = oneshot::channel();

        self.task_sender
            .send(AnalysisTask {
                request,
                result_sender,
            })
            .map_err(|_| AnalysisError::Internal("worker pool is closed".to_string()))?;

        result_receiver
            .await
            .map_err(|_| AnalysisError::Internal("worker dropped the request".to_string()))?
    }
}

/// Analyzes a batch of images concurrently against one shared pipeline.
pub struct BatchAnalyzer {
    worker_pool: WorkerPool,
}

impl BatchAnalyzer {
    /// `workers` defaults to the number of CPUs.
    pub fn new(pipeline: NsbPipeline, workers: Option<usize>) -> Self {
        let worker_count = workers.unwrap_or_else(num_cpus::get);
        Self {
            worker_pool: WorkerPool::new(pipeline, worker_count),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }

    /// Outcomes are returned in the order of `requests`.
    pub async fn analyze_all(&self, requests: Vec<AnalysisRequest>) -> Vec<AnalysisOutcome> {
        join_all(requests.into_iter().map(|request| self.worker_pool.submit(request))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::feature_engineer::FeatureSchema;
    use crate::core_modules::predictor::{FeatureScaler, LinearModel, LoadedModel};
    use crate::core_modules::utils::image_helper::solid_rgb8;
    use crate::pipeline::PipelineConfig;
    use std::sync::Arc;

    fn altitude_pipeline() -> NsbPipeline {
        let model = LoadedModel::new(
            FeatureSchema::new(["Altitude"]),
            FeatureScaler::Identity,
            Box::new(LinearModel {
                coefficients: vec![1.0],
                intercept: 0.0,
            }),
        )
        .unwrap();
        NsbPipeline::new(Arc::new(model), PipelineConfig::default())
    }

    fn request(altitude: f64) -> AnalysisRequest {
        AnalysisRequest {
            image_bytes: solid_rgb8(4, 4, [30, 30, 30]).expect("Error encoding image."),
            exposure_override: None,
            altitude: Some(altitude),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn outcomes_keep_input_order() {
        let analyzer = BatchAnalyzer::new(altitude_pipeline(), Some(3));
        assert_eq!(analyzer.worker_count(), 3);

        let requests: Vec<AnalysisRequest> = (0..12).map(|i| request(10.0 + i as f64)).collect();
        let outcomes = analyzer.analyze_all(requests).await;

        assert_eq!(outcomes.len(), 12);
        for (i, outcome) in outcomes.iter().enumerate() {
            let result = outcome.as_ref().expect("analysis should succeed");
            assert_eq!(result.nsb_score, 10.0 + i as f64);
        }
    }

    #[tokio::test]
    async fn failures_stay_in_their_slot() {
        let analyzer = BatchAnalyzer::new(altitude_pipeline(), Some(2));
        let broken = AnalysisRequest {
            image_bytes: b"not an image".to_vec(),
            ..AnalysisRequest::default()
        };

        let outcomes = analyzer.analyze_all(vec![request(17.0), broken, request(21.0)]).await;

        assert_eq!(outcomes[0].as_ref().unwrap().bortle_class, 5);
        assert_eq!(outcomes[1].as_ref().unwrap_err().kind(), "image_decode_error");
        assert_eq!(outcomes[2].as_ref().unwrap().bortle_class, 1);
    }

    #[tokio::test]
    async fn default_worker_count_is_positive() {
        let analyzer = BatchAnalyzer::new(altitude_pipeline(), None);
        assert!(analyzer.worker_count() >= 1);
        assert!(analyzer.analyze_all(Vec::new()).await.is_empty());
    }
}
