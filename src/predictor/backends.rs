use crate::error::PredictorError;
use crate::events::{ClassLabel, PredictionOutcome};
use crate::predictor::FeatureVector;
use chrono::Utc;
use log::{debug, error, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of a health check against the inference endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn healthy(status_code: u16, response_time_ms: f64) -> Self {
        Self {
            healthy: true,
            status_code: Some(status_code),
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn unhealthy(status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status_code,
            response_time_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Trait for inference endpoint implementations
///
/// `predict` never fails: transport errors, timeouts and bad responses are
/// reported as unsuccessful outcomes carrying the elapsed time.
pub trait Predictor: Send + Sync {
    fn predict<'a>(
        &'a self,
        features: &'a FeatureVector,
    ) -> Pin<Box<dyn Future<Output = PredictionOutcome> + Send + 'a>>;

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>>;
}

/// Send every row to the predictor, one request at a time
pub async fn predict_batch(
    predictor: &dyn Predictor,
    rows: &[FeatureVector],
) -> Vec<PredictionOutcome> {
    let mut outcomes = Vec::with_capacity(rows.len());
    for row in rows {
        outcomes.push(predictor.predict(row).await);
    }
    outcomes
}

/// Send every row to the predictor with at most `limit` requests in flight
///
/// Outcomes keep the order of `rows`. A prediction task that panics is
/// reported as a failed outcome.
pub async fn predict_concurrent(
    predictor: Arc<dyn Predictor>,
    rows: &[FeatureVector],
    limit: usize,
) -> Vec<PredictionOutcome> {
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();

    for (index, row) in rows.iter().cloned().enumerate() {
        let predictor = Arc::clone(&predictor);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            (index, predictor.predict(&row).await)
        });
    }

    let mut outcomes: Vec<Option<PredictionOutcome>> = (0..rows.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => error!("Prediction task failed: {}", e),
        }
    }

    outcomes
        .into_iter()
        .map(|outcome| {
            outcome.unwrap_or_else(|| {
                PredictionOutcome::failure("prediction task failed", 0.0, None, Utc::now())
            })
        })
        .collect()
}

/// Client for a KServe model served over the Open Inference (v2) protocol
///
/// Every feature becomes its own `FP64` input tensor of shape `[1]`; the
/// predicted class is read from `outputs[0].data[0]`.
pub struct KServePredictor {
    client: Client,
    endpoint: String,
    model: String,
}

/// One input tensor of an inference request
#[derive(Debug, Serialize)]
struct InferInput<'a> {
    name: &'a str,
    shape: [usize; 1],
    datatype: &'static str,
    data: [f64; 1],
}

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    inputs: Vec<InferInput<'a>>,
}

#[derive(Debug, Deserialize)]
struct InferOutput {
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    outputs: Vec<InferOutput>,
}

impl KServePredictor {
    /// Create a new KServe client
    ///
    /// # Arguments
    /// * `endpoint` - Base URL of the inference service (e.g., "http://localhost:8085")
    /// * `model` - Served model name (e.g., "bankchurn")
    /// * `timeout` - Per-request timeout
    pub fn new(endpoint: String, model: String, timeout: Duration) -> Result<Self, PredictorError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;

        Ok(Self {
            client,
            endpoint,
            model,
        })
    }

    fn model_url(&self) -> String {
        format!(
            "{}/v2/models/{}",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    fn infer_url(&self) -> String {
        format!("{}/infer", self.model_url())
    }

    fn build_request(features: &FeatureVector) -> InferRequest<'_> {
        InferRequest {
            inputs: features
                .iter()
                .map(|(name, value)| InferInput {
                    name,
                    shape: [1],
                    datatype: "FP64",
                    data: [value],
                })
                .collect(),
        }
    }

    /// Extract the predicted class from a response body
    fn parse_prediction(body: &str) -> Result<ClassLabel, PredictorError> {
        let response: InferResponse = serde_json::from_str(body).map_err(|e| {
            PredictorError::InvalidResponse(format!("Failed to parse inference response: {}", e))
        })?;

        let value = response
            .outputs
            .first()
            .and_then(|output| output.data.first())
            .ok_or_else(|| {
                PredictorError::InvalidResponse("Response contains no output data".to_string())
            })?;

        if let Some(class) = value.as_i64() {
            return Ok(class);
        }
        // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
        match value.as_f64() {
            Some(v)
                if v.is_finite()
                    && v.fract() == 0.0
                    && v >= ClassLabel::MIN as f64
                    && v < ClassLabel::MAX as f64 =>
            {
                Ok(v as ClassLabel)
            }
            _ => Err(PredictorError::InvalidResponse(format!(
                "Prediction is not a class label: {}",
                value
            ))),
        }
    }

    async fn infer(&self, features: &FeatureVector) -> Result<ClassLabel, PredictorError> {
        let response = self
            .client
            .post(self.infer_url())
            .json(&Self::build_request(features))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;
        if !status.is_success() {
            return Err(PredictorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Self::parse_prediction(&body)
    }
}

/// Map reqwest timeouts to the dedicated variant
fn classify(error: reqwest::Error) -> PredictorError {
    if error.is_timeout() {
        PredictorError::Timeout
    } else {
        PredictorError::HttpError(error)
    }
}

impl Predictor for KServePredictor {
    fn predict<'a>(
        &'a self,
        features: &'a FeatureVector,
    ) -> Pin<Box<dyn Future<Output = PredictionOutcome> + Send + 'a>> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.infer(features).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(class) => PredictionOutcome::success(class, elapsed_ms, Utc::now()),
                Err(e) => {
                    warn!("Prediction request failed: {}", e);
                    let status = match &e {
                        PredictorError::Status { status, .. } => Some(*status),
                        PredictorError::InvalidResponse(_) => Some(200),
                        _ => None,
                    };
                    PredictionOutcome::failure(e.to_string(), elapsed_ms, status, Utc::now())
                }
            }
        })
    }

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>> {
        Box::pin(async move {
            let started = Instant::now();
            match self.client.get(self.model_url()).send().await {
                Ok(response) => {
                    let status = response.status();
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    debug!("Health check returned {} in {:.1} ms", status, elapsed_ms);
                    if status.as_u16() == 200 {
                        HealthStatus::healthy(200, elapsed_ms)
                    } else {
                        HealthStatus::unhealthy(
                            Some(status.as_u16()),
                            format!("Model endpoint returned status {}", status),
                        )
                    }
                }
                Err(e) => HealthStatus::unhealthy(None, classify(e).to_string()),
            }
        })
    }
}

/// Mock predictor for testing and dry runs
///
/// Outcomes are produced from a script of class labels and failures that
/// cycles once exhausted.
#[derive(Clone)]
pub struct MockPredictor {
    script: Arc<Vec<Result<ClassLabel, String>>>,
    response_time_ms: f64,
    delay: Option<Duration>,
    healthy: bool,
    call_count: Arc<Mutex<usize>>,
    last_features: Arc<Mutex<Option<FeatureVector>>>,
}

impl MockPredictor {
    /// Create a mock predictor with a script of responses
    ///
    /// # Example
    /// ```
    /// use model_monitor::predictor::MockPredictor;
    ///
    /// let predictor = MockPredictor::with_script(vec![Ok(0), Ok(1), Err("boom".to_string())]);
    /// ```
    pub fn with_script(script: Vec<Result<ClassLabel, String>>) -> Self {
        Self {
            script: Arc::new(script),
            response_time_ms: 10.0,
            delay: None,
            healthy: true,
            call_count: Arc::new(Mutex::new(0)),
            last_features: Arc::new(Mutex::new(None)),
        }
    }

    /// Mock predictor that always answers with `class`
    pub fn constant(class: ClassLabel) -> Self {
        Self::with_script(vec![Ok(class)])
    }

    /// Mock predictor whose every request fails
    pub fn failing(error: impl Into<String>) -> Self {
        Self::with_script(vec![Err(error.into())])
    }

    /// Report this response time on every outcome
    pub fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    /// Add a delay to all responses (useful for testing deadlines)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Get the number of times predict() has been called
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Get the last feature vector passed to predict()
    pub fn last_features(&self) -> Option<FeatureVector> {
        self.last_features
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl Predictor for MockPredictor {
    fn predict<'a>(
        &'a self,
        features: &'a FeatureVector,
    ) -> Pin<Box<dyn Future<Output = PredictionOutcome> + Send + 'a>> {
        Box::pin(async move {
            let index = {
                let mut count = self.call_count.lock().unwrap_or_else(|p| p.into_inner());
                *count += 1;
                *count - 1
            };
            *self.last_features.lock().unwrap_or_else(|p| p.into_inner()) = Some(features.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.script.is_empty() {
                return PredictionOutcome::failure("empty script", self.response_time_ms, None, Utc::now());
            }

            match &self.script[index % self.script.len()] {
                Ok(class) => PredictionOutcome::success(*class, self.response_time_ms, Utc::now()),
                Err(error) => PredictionOutcome::failure(
                    error.clone(),
                    self.response_time_ms,
                    Some(500),
                    Utc::now(),
                ),
            }
        })
    }

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>> {
        Box::pin(async move {
            if self.healthy {
                HealthStatus::healthy(200, self.response_time_ms)
            } else {
                HealthStatus::unhealthy(Some(503), "Mock endpoint unhealthy")
            }
        })
    }
}
