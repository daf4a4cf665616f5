/// Inference endpoint clients and synthetic inputs
pub mod backends;
pub mod features;

pub use backends::{
    predict_batch, predict_concurrent, HealthStatus, KServePredictor, MockPredictor, Predictor,
};
pub use features::{FeatureGenerator, FeatureRange, FeatureVector, UniformFeatureGenerator};
