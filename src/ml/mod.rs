pub mod extractor;
pub mod transfer_model;
pub mod training;
pub mod evaluation;
pub mod inference;

pub use extractor::{ConvBlock, ExtractorConfig, FeatureExtractor};
pub use transfer_model::{TransferClassifier, TransferModelConfig};
pub use training::{
    evaluate, fit, BatchMetrics, BatchObserver, CollectBatchStats, EpochSummary, TrainingConfig,
};
pub use evaluation::{
    run_report, BatchLimit, BatchReport, Prediction, ReportSink, ReportSummary,
};
pub use inference::InferenceEngine;
