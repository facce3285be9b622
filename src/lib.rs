//! 転移学習による画像分類パイプライン
//!
//! クラスごとのサブディレクトリに分けられた画像データセットを索引付けし、
//! 学習用・検証用に分割して、事前学習済み特徴抽出器 + 新しい分類層を学習します。
//! 学習後は検証用バッチの予測結果を画像グリッドとして書き出します。

pub mod backend;
pub mod dataset;
pub mod fetch;
pub mod logging;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod report;

#[cfg(test)]
mod test_support;

/// 既定のデータセット（花の写真5クラス）
pub const DEFAULT_DATASET_URL: &str =
    "https://storage.googleapis.com/download.tensorflow.org/example_images/flower_photos.tgz";

pub use dataset::{BatchStream, LabelSet, SplitConfig, SplitLoader};
pub use ml::{
    fit, run_report, BatchLimit, BatchObserver, CollectBatchStats, TransferClassifier,
    TransferModelConfig,
};
pub use model::AppConfig;
