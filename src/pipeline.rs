//! 学習・レポートの一連の処理
//!
//! CLIと結合テストの両方から呼び出すため、引数はすべて `AppConfig` と
//! データセットのパスで受け取ります。

use anyhow::{Context, Result};
use burn::{
    module::{AutodiffModule, Module},
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::{class_counts, LabelSet, SplitConfig, SplitLoader};
use crate::fetch::resolve_extractor;
use crate::ml::{
    fit, run_report, CollectBatchStats, ExtractorConfig, FeatureExtractor, InferenceEngine,
    ReportSummary, TrainingConfig, TransferClassifier, TransferModelConfig,
};
use crate::model::{save_model_with_metadata, AppConfig, ModelMetadata};
use crate::report::{generate_history_chart, SvgGridSink};

/// 学習履歴CSVのファイル名
pub const HISTORY_CSV: &str = "history.csv";
/// 学習履歴チャートのファイル名
pub const HISTORY_CHART: &str = "history.svg";

/// 学習の結果
#[derive(Debug)]
pub struct TrainOutcome {
    pub labels: LabelSet,
    pub model_path: PathBuf,
    pub history: CollectBatchStats,
    pub report: ReportSummary,
}

/// 設定からモデル構造を作成
pub fn model_config(config: &AppConfig, num_classes: usize) -> TransferModelConfig {
    let extractor = ExtractorConfig::new()
        .with_input_size(config.model.image_size)
        .with_base_channels(config.model.base_channels)
        .with_num_blocks(config.model.num_blocks);
    TransferModelConfig::new(num_classes, extractor)
        .with_freeze_extractor(config.model.freeze_extractor)
}

/// データセットの索引付けから予測レポートまでを実行
pub fn train<B: AutodiffBackend>(
    config: &AppConfig,
    dataset_dir: &Path,
    device: &B::Device,
) -> Result<TrainOutcome> {
    let labels = LabelSet::discover(dataset_dir)?;
    for (name, count) in class_counts(dataset_dir, &labels)? {
        info!("  {}: {}枚", name, count);
    }

    let split_config = config.split_config();
    let (train, validation) = SplitLoader::new(dataset_dir, &labels, split_config.clone()).load()?;
    info!(
        "学習: {}枚 ({}バッチ) / 検証: {}枚 ({}バッチ)",
        train.len(),
        train.batches_per_pass(),
        validation.len(),
        validation.batches_per_pass()
    );

    let model_config = model_config(config, labels.len());
    model_config.validate(split_config.image_size)?;

    let model = match config.model.extractor.as_deref() {
        Some(handle) => {
            let weights = resolve_extractor(handle, Path::new(&config.model.cache_dir))?;
            let extractor =
                FeatureExtractor::<B>::load_pretrained(&model_config.extractor, &weights, device)?;
            model_config.assemble(extractor, device)
        }
        None => {
            info!("特徴抽出器はランダム初期化します");
            model_config.init::<B>(device)
        }
    };

    let training_config = TrainingConfig::new(AdamConfig::new())
        .with_num_epochs(config.training.num_epochs)
        .with_learning_rate(config.training.learning_rate);

    let mut history = CollectBatchStats::new();
    let model = fit(model, &training_config, &train, &validation, &mut history, device)?;
    let model = model.valid();

    let output_dir = Path::new(&config.report.output_dir);
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("出力ディレクトリ作成エラー: {}", output_dir.display()))?;
    history.write_csv(&output_dir.join(HISTORY_CSV))?;
    generate_history_chart(&history, &output_dir.join(HISTORY_CHART))?;

    let model_path = save_model(&model, &model_config, &labels, config, &split_config)?;
    info!("モデルを保存しました: {}", model_path.display());

    let mut sink = SvgGridSink::new(
        output_dir,
        config.report.grid_columns,
        config.report.thumbnail_size,
    )?;
    let report = run_report(
        &model,
        &validation,
        &labels,
        config.report.limit(),
        &mut sink,
        device,
    )?;

    Ok(TrainOutcome {
        labels,
        model_path,
        history,
        report,
    })
}

fn save_model<B: Backend>(
    model: &TransferClassifier<B>,
    model_config: &TransferModelConfig,
    labels: &LabelSet,
    config: &AppConfig,
    split_config: &SplitConfig,
) -> Result<PathBuf> {
    let binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    let metadata = ModelMetadata::new(
        labels.names().to_vec(),
        model_config,
        config.model.extractor.clone(),
        config.training.num_epochs,
        split_config.batch_size,
        split_config.seed,
        split_config.validation_fraction,
    );

    save_model_with_metadata(Path::new(&config.model.model_path), &metadata, &binary)
}

/// 保存済みモデルで検証用バッチの予測レポートを作成
///
/// 分割は学習時のメタデータ（シード・検証割合）から再現します。
pub fn report<B: Backend>(
    config: &AppConfig,
    model_path: &Path,
    dataset_dir: &Path,
    device: &B::Device,
) -> Result<ReportSummary> {
    let engine = InferenceEngine::<B>::load(model_path, device)?;
    let metadata = engine.metadata();
    let labels = &engine.config().labels;

    let discovered = LabelSet::discover(dataset_dir)?;
    anyhow::ensure!(
        &discovered == labels,
        "データセットのクラス ({}) がモデルのクラス ({}) と一致しません",
        discovered.names().join(", "),
        labels.names().join(", ")
    );

    let split_config = SplitConfig {
        batch_size: metadata.batch_size,
        image_size: metadata.image_size,
        seed: metadata.seed,
        validation_fraction: metadata.validation_fraction,
    };
    let (_, validation) = SplitLoader::new(dataset_dir, labels, split_config).load()?;

    let mut sink = SvgGridSink::new(
        Path::new(&config.report.output_dir),
        config.report.grid_columns,
        config.report.thumbnail_size,
    )?;
    run_report(
        engine.model(),
        &validation,
        labels,
        config.report.limit(),
        &mut sink,
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_follows_settings() {
        let mut config = AppConfig::default();
        config.model.image_size = 64;
        config.model.num_blocks = 3;
        config.model.freeze_extractor = true;

        let model_config = model_config(&config, 5);
        assert_eq!(model_config.num_classes, 5);
        assert_eq!(model_config.extractor.input_size, 64);
        assert_eq!(model_config.extractor.num_blocks, 3);
        assert!(model_config.freeze_extractor);
        assert!(model_config.validate(64).is_ok());
        assert!(model_config.validate(224).is_err());
    }
}
