//! 検証バッチの予測レポート
//!
//! 検証用ストリームを先頭から読み直し、バッチ上限に達するまで
//! 予測結果を `ReportSink` へ渡します。

use anyhow::Result;
use burn::tensor::backend::Backend;
use std::path::PathBuf;
use tracing::info;

use crate::dataset::{BatchStream, LabelSet};
use crate::ml::TransferClassifier;

/// 描画するバッチ数の上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLimit {
    /// 指定数のバッチで打ち切る
    Limited(usize),
    /// 全バッチを処理する
    Unbounded,
}

impl Default for BatchLimit {
    fn default() -> Self {
        BatchLimit::Limited(2)
    }
}

impl BatchLimit {
    pub fn from_option(limit: Option<usize>) -> Self {
        limit.map(BatchLimit::Limited).unwrap_or(BatchLimit::Unbounded)
    }
}

impl std::fmt::Display for BatchLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchLimit::Limited(n) => write!(f, "{}バッチ", n),
            BatchLimit::Unbounded => write!(f, "全バッチ"),
        }
    }
}

/// 1サンプルの予測結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub path: PathBuf,
    pub predicted: usize,
    pub actual: usize,
    /// 予測クラスの確率
    pub confidence: f32,
}

impl Prediction {
    pub fn is_correct(&self) -> bool {
        self.predicted == self.actual
    }
}

/// 1バッチ分のレポート
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_index: usize,
    pub predictions: Vec<Prediction>,
}

impl BatchReport {
    pub fn correct(&self) -> usize {
        self.predictions.iter().filter(|p| p.is_correct()).count()
    }
}

/// レポートの出力先
pub trait ReportSink {
    fn render(&mut self, report: &BatchReport, labels: &LabelSet) -> Result<()>;
}

/// レポート全体の集計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub batches_rendered: usize,
    pub samples: usize,
    pub correct: usize,
}

impl ReportSummary {
    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.correct as f64 / self.samples as f64
        }
    }
}

/// 上限判定の状態（UnderLimit -> Stopped の一方向のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    UnderLimit { rendered: usize },
    Stopped,
}

impl LoopState {
    fn after_render(self, limit: BatchLimit) -> Self {
        match (self, limit) {
            (LoopState::UnderLimit { rendered }, BatchLimit::Limited(max)) if rendered + 1 >= max => {
                LoopState::Stopped
            }
            (LoopState::UnderLimit { rendered }, _) => LoopState::UnderLimit {
                rendered: rendered + 1,
            },
            (LoopState::Stopped, _) => LoopState::Stopped,
        }
    }

    fn initial(limit: BatchLimit) -> Self {
        match limit {
            BatchLimit::Limited(0) => LoopState::Stopped,
            _ => LoopState::UnderLimit { rendered: 0 },
        }
    }
}

/// 検証バッチの予測を上限まで描画
pub fn run_report<B: Backend>(
    model: &TransferClassifier<B>,
    validation: &BatchStream,
    labels: &LabelSet,
    limit: BatchLimit,
    sink: &mut dyn ReportSink,
    device: &B::Device,
) -> Result<ReportSummary> {
    anyhow::ensure!(
        validation.num_classes() == labels.len(),
        "ラベル数({})とストリームのクラス数({})が一致しません",
        labels.len(),
        validation.num_classes()
    );

    let mut summary = ReportSummary::default();
    let mut state = LoopState::initial(limit);
    let mut batches = validation.iter().enumerate();

    while let LoopState::UnderLimit { .. } = state {
        let Some((batch_index, batch)) = batches.next() else {
            break;
        };
        let batch = batch?;
        let paths: Vec<PathBuf> = batch.items.iter().map(|item| item.path.clone()).collect();
        let tensors = batch.to_tensors::<B>(labels.len(), device);

        let (predicted, probabilities) = model.predict(tensors.images);
        let actual = tensors.labels.argmax(1);

        let predicted: Vec<i64> = predicted.into_data().iter::<i64>().collect();
        let actual: Vec<i64> = actual.into_data().iter::<i64>().collect();
        let probabilities: Vec<f32> = probabilities.into_data().iter::<f32>().collect();

        let predictions: Vec<Prediction> = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| {
                let predicted = predicted[i] as usize;
                Prediction {
                    path,
                    predicted,
                    actual: actual[i] as usize,
                    confidence: probabilities[i * labels.len() + predicted],
                }
            })
            .collect();

        let report = BatchReport {
            batch_index,
            predictions,
        };
        sink.render(&report, labels)?;

        summary.batches_rendered += 1;
        summary.samples += report.predictions.len();
        summary.correct += report.correct();
        state = state.after_render(limit);
    }

    info!(
        "予測レポート: {} バッチ / {} 枚 / 正解率 {:.2}% (上限: {})",
        summary.batches_rendered,
        summary.samples,
        summary.accuracy() * 100.0,
        limit
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{SplitConfig, SplitLoader};
    use crate::ml::{ExtractorConfig, TransferModelConfig};
    use crate::test_support::write_dataset;
    use burn::backend::NdArray;

    #[derive(Default)]
    struct CountingSink {
        reports: Vec<BatchReport>,
    }

    impl ReportSink for CountingSink {
        fn render(&mut self, report: &BatchReport, _labels: &LabelSet) -> Result<()> {
            self.reports.push(report.clone());
            Ok(())
        }
    }

    /// 検証用に12枚（バッチサイズ4で3バッチ）
    fn setup(dir: &std::path::Path) -> (BatchStream, LabelSet, TransferClassifier<NdArray>) {
        write_dataset(dir, &[("A", 10), ("B", 10)], 16);
        let labels = LabelSet::discover(dir).unwrap();
        let config = SplitConfig {
            batch_size: 4,
            image_size: 16,
            seed: 11,
            validation_fraction: 0.6,
        };
        let (_, validation) = SplitLoader::new(dir, &labels, config).load().unwrap();
        assert_eq!(validation.batches_per_pass(), 3);

        let model = TransferModelConfig::new(
            labels.len(),
            ExtractorConfig::new()
                .with_input_size(16)
                .with_base_channels(4)
                .with_num_blocks(2),
        )
        .init::<NdArray>(&Default::default());
        (validation, labels, model)
    }

    #[test]
    fn test_limit_two_of_three_batches() {
        let dir = tempfile::tempdir().unwrap();
        let (validation, labels, model) = setup(dir.path());
        let mut sink = CountingSink::default();

        let summary = run_report(
            &model,
            &validation,
            &labels,
            BatchLimit::default(),
            &mut sink,
            &Default::default(),
        )
        .unwrap();

        assert_eq!(summary.batches_rendered, 2);
        assert_eq!(sink.reports.len(), 2);
        assert_eq!(summary.samples, 8);
        assert_eq!(sink.reports[1].batch_index, 1);
    }

    #[test]
    fn test_unbounded_covers_every_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (validation, labels, model) = setup(dir.path());
        let mut sink = CountingSink::default();

        let summary = run_report(
            &model,
            &validation,
            &labels,
            BatchLimit::Unbounded,
            &mut sink,
            &Default::default(),
        )
        .unwrap();

        assert_eq!(summary.batches_rendered, 3);
        assert_eq!(summary.samples, validation.len());
        for report in &sink.reports {
            for prediction in &report.predictions {
                assert!(prediction.predicted < labels.len());
                assert!(prediction.actual < labels.len());
                assert!((0.0..=1.0).contains(&prediction.confidence));
            }
        }
    }

    #[test]
    fn test_limit_larger_than_stream_stops_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let (validation, labels, model) = setup(dir.path());
        let mut sink = CountingSink::default();

        let summary = run_report(
            &model,
            &validation,
            &labels,
            BatchLimit::Limited(10),
            &mut sink,
            &Default::default(),
        )
        .unwrap();
        assert_eq!(summary.batches_rendered, 3);
    }

    #[test]
    fn test_loop_state_transitions() {
        let limit = BatchLimit::Limited(2);
        let state = LoopState::initial(limit);
        assert_eq!(state, LoopState::UnderLimit { rendered: 0 });
        let state = state.after_render(limit);
        assert_eq!(state, LoopState::UnderLimit { rendered: 1 });
        let state = state.after_render(limit);
        assert_eq!(state, LoopState::Stopped);
        assert_eq!(state.after_render(limit), LoopState::Stopped);

        assert_eq!(LoopState::initial(BatchLimit::Limited(0)), LoopState::Stopped);
    }

    #[test]
    fn test_batch_limit_from_option() {
        assert_eq!(BatchLimit::from_option(Some(3)), BatchLimit::Limited(3));
        assert_eq!(BatchLimit::from_option(None), BatchLimit::Unbounded);
    }
}
