//! 学習ドライバ
//!
//! 固定エポック数だけ学習用バッチを回し、バッチごとにオブザーバを呼び出します。
//! チェックポイントや早期終了は行いません。途中のエラーはそのまま呼び出し元へ返します。

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::dataset::BatchStream;
use crate::ml::TransferClassifier;

/// 学習設定
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    /// エポック数
    #[config(default = 3)]
    pub num_epochs: usize,
    /// 学習率
    #[config(default = 1e-3)]
    pub learning_rate: f64,
}

/// 損失・正解率の集計
///
/// `reset()` するまでの平均値を返します。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchMetrics {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl BatchMetrics {
    /// 1バッチ分の結果を加算
    pub fn update(&mut self, loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += loss * batch_size as f64;
        self.correct += correct;
        self.seen += batch_size;
    }

    /// サンプル平均の損失
    pub fn loss(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss_sum / self.seen as f64
        }
    }

    /// 正解率（0.0〜1.0）
    pub fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }

    /// 集計済みのサンプル数
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// エポック終了時の要約
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub num_epochs: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// 検証データが空の場合は None
    pub validation: Option<(f64, f64)>,
}

/// バッチごとに呼ばれるオブザーバ
pub trait BatchObserver {
    /// オプティマイザ更新の直後に呼ばれる
    ///
    /// `metrics` は前回の `reset()` 以降の累積値です。
    fn on_train_batch_end(&mut self, step: usize, metrics: &mut BatchMetrics);

    fn on_epoch_end(&mut self, _summary: &EpochSummary) {}
}

/// バッチごとの損失と正解率を記録するオブザーバ
///
/// 記録のたびに集計をリセットするため、各値はそのバッチのみの値になります。
#[derive(Debug, Clone, Default)]
pub struct CollectBatchStats {
    pub batch_losses: Vec<f64>,
    pub batch_accuracies: Vec<f64>,
}

impl CollectBatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batch_losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch_losses.is_empty()
    }

    /// step,loss,accuracy 形式のCSVを書き出す
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("CSV作成エラー: {}", path.display()))?;
        writer.write_record(["step", "loss", "accuracy"])?;
        for (step, (loss, accuracy)) in self
            .batch_losses
            .iter()
            .zip(&self.batch_accuracies)
            .enumerate()
        {
            writer.write_record([step.to_string(), loss.to_string(), accuracy.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl BatchObserver for CollectBatchStats {
    fn on_train_batch_end(&mut self, _step: usize, metrics: &mut BatchMetrics) {
        self.batch_losses.push(metrics.loss());
        self.batch_accuracies.push(metrics.accuracy());
        metrics.reset();
    }
}

/// モデル学習を実行
///
/// 1エポックあたり ceil(学習サンプル数 / バッチサイズ) ステップ。
/// 学習用ストリームは折り返しながら消費します。
pub fn fit<B: AutodiffBackend>(
    mut model: TransferClassifier<B>,
    config: &TrainingConfig,
    train: &BatchStream,
    validation: &BatchStream,
    observer: &mut dyn BatchObserver,
    device: &B::Device,
) -> Result<TransferClassifier<B>> {
    anyhow::ensure!(!train.is_empty(), "学習データが空です");

    let steps_per_epoch = train.batches_per_pass();
    let num_classes = train.num_classes();

    info!(
        "学習を開始します: エポック数 {}, ステップ/エポック {}, バッチサイズ {}, 学習率 {}",
        config.num_epochs,
        steps_per_epoch,
        train.batch_size(),
        config.learning_rate
    );

    let mut optimizer = config.optimizer.init::<B, TransferClassifier<B>>();
    let mut batches = train.repeat();
    let mut batch_metrics = BatchMetrics::default();
    let mut step = 0usize;

    for epoch in 0..config.num_epochs {
        let started = Instant::now();
        let mut epoch_metrics = BatchMetrics::default();

        for _ in 0..steps_per_epoch {
            let batch = batches
                .next()
                .ok_or_else(|| anyhow::anyhow!("学習データのストリームが途切れました"))??;
            let batch = batch.to_tensors::<B>(num_classes, device);
            let batch_size = batch.targets.dims()[0];

            let logits = model.forward_logits(batch.images);
            let loss = model.loss(logits.clone(), batch.labels);
            let loss_value: f64 = loss.clone().into_scalar().elem();
            let correct = count_correct(logits, batch.targets);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);

            batch_metrics.update(loss_value, correct, batch_size);
            epoch_metrics.update(loss_value, correct, batch_size);
            observer.on_train_batch_end(step, &mut batch_metrics);

            debug!(
                "エポック {} ステップ {}: loss = {:.4}, acc = {:.2}%",
                epoch + 1,
                step,
                loss_value,
                100.0 * correct as f64 / batch_size.max(1) as f64
            );
            step += 1;
        }

        let validation_metrics = if validation.is_empty() {
            None
        } else {
            let metrics = evaluate(&model.valid(), validation, device)?;
            Some((metrics.loss(), metrics.accuracy()))
        };

        let summary = EpochSummary {
            epoch,
            num_epochs: config.num_epochs,
            train_loss: epoch_metrics.loss(),
            train_accuracy: epoch_metrics.accuracy(),
            validation: validation_metrics,
        };

        match summary.validation {
            Some((val_loss, val_acc)) => info!(
                "エポック {}/{} ({:.1}s) | Loss: {:.4} | Acc: {:.2}% | Val Loss: {:.4} | Val Acc: {:.2}%",
                epoch + 1,
                config.num_epochs,
                started.elapsed().as_secs_f64(),
                summary.train_loss,
                summary.train_accuracy * 100.0,
                val_loss,
                val_acc * 100.0
            ),
            None => info!(
                "エポック {}/{} ({:.1}s) | Loss: {:.4} | Acc: {:.2}%",
                epoch + 1,
                config.num_epochs,
                started.elapsed().as_secs_f64(),
                summary.train_loss,
                summary.train_accuracy * 100.0
            ),
        }

        observer.on_epoch_end(&summary);
    }

    Ok(model)
}

/// ストリーム1パス分の損失と正解率
pub fn evaluate<B: Backend>(
    model: &TransferClassifier<B>,
    stream: &BatchStream,
    device: &B::Device,
) -> Result<BatchMetrics> {
    let mut metrics = BatchMetrics::default();

    for batch in stream.iter() {
        let batch = batch?.to_tensors::<B>(stream.num_classes(), device);
        let batch_size = batch.targets.dims()[0];

        let logits = model.forward_logits(batch.images);
        let loss: f64 = model.loss(logits.clone(), batch.labels).into_scalar().elem();
        let correct = count_correct(logits, batch.targets);

        metrics.update(loss, correct, batch_size);
    }

    Ok(metrics)
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let correct: i64 = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}
