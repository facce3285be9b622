//! 学習用/検証用の分割とバッチストリーム
//!
//! クラスごとに同じ割合を検証用に取り分ける（層化分割）。
//! シードが同じであれば何度作り直しても同じ分割になります。

use anyhow::Result;
use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::batcher::{ImageBatch, ImageItem};
use super::index::{list_class_files, LabelSet};

/// 分割・バッチ化の設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitConfig {
    /// バッチサイズ
    pub batch_size: usize,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// 分割とシャッフルのシード
    pub seed: u64,
    /// 検証用に取り分ける割合 [0, 1)
    pub validation_fraction: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            image_size: 224,
            seed: 42,
            validation_fraction: 0.2,
        }
    }
}

/// 画像パスとクラスIDの組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// 分割結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
}

/// 分割ローダー
pub struct SplitLoader {
    root: PathBuf,
    labels: LabelSet,
    config: SplitConfig,
}

impl SplitLoader {
    pub fn new(root: &Path, labels: &LabelSet, config: SplitConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            labels: labels.clone(),
            config,
        }
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// ファイルを学習用と検証用に分割
    pub fn partition(&self) -> Result<Partition> {
        let fraction = self.config.validation_fraction;
        if !(0.0..1.0).contains(&fraction) {
            anyhow::bail!("validation_fraction は [0, 1) の範囲で指定してください: {}", fraction);
        }
        if self.config.batch_size == 0 || self.config.image_size == 0 {
            anyhow::bail!("batch_size と image_size は1以上である必要があります");
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut train = Vec::new();
        let mut validation = Vec::new();

        for (label, class_name) in self.labels.names().iter().enumerate() {
            let mut files = list_class_files(&self.root, class_name)?;
            files.shuffle(&mut rng);

            let num_validation = (files.len() as f64 * fraction).round() as usize;
            debug!(
                "クラス '{}': 学習 {} 枚 / 検証 {} 枚",
                class_name,
                files.len() - num_validation,
                num_validation
            );

            for (i, path) in files.into_iter().enumerate() {
                let sample = Sample { path, label };
                if i < num_validation {
                    validation.push(sample);
                } else {
                    train.push(sample);
                }
            }
        }

        if train.is_empty() {
            anyhow::bail!("学習データが見つかりません: {}", self.root.display());
        }

        Ok(Partition { train, validation })
    }

    /// 学習用（パスごとにシャッフル）と検証用（固定順）のストリームを作成
    pub fn load(&self) -> Result<(BatchStream, BatchStream)> {
        let partition = self.partition()?;
        let num_classes = self.labels.len();

        let train = BatchStream {
            samples: SampleSet::new(partition.train),
            batch_size: self.config.batch_size,
            image_size: self.config.image_size,
            num_classes,
            shuffle_seed: Some(self.config.seed),
        };
        let validation = BatchStream {
            samples: SampleSet::new(partition.validation),
            batch_size: self.config.batch_size,
            image_size: self.config.image_size,
            num_classes,
            shuffle_seed: None,
        };

        Ok((train, validation))
    }
}

/// 分割済みサンプル集合（パスのみ保持）
#[derive(Debug, Clone)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl Dataset<Sample> for SampleSet {
    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// 遅延・再開可能なバッチ列
///
/// `iter()` を呼ぶたびに同じ分割の先頭から新しいパスを開始します。
#[derive(Debug, Clone)]
pub struct BatchStream {
    samples: SampleSet,
    batch_size: usize,
    image_size: usize,
    num_classes: usize,
    shuffle_seed: Option<u64>,
}

impl BatchStream {
    /// サンプル数
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn samples(&self) -> &[Sample] {
        self.samples.samples()
    }

    /// 1パスあたりのバッチ数（端数は最後の短いバッチになる）
    pub fn batches_per_pass(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// 先頭から新しいパスを開始
    pub fn iter(&self) -> BatchIter<'_> {
        self.pass(0)
    }

    /// 指定番号のパス（学習用はパス番号ごとに並びが変わる）
    pub fn pass(&self, pass: u64) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(pass));
            order.shuffle(&mut rng);
        }
        BatchIter {
            stream: self,
            order,
            cursor: 0,
        }
    }

    /// パスの終わりで折り返す無限イテレータ
    pub fn repeat(&self) -> RepeatIter<'_> {
        RepeatIter {
            stream: self,
            pass: 0,
            current: self.pass(0),
        }
    }
}

/// 1パス分のバッチイテレータ
pub struct BatchIter<'a> {
    stream: &'a BatchStream,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Result<ImageBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.stream.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let items = indices
            .iter()
            .filter_map(|&i| self.stream.samples.get(i))
            .map(|sample| ImageItem::load(&sample.path, sample.label, self.stream.image_size))
            .collect::<Result<Vec<_>>>();

        Some(items.map(|items| ImageBatch {
            items,
            image_size: self.stream.image_size,
        }))
    }
}

/// 折り返しイテレータ（空のストリームでは何も返さない）
pub struct RepeatIter<'a> {
    stream: &'a BatchStream,
    pass: u64,
    current: BatchIter<'a>,
}

impl Iterator for RepeatIter<'_> {
    type Item = Result<ImageBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stream.is_empty() {
            return None;
        }
        if let Some(batch) = self.current.next() {
            return Some(batch);
        }
        self.pass += 1;
        self.current = self.stream.pass(self.pass);
        self.current.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_dataset;

    fn scenario() -> (tempfile::TempDir, LabelSet, SplitConfig) {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &[("A", 10), ("B", 10)], 8);
        let labels = LabelSet::discover(dir.path()).unwrap();
        let config = SplitConfig {
            batch_size: 4,
            image_size: 8,
            seed: 7,
            validation_fraction: 0.2,
        };
        (dir, labels, config)
    }

    #[test]
    fn test_scenario_split_sizes() {
        let (dir, labels, config) = scenario();
        let (train, validation) = SplitLoader::new(dir.path(), &labels, config).load().unwrap();

        assert_eq!(train.len(), 16);
        assert_eq!(validation.len(), 4);
        assert_eq!(train.batches_per_pass(), 4);
        assert_eq!(validation.batches_per_pass(), 1);

        // クラスごとに同じ割合
        let val_a = validation.samples().iter().filter(|s| s.label == 0).count();
        assert_eq!(val_a, 2);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let (dir, labels, config) = scenario();
        let first = SplitLoader::new(dir.path(), &labels, config.clone()).partition().unwrap();
        let second = SplitLoader::new(dir.path(), &labels, config).partition().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let (dir, labels, config) = scenario();
        let partition = SplitLoader::new(dir.path(), &labels, config).partition().unwrap();
        let mut all: Vec<_> = partition
            .train
            .iter()
            .chain(partition.validation.iter())
            .map(|s| s.path.clone())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn test_batches_have_expected_shape_and_range() {
        let (dir, labels, config) = scenario();
        let (train, _) = SplitLoader::new(dir.path(), &labels, config).load().unwrap();

        let batches: Vec<_> = train.iter().map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 4);
        for batch in &batches {
            assert!(batch.len() <= 4 && !batch.is_empty());
            for item in &batch.items {
                assert_eq!(item.pixels.len(), 3 * 8 * 8);
                assert!(item.pixels.iter().all(|v| (0.0..=1.0).contains(v)));
            }
            for row in batch.one_hot(train.num_classes()) {
                assert_eq!(row.len(), labels.len());
                let argmax = row
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap();
                assert!(argmax < labels.len());
            }
        }
    }

    #[test]
    fn test_last_batch_may_be_shorter() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &[("x", 5), ("y", 5)], 4);
        let labels = LabelSet::discover(dir.path()).unwrap();
        let config = SplitConfig {
            batch_size: 3,
            image_size: 4,
            seed: 1,
            validation_fraction: 0.0,
        };
        let (train, validation) = SplitLoader::new(dir.path(), &labels, config).load().unwrap();
        assert!(validation.is_empty());
        let sizes: Vec<_> = train.iter().map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_iter_restarts_and_validation_is_stable() {
        let (dir, labels, config) = scenario();
        let (train, validation) = SplitLoader::new(dir.path(), &labels, config).load().unwrap();

        fn paths(iter: BatchIter<'_>) -> Vec<PathBuf> {
            iter.flat_map(|b| b.unwrap().items.into_iter().map(|i| i.path))
                .collect()
        }
        assert_eq!(paths(train.iter()), paths(train.iter()));
        assert_eq!(paths(validation.pass(0)), paths(validation.pass(3)));
        let expected: Vec<_> = validation.samples().iter().map(|s| s.path.clone()).collect();
        assert_eq!(paths(validation.iter()), expected);
    }

    #[test]
    fn test_repeat_wraps_around() {
        let (dir, labels, config) = scenario();
        let (train, _) = SplitLoader::new(dir.path(), &labels, config).load().unwrap();

        let taken: Vec<_> = train.repeat().take(10).map(|b| b.unwrap().len()).collect();
        assert_eq!(taken.len(), 10);
    }

    #[test]
    fn test_invalid_fraction_is_error() {
        let (dir, labels, mut config) = scenario();
        config.validation_fraction = 1.0;
        assert!(SplitLoader::new(dir.path(), &labels, config).partition().is_err());
    }

    #[test]
    fn test_corrupt_image_is_fatal() {
        let (dir, labels, config) = scenario();
        std::fs::write(dir.path().join("A").join("zz_broken.png"), b"garbage").unwrap();
        let (train, validation) = SplitLoader::new(dir.path(), &labels, config).load().unwrap();
        let failed = train
            .iter()
            .chain(validation.iter())
            .any(|batch| batch.is_err());
        assert!(failed);
    }
}
