//! 画像の読み込みとバッチ化
//!
//! 画像ファイルをデコード・リサイズ・[0, 1]へ正規化し、
//! BurnのBatcherでテンソルのバッチへまとめます。

use anyhow::{Context, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

/// デコード済みの1サンプル
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// (C, H, W) の順で平坦化した画素値（0.0〜1.0）
    pub pixels: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

impl ImageItem {
    /// 画像を読み込んで正方形にリサイズし、8bit値を[0, 1]へ線形変換
    pub fn load(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("画像のデコードに失敗しました: {}", path.display()))?
            .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
            .to_rgb8();

        let plane = image_size * image_size;
        let mut pixels = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in img.enumerate_pixels() {
            let offset = y as usize * image_size + x as usize;
            for channel in 0..3 {
                pixels[channel * plane + offset] = pixel[channel] as f32 / 255.0;
            }
        }

        Ok(Self {
            pixels,
            label,
            path: path.to_path_buf(),
        })
    }
}

/// CPU上のバッチ（1パス分のイテレータが生成する単位）
#[derive(Clone, Debug)]
pub struct ImageBatch {
    pub items: Vec<ImageItem>,
    pub image_size: usize,
}

impl ImageBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 正解クラスID
    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }

    /// one-hotラベル（サンプルごとに幅 num_classes）
    pub fn one_hot(&self, num_classes: usize) -> Vec<Vec<f32>> {
        self.items
            .iter()
            .map(|item| one_hot_row(item.label, num_classes))
            .collect()
    }

    /// Burnのテンソルバッチへ変換
    pub fn to_tensors<B: Backend>(&self, num_classes: usize, device: &B::Device) -> TransferBatch<B> {
        let batcher = TransferBatcher::new(self.image_size, num_classes);
        <TransferBatcher as Batcher<B, ImageItem, TransferBatch<B>>>::batch(
            &batcher,
            self.items.clone(),
            device,
        )
    }
}

fn one_hot_row(label: usize, num_classes: usize) -> Vec<f32> {
    let mut row = vec![0.0f32; num_classes];
    if let Some(slot) = row.get_mut(label) {
        *slot = 1.0;
    }
    row
}

/// テンソル化されたバッチ
#[derive(Clone, Debug)]
pub struct TransferBatch<B: Backend> {
    /// [batch_size, 3, size, size]
    pub images: Tensor<B, 4>,
    /// one-hotラベル [batch_size, num_classes]
    pub labels: Tensor<B, 2>,
    /// クラスID [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct TransferBatcher {
    image_size: usize,
    num_classes: usize,
}

impl TransferBatcher {
    pub fn new(image_size: usize, num_classes: usize) -> Self {
        Self {
            image_size,
            num_classes,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, TransferBatch<B>> for TransferBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> TransferBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut one_hot = Vec::with_capacity(batch_size * self.num_classes);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            one_hot.extend(one_hot_row(item.label, self.num_classes));
            targets.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(all_pixels, [batch_size, 3, size, size]),
            device,
        );
        let labels = Tensor::<B, 2>::from_data(
            TensorData::new(one_hot, [batch_size, self.num_classes]),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [batch_size]), device);

        TransferBatch {
            images,
            labels,
            targets,
        }
    }
}
