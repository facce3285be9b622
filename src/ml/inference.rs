//! モデル推論機能

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use std::path::Path;

use crate::dataset::{ImageBatch, ImageItem};
use crate::ml::TransferClassifier;
use crate::model::{load_model_with_metadata, InferenceConfig, ModelMetadata};

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: TransferClassifier<B>,
    config: InferenceConfig,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// tar.gzモデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: &B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        let config = InferenceConfig::from_metadata(&metadata)?;

        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = config.model.init::<B>(device).load_record(record);

        Ok(Self {
            model,
            config,
            metadata,
            device: device.clone(),
        })
    }

    /// 単一画像を分類（クラス名と確率）
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<(String, f32)> {
        let mut results = self.classify_batch(&[image_path])?;
        results
            .pop()
            .context("推論結果が空です")
    }

    /// 複数画像をまとめて分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<(String, f32)>> {
        if image_paths.is_empty() {
            return Ok(Vec::new());
        }

        let items = image_paths
            .iter()
            .map(|path| ImageItem::load(path.as_ref(), 0, self.config.image_size))
            .collect::<Result<Vec<_>>>()?;
        let batch = ImageBatch {
            items,
            image_size: self.config.image_size,
        };
        let tensors = batch.to_tensors::<B>(self.config.num_classes(), &self.device);

        let (predicted, probabilities) = self.model.predict(tensors.images);
        let predicted: Vec<i64> = predicted.into_data().iter::<i64>().collect();
        let probabilities: Vec<f32> = probabilities.into_data().iter::<f32>().collect();
        let num_classes = self.config.num_classes();

        predicted
            .into_iter()
            .enumerate()
            .map(|(i, class_idx)| {
                let class_idx = class_idx as usize;
                let name = self
                    .config
                    .class_index_to_label(class_idx)
                    .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_idx))?;
                Ok((name.to_string(), probabilities[i * num_classes + class_idx]))
            })
            .collect()
    }

    /// 読み込んだモデル本体
    pub fn model(&self) -> &TransferClassifier<B> {
        &self.model
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
