//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use anyhow::{Context, Result};
use std::path::Path;

use crate::dataset::LabelSet;
use crate::ml::TransferModelConfig;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// クラスラベル（one-hotのインデックス順）
    pub labels: LabelSet,

    /// モデル入力解像度
    pub image_size: usize,

    /// モデル構造
    pub model: TransferModelConfig,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Result<Self> {
        let labels = LabelSet::from_names(metadata.class_names.clone())
            .context("メタデータのクラス名が不正です")?;
        let model = metadata.model_config();
        model.validate(metadata.image_size)?;

        Ok(Self {
            labels,
            image_size: metadata.image_size,
            model,
        })
    }

    /// モデルファイルから推論設定を読み込む
    pub fn load_from_model(model_path: &Path) -> Result<Self> {
        let metadata =
            model_storage::load_metadata(model_path).context("Failed to load model metadata")?;
        Self::from_metadata(&metadata)
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.labels.name(index)
    }

    /// ラベルからクラスインデックスを取得
    pub fn label_to_index(&self, label: &str) -> Option<usize> {
        self.labels.index_of(label)
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== 推論設定 ===");
        println!("クラス数: {}", self.num_classes());
        println!("クラス: {}", self.labels.names().join(", "));
        println!("モデル入力サイズ: {}x{}", self.image_size, self.image_size);
        println!("特徴量次元: {}", self.model.extractor.feature_dim());
        println!("==================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ExtractorConfig;

    fn metadata(class_names: Vec<String>, image_size: usize) -> ModelMetadata {
        let config = TransferModelConfig::new(
            class_names.len(),
            ExtractorConfig::new().with_input_size(image_size),
        );
        ModelMetadata::new(class_names, &config, None, 1, 4, 42, 0.2)
    }

    #[test]
    fn test_label_lookup() {
        let config =
            InferenceConfig::from_metadata(&metadata(vec!["daisy".into(), "roses".into()], 32))
                .unwrap();
        assert_eq!(config.num_classes(), 2);
        assert_eq!(config.class_index_to_label(1), Some("roses"));
        assert_eq!(config.class_index_to_label(2), None);
        assert_eq!(config.label_to_index("daisy"), Some(0));
    }

    #[test]
    fn test_duplicate_class_names_rejected() {
        let result = InferenceConfig::from_metadata(&metadata(vec!["a".into(), "a".into()], 32));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_model_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let saved = metadata(vec!["daisy".into(), "roses".into(), "tulips".into()], 32);
        model_storage::save_model_with_metadata(&path, &saved, &[0u8]).unwrap();

        let config = InferenceConfig::load_from_model(&path).unwrap();
        assert_eq!(config.num_classes(), 3);
        assert_eq!(config.image_size, 32);
        assert_eq!(config.class_index_to_label(2), Some("tulips"));

        assert!(InferenceConfig::load_from_model(&dir.path().join("missing.tar.gz")).is_err());
    }

    #[test]
    fn test_blockless_extractor_in_metadata_rejected() {
        let mut metadata = metadata(vec!["daisy".into(), "roses".into()], 32);
        metadata.num_blocks = 0;
        assert!(InferenceConfig::from_metadata(&metadata).is_err());

        metadata.num_blocks = 2;
        metadata.base_channels = 0;
        assert!(InferenceConfig::from_metadata(&metadata).is_err());
    }
}
