//! モデルメタデータの定義
//!
//! tar.gz形式でモデルの重みと一緒に保存され、推論時のモデル再構築に使用します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::{ExtractorConfig, TransferModelConfig};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// クラス名（one-hotのインデックス順）
    pub class_names: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 特徴抽出器の最初のブロックのチャネル数
    pub base_channels: usize,

    /// 特徴抽出器の畳み込みブロック数
    pub num_blocks: usize,

    /// 特徴抽出器を固定して学習したか
    #[serde(default)]
    pub freeze_extractor: bool,

    /// 事前学習済み特徴抽出器の参照（URLまたはパス）
    #[serde(default)]
    pub extractor_handle: Option<String>,

    /// 学習エポック数
    pub num_epochs: usize,

    /// バッチサイズ
    pub batch_size: usize,

    /// 分割シード
    pub seed: u64,

    /// 検証用の割合
    pub validation_fraction: f64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 学習時の設定からメタデータを作成
    pub fn new(
        class_names: Vec<String>,
        model_config: &TransferModelConfig,
        extractor_handle: Option<String>,
        num_epochs: usize,
        batch_size: usize,
        seed: u64,
        validation_fraction: f64,
    ) -> Self {
        Self {
            class_names,
            image_size: model_config.extractor.input_size,
            base_channels: model_config.extractor.base_channels,
            num_blocks: model_config.extractor.num_blocks,
            freeze_extractor: model_config.freeze_extractor,
            extractor_handle,
            num_epochs,
            batch_size,
            seed,
            validation_fraction,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// モデル構造を復元
    pub fn model_config(&self) -> TransferModelConfig {
        TransferModelConfig::new(
            self.class_names.len(),
            ExtractorConfig::new()
                .with_input_size(self.image_size)
                .with_base_channels(self.base_channels)
                .with_num_blocks(self.num_blocks),
        )
        .with_freeze_extractor(self.freeze_extractor)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
