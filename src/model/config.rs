//! アプリケーション設定管理モジュール
//!
//! データセットの場所、計算デバイス、学習・レポート設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::SplitConfig;
use crate::ml::BatchLimit;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド（`wgpu` フィーチャー有効時のみ）
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// データセットアーカイブのURL
    pub dataset_url: String,
    /// ダウンロード・展開先
    pub data_dir: String,
    /// 検証用の割合
    pub validation_fraction: f64,
    /// 分割・シャッフルのシード
    pub seed: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dataset_url: crate::DEFAULT_DATASET_URL.to_string(),
            data_dir: "data".to_string(),
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// 保存・読み込みするモデルファイルのパス（.tar.gz）
    pub model_path: String,
    /// 事前学習済み特徴抽出器（URLまたはパス、未指定ならランダム初期化）
    pub extractor: Option<String>,
    /// 特徴抽出器のキャッシュ先
    pub cache_dir: String,
    /// モデル入力サイズ（正方形）
    pub image_size: usize,
    /// 特徴抽出器の最初のブロックのチャネル数
    pub base_channels: usize,
    /// 特徴抽出器のブロック数
    pub num_blocks: usize,
    /// 特徴抽出器を固定するか
    pub freeze_extractor: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/transfer_classifier.tar.gz".to_string(),
            extractor: None,
            cache_dir: "models/cache".to_string(),
            image_size: 224,
            base_channels: 32,
            num_blocks: 4,
            freeze_extractor: false,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 3,
            batch_size: 32,
            learning_rate: 1e-3,
        }
    }
}

/// 予測レポート設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// 描画するバッチ数の上限（nullで全バッチ）
    pub batch_limit: Option<usize>,
    /// 出力ディレクトリ
    pub output_dir: String,
    /// グリッドの列数
    pub grid_columns: usize,
    /// サムネイルの一辺（ピクセル）
    pub thumbnail_size: u32,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            batch_limit: Some(2),
            output_dir: "output".to_string(),
            grid_columns: 8,
            thumbnail_size: 96,
        }
    }
}

impl ReportSettings {
    pub fn limit(&self) -> BatchLimit {
        BatchLimit::from_option(self.batch_limit)
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データセット設定
    pub data: DataSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// レポート設定
    pub report: ReportSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 分割ローダー用の設定
    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            batch_size: self.training.batch_size,
            image_size: self.model.image_size,
            seed: self.data.seed,
            validation_fraction: self.data.validation_fraction,
        }
    }

    /// 展開済みデータセットのディレクトリ（URLのアーカイブ名から決まる）
    pub fn dataset_dir(&self) -> PathBuf {
        let stem = crate::fetch::archive_stem(&self.data.dataset_url)
            .unwrap_or_else(|| "dataset".to_string());
        Path::new(&self.data.data_dir).join(stem)
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("データセットURL: {}", self.data.dataset_url);
        println!("データディレクトリ: {}", self.data.data_dir);
        println!("検証割合: {} / シード: {}", self.data.validation_fraction, self.data.seed);
        println!("\n--- モデル設定 ---");
        println!("モデルパス: {}", self.model.model_path);
        println!(
            "特徴抽出器: {}",
            self.model.extractor.as_deref().unwrap_or("(ランダム初期化)")
        );
        println!("入力サイズ: {}x{}", self.model.image_size, self.model.image_size);
        println!("特徴抽出器を固定: {}", self.model.freeze_extractor);
        println!("\n--- トレーニング設定 ---");
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("\n--- レポート設定 ---");
        println!("バッチ上限: {}", self.report.limit());
        println!("出力先: {}", self.report.output_dir);
        println!("========================\n");
    }
}
