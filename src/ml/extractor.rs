//! 特徴抽出器
//!
//! 画像を固定長の特徴ベクトルへ写像する畳み込みネットワーク。
//! 重みは事前学習済みファイルから読み込むことを想定しています。

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use std::path::Path;
use tracing::info;

/// 畳み込みブロック数の上限
pub const MAX_NUM_BLOCKS: usize = 8;

/// 特徴抽出器の設定
#[derive(Config, Debug)]
pub struct ExtractorConfig {
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub input_size: usize,
    /// 最初のブロックのチャネル数（ブロックごとに2倍）
    #[config(default = 32)]
    pub base_channels: usize,
    /// 畳み込みブロック数
    #[config(default = 4)]
    pub num_blocks: usize,
}

impl ExtractorConfig {
    /// 構造の検証
    ///
    /// `feature_dim` と `init` はこの検証を通った設定を前提とします。
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.input_size > 0, "入力画像サイズが0です");
        anyhow::ensure!(self.base_channels > 0, "チャネル数が0です");
        anyhow::ensure!(
            (1..=MAX_NUM_BLOCKS).contains(&self.num_blocks),
            "ブロック数は1以上{}以下で指定してください: {}",
            MAX_NUM_BLOCKS,
            self.num_blocks
        );
        for i in 0..self.num_blocks {
            self.block_channels(i).with_context(|| {
                format!(
                    "チャネル数が大きすぎます: {} (ブロック{})",
                    self.base_channels, i
                )
            })?;
        }
        Ok(())
    }

    /// i番目のブロックの出力チャネル数（桁あふれ時は None）
    fn block_channels(&self, i: usize) -> Option<usize> {
        let scale = 1usize.checked_shl(u32::try_from(i).ok()?)?;
        self.base_channels.checked_mul(scale)
    }

    /// 出力特徴ベクトルの次元
    pub fn feature_dim(&self) -> usize {
        self.block_channels(self.num_blocks.saturating_sub(1))
            .unwrap_or(usize::MAX)
    }

    /// ランダム初期化した特徴抽出器を作成
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureExtractor<B> {
        let mut blocks = Vec::with_capacity(self.num_blocks);
        let mut in_channels = 3;
        for i in 0..self.num_blocks {
            let out_channels = self.block_channels(i).unwrap_or(usize::MAX);
            blocks.push(ConvBlock {
                // 3x3, stride 2 で解像度を半分に
                conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
                activation: Relu::new(),
            });
            in_channels = out_channels;
        }

        FeatureExtractor {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

/// Conv 3x3 + ReLU
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.forward(self.conv.forward(x))
    }
}

/// 特徴抽出器
///
/// # アーキテクチャ
/// - {Conv 3x3 (stride 2) + ReLU} x num_blocks
/// - Global Average Pooling
/// - Flatten -> [batch_size, feature_dim]
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> FeatureExtractor<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - 特徴ベクトル [batch_size, feature_dim]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    /// 事前学習済みの重みを読み込む
    ///
    /// `config` は重みファイルと同じ構造である必要があります。
    pub fn load_pretrained(config: &ExtractorConfig, path: &Path, device: &B::Device) -> Result<Self> {
        info!("事前学習済み特徴抽出器を読み込みます: {}", path.display());
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        config
            .init::<B>(device)
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| anyhow::anyhow!("特徴抽出器の重み読み込みエラー: {:?}", e))
            .with_context(|| format!("読み込み元: {}", path.display()))
    }

    /// 重みをファイルに保存（拡張子 .mpk が付与される）
    pub fn save_weights(self, path: &Path) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.save_file(path.to_path_buf(), &recorder)
            .map_err(|e| anyhow::anyhow!("特徴抽出器の保存エラー: {:?}", e))
    }
}
