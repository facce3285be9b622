//! 転移学習モデル
//!
//! 特徴抽出器の出力を、新しく初期化した全結合層（softmax）へつなぎます。

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Int, Tensor,
    },
};

use super::extractor::{ExtractorConfig, FeatureExtractor};

/// モデル設定
#[derive(Config, Debug)]
pub struct TransferModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 特徴抽出器の構造
    pub extractor: ExtractorConfig,
    /// 特徴抽出器のパラメータを固定するか
    #[config(default = false)]
    pub freeze_extractor: bool,
}

impl TransferModelConfig {
    /// 設定値の検証
    pub fn validate(&self, image_size: usize) -> Result<()> {
        anyhow::ensure!(self.num_classes > 0, "クラス数が0です");
        self.extractor.validate()?;
        anyhow::ensure!(
            image_size == self.extractor.input_size,
            "入力画像サイズ({}x{})が特徴抽出器の入力サイズ({}x{})と一致しません",
            image_size,
            image_size,
            self.extractor.input_size,
            self.extractor.input_size
        );
        Ok(())
    }

    /// ランダム初期化した特徴抽出器でモデルを作成
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransferClassifier<B> {
        self.assemble(self.extractor.init(device), device)
    }

    /// 既存の（事前学習済み）特徴抽出器に新しい分類層をつなぐ
    pub fn assemble<B: Backend>(
        &self,
        extractor: FeatureExtractor<B>,
        device: &B::Device,
    ) -> TransferClassifier<B> {
        let extractor = if self.freeze_extractor {
            extractor.no_grad()
        } else {
            extractor
        };

        TransferClassifier {
            extractor,
            head: LinearConfig::new(self.extractor.feature_dim(), self.num_classes).init(device),
        }
    }
}

/// 特徴抽出器 + 分類層
#[derive(Module, Debug)]
pub struct TransferClassifier<B: Backend> {
    extractor: FeatureExtractor<B>,
    head: Linear<B>,
}

impl<B: Backend> TransferClassifier<B> {
    /// 分類層のロジット [batch_size, num_classes]
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.extractor.forward(images);
        self.head.forward(features)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(images), 1)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID [batch_size], 確率 [batch_size, num_classes])
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 1, Int>, Tensor<B, 2>) {
        let probabilities = self.forward(images);
        let [batch_size, _] = probabilities.dims();
        let predictions = probabilities.clone().argmax(1).reshape([batch_size]);
        (predictions, probabilities)
    }

    /// one-hotラベルに対するカテゴリカル交差エントロピー（バッチ平均）
    pub fn loss(&self, logits: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
        (labels * log_softmax(logits, 1))
            .sum_dim(1)
            .mean()
            .neg()
    }

    pub fn extractor(&self) -> &FeatureExtractor<B> {
        &self.extractor
    }

    pub fn num_classes(&self) -> usize {
        self.head.weight.val().dims()[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{ElementConversion, TensorData};

    fn config(num_classes: usize) -> TransferModelConfig {
        TransferModelConfig::new(
            num_classes,
            ExtractorConfig::new()
                .with_input_size(16)
                .with_base_channels(4)
                .with_num_blocks(2),
        )
    }

    #[test]
    fn test_output_width_equals_class_count() {
        let device = Default::default();
        let model = config(5).init::<NdArray>(&device);
        assert_eq!(model.num_classes(), 5);

        let images = Tensor::<NdArray, 4>::ones([2, 3, 16, 16], &device);
        let probabilities = model.forward(images);
        assert_eq!(probabilities.dims(), [2, 5]);

        let sums: Vec<f32> = probabilities.sum_dim(1).into_data().iter::<f32>().collect();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_predict_in_range() {
        let device = Default::default();
        let model = config(3).init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::random(
            [4, 3, 16, 16],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let (predictions, _) = model.predict(images);
        let predictions: Vec<i64> = predictions.into_data().iter::<i64>().collect();
        assert_eq!(predictions.len(), 4);
        assert!(predictions.iter().all(|&p| (0..3).contains(&p)));
    }

    #[test]
    fn test_loss_matches_cross_entropy() {
        let device = Default::default();
        let model = config(2).init::<NdArray>(&device);
        // 等確率なら損失は ln(2)
        let logits = Tensor::<NdArray, 2>::zeros([2, 2], &device);
        let labels = Tensor::<NdArray, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0], [2, 2]),
            &device,
        );
        let loss: f32 = model.loss(logits, labels).into_scalar().elem();
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_validate_rejects_size_mismatch() {
        let config = config(2);
        assert!(config.validate(16).is_ok());
        assert!(config.validate(224).is_err());
        assert!(TransferModelConfig::new(0, ExtractorConfig::new()).validate(224).is_err());
    }

    #[test]
    fn test_validate_rejects_broken_extractor() {
        let blockless = TransferModelConfig::new(
            2,
            ExtractorConfig::new()
                .with_input_size(16)
                .with_base_channels(4)
                .with_num_blocks(0),
        );
        assert!(blockless.validate(16).is_err());

        let channelless = TransferModelConfig::new(
            2,
            ExtractorConfig::new().with_input_size(16).with_base_channels(0),
        );
        assert!(channelless.validate(16).is_err());

        let too_deep = TransferModelConfig::new(
            2,
            ExtractorConfig::new().with_input_size(16).with_num_blocks(64),
        );
        assert!(too_deep.validate(16).is_err());
    }
}
