//! テスト用の合成データセットとモデル比較ヘルパー

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use image::{Rgb, RgbImage};
use std::path::Path;

/// `root/<class>/NNN.png` 形式の小さなPNGデータセットを作成
///
/// クラスごとに色を変え、画像ごとに少しずつ明るさを変えます。
pub fn write_dataset(root: &Path, classes: &[(&str, usize)], size: u32) {
    for (class_idx, (name, count)) in classes.iter().enumerate() {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..*count {
            let base = (class_idx as u32 * 90 % 256) as u8;
            let shade = (i as u32 * 7 % 64) as u8;
            let img = RgbImage::from_fn(size, size, |x, y| {
                let stripe = if (x + y) % 4 == 0 { 40 } else { 0 };
                Rgb([
                    base.wrapping_add(shade),
                    255 - base,
                    shade + stripe,
                ])
            });
            img.save(dir.join(format!("{:03}.png", i))).unwrap();
        }
    }
}

/// モジュールの全パラメータをバイト列として取得
pub fn record_bytes<B: Backend, M: Module<B>>(module: &M) -> Vec<u8> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(module.clone().into_record(), ())
        .unwrap()
}
