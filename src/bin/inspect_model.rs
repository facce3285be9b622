//! 保存済みモデルの確認用バイナリ
//!
//! メタデータを表示し、画像が指定されていれば分類結果も表示します。
//!
//! ```text
//! inspect_model <model.tar.gz> [image ...]
//! ```

use transfer_lab_lib::backend::DefaultBackend;
use transfer_lab_lib::ml::InferenceEngine;
use transfer_lab_lib::model::{load_metadata, print_metadata_info, InferenceConfig};
use std::path::PathBuf;

fn main() {
    println!("=== Transfer Model Inspector ===\n");

    let args: Vec<String> = std::env::args().collect();
    let model_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("models/transfer_classifier.tar.gz")
    };
    let images: Vec<PathBuf> = args.iter().skip(2).map(PathBuf::from).collect();

    println!("Test 1: モデルメタデータ読み込み");
    test_model_metadata(&model_path);

    if images.is_empty() {
        return;
    }

    println!("\n{}\n", "=".repeat(50));

    println!("Test 2: 画像分類");
    test_classification(&model_path, &images);
}

fn test_model_metadata(model_path: &PathBuf) {
    match load_metadata(model_path) {
        Ok(metadata) => {
            println!("✓ モデルメタデータ読み込み成功:");
            print_metadata_info(&metadata);
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            return;
        }
    }

    match InferenceConfig::load_from_model(model_path) {
        Ok(config) => config.print_info(),
        Err(e) => eprintln!("✗ 推論設定エラー: {:#}", e),
    }
}

fn test_classification(model_path: &PathBuf, images: &[PathBuf]) {
    let device = Default::default();
    let engine = match InferenceEngine::<DefaultBackend>::load(model_path, &device) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("✗ モデル読み込みエラー: {:#}", e);
            return;
        }
    };

    for path in images {
        match engine.classify_image(path) {
            Ok((class_name, confidence)) => {
                println!("✓ {}: {} ({:.1}%)", path.display(), class_name, confidence * 100.0);
            }
            Err(e) => {
                eprintln!("✗ {}: {:#}", path.display(), e);
            }
        }
    }
}
