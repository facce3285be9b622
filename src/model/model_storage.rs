//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス名、モデル構造、学習設定など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// `.gz` で終わらないパスには `.tar.gz` を付ける
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
///
/// 実際に書き込んだパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    let json = metadata.to_json_string()?;
    append_entry(&mut builder, METADATA_ENTRY, json.as_bytes())?;
    append_entry(&mut builder, MODEL_ENTRY, model_binary)?;

    builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// アーカイブ内の指定エントリを読み込む
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut found = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().to_string();
        if wanted.contains(&name.as_str()) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found.push((name, buffer));
        }
    }
    Ok(found)
}

fn take_entry(entries: &mut Vec<(String, Vec<u8>)>, name: &str) -> Result<Vec<u8>> {
    let index = entries
        .iter()
        .position(|(entry, _)| entry == name)
        .ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", name))?;
    Ok(entries.swap_remove(index).1)
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    parse_metadata(take_entry(&mut entries, METADATA_ENTRY)?)
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let mut entries = read_entries(tar_gz_path, &[MODEL_ENTRY])?;
    take_entry(&mut entries, MODEL_ENTRY)
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?;
    let metadata = parse_metadata(take_entry(&mut entries, METADATA_ENTRY)?)?;
    let binary = take_entry(&mut entries, MODEL_ENTRY)?;
    Ok((metadata, binary))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス ({}): {}", metadata.class_names.len(), metadata.class_names.join(", "));
    println!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    println!("特徴抽出器:");
    println!("  ブロック数: {}", metadata.num_blocks);
    println!("  基本チャネル数: {}", metadata.base_channels);
    println!("  固定: {}", if metadata.freeze_extractor { "はい" } else { "いいえ" });
    if let Some(ref handle) = metadata.extractor_handle {
        println!("  事前学習済み重み: {}", handle);
    }
    println!("学習エポック数: {}", metadata.num_epochs);
    println!("バッチサイズ: {}", metadata.batch_size);
    println!("分割: シード {} / 検証割合 {}", metadata.seed, metadata.validation_fraction);
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ExtractorConfig, TransferModelConfig};

    fn sample_metadata() -> ModelMetadata {
        let config = TransferModelConfig::new(2, ExtractorConfig::new().with_input_size(32));
        ModelMetadata::new(vec!["cat".into(), "dog".into()], &config, None, 2, 8, 7, 0.25)
    }

    #[test]
    fn test_save_and_load_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.tar.gz");
        let metadata = sample_metadata();
        let binary = vec![1u8, 2, 3, 4, 5];

        let written = save_model_with_metadata(&path, &metadata, &binary).unwrap();
        assert_eq!(written, path);

        assert_eq!(load_metadata(&path).unwrap(), metadata);
        assert_eq!(load_model_binary(&path).unwrap(), binary);
        let (loaded_metadata, loaded_binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded_metadata, metadata);
        assert_eq!(loaded_binary, binary);
    }

    #[test]
    fn test_extension_is_added() {
        let dir = tempfile::tempdir().unwrap();
        let written =
            save_model_with_metadata(&dir.path().join("model"), &sample_metadata(), &[0u8])
                .unwrap();
        assert_eq!(written, dir.path().join("model.tar.gz"));
        assert!(written.exists());
    }

    #[test]
    fn test_missing_archive_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_metadata(&dir.path().join("none.tar.gz")).is_err());
    }
}
