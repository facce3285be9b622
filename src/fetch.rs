//! データセットと事前学習済み特徴抽出器の取得
//!
//! どちらもローカルに存在すればダウンロード・展開を省略します。

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// URLの最後のパス要素（アーカイブのファイル名）
pub fn archive_file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| segment.to_string())
}

/// アーカイブ名から展開先ディレクトリ名を求める（`flower_photos.tgz` -> `flower_photos`）
pub fn archive_stem(url: &str) -> Option<String> {
    let name = archive_file_name(url)?;
    let stem = [".tar.gz", ".tgz", ".tar"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(&name);
    Some(stem.to_string())
}

/// データセットを取得して展開済みディレクトリを返す
///
/// アーカイブ・展開済みディレクトリが既にあればそれぞれ省略します。
pub fn ensure_dataset(url: &str, data_dir: &Path) -> Result<PathBuf> {
    let file_name =
        archive_file_name(url).with_context(|| format!("URLからファイル名を決定できません: {}", url))?;
    let stem = archive_stem(url).unwrap_or_else(|| file_name.clone());

    let archive = data_dir.join(&file_name);
    download_if_missing(url, &archive)?;
    extract_if_missing(&archive, data_dir, &stem)
}

/// ファイルが無ければダウンロードする
pub fn download_if_missing(url: &str, destination: &Path) -> Result<()> {
    if destination.exists() {
        info!("ダウンロード済みのため省略します: {}", destination.display());
        return Ok(());
    }

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("ディレクトリ作成エラー: {}", parent.display()))?;
    }

    info!("ダウンロード中: {}", url);
    let response = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("ダウンロードに失敗しました: {}", url))?;
    let written = write_streamed(response, destination)?;

    info!("ダウンロード完了: {} ({} bytes)", destination.display(), written);
    Ok(())
}

/// 読み込み元を一時ファイル（`.part`）へ逐次書き込み、完了後に移動する
fn write_streamed<R: Read>(mut reader: R, destination: &Path) -> Result<u64> {
    let partial = destination.with_extension("part");
    let mut file = File::create(&partial)
        .with_context(|| format!("ファイル作成エラー: {}", partial.display()))?;
    let written = std::io::copy(&mut reader, &mut file)
        .with_context(|| format!("書き込みに失敗しました: {}", partial.display()))?;
    file.flush()?;
    drop(file);
    std::fs::rename(&partial, destination)
        .with_context(|| format!("ファイル移動エラー: {}", destination.display()))?;
    Ok(written)
}

/// `data_dir/target` が無ければ tar.gz を `data_dir` に展開する
pub fn extract_if_missing(archive: &Path, data_dir: &Path, target: &str) -> Result<PathBuf> {
    let extracted = data_dir.join(target);
    if extracted.is_dir() {
        info!("展開済みのため省略します: {}", extracted.display());
        return Ok(extracted);
    }

    info!("展開中: {}", archive.display());
    let file =
        File::open(archive).with_context(|| format!("アーカイブを開けません: {}", archive.display()))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(data_dir)
        .with_context(|| format!("展開に失敗しました: {}", archive.display()))?;

    anyhow::ensure!(
        extracted.is_dir(),
        "展開後に {} が見つかりません",
        extracted.display()
    );
    Ok(extracted)
}

/// 特徴抽出器の参照（URLまたはパス）をローカルファイルのパスに解決
///
/// - `http`/`https`: `cache_dir` に一度だけダウンロード
/// - `file://` とパス: そのまま（存在しなければエラー）
pub fn resolve_extractor(handle: &str, cache_dir: &Path) -> Result<PathBuf> {
    let local = match Url::parse(handle) {
        // Windowsのドライブレター（C:\...）はURLとして解釈されるのでパス扱い
        Ok(url) if url.scheme().len() > 1 => match url.scheme() {
            "http" | "https" => {
                let file_name = archive_file_name(handle)
                    .with_context(|| format!("URLからファイル名を決定できません: {}", handle))?;
                let destination = cache_dir.join(file_name);
                download_if_missing(handle, &destination)?;
                destination
            }
            "file" => url
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("不正なfile URLです: {}", handle))?,
            scheme => anyhow::bail!("未対応のスキームです: {} ({})", scheme, handle),
        },
        _ => PathBuf::from(handle),
    };

    anyhow::ensure!(
        local.is_file(),
        "特徴抽出器の重みファイルが見つかりません: {}",
        local.display()
    );
    debug!("特徴抽出器: {} -> {}", handle, local.display());
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_archive(path: &Path) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let content = b"image";
        let mut header = tar::Header::new_gnu();
        header.set_path("flower_photos/daisy/001.jpg").unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &content[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_archive_names() {
        let url = "https://storage.googleapis.com/download.tensorflow.org/example_images/flower_photos.tgz";
        assert_eq!(archive_file_name(url).as_deref(), Some("flower_photos.tgz"));
        assert_eq!(archive_stem(url).as_deref(), Some("flower_photos"));
        assert_eq!(
            archive_stem("https://example.com/a/data.tar.gz").as_deref(),
            Some("data")
        );
        assert_eq!(archive_file_name("not a url"), None);
    }

    #[test]
    fn test_write_streamed_moves_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("flower_photos.tgz");
        let payload = vec![7u8; 200_000];

        let written = write_streamed(std::io::Cursor::new(payload.clone()), &destination).unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&destination).unwrap(), payload);
        assert!(!destination.with_extension("part").exists());
    }

    #[test]
    fn test_extract_if_missing_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("flower_photos.tgz");
        write_archive(&archive);

        let extracted = extract_if_missing(&archive, dir.path(), "flower_photos").unwrap();
        assert!(extracted.join("daisy").join("001.jpg").is_file());

        // 2回目はアーカイブを読まない
        std::fs::remove_file(&archive).unwrap();
        let again = extract_if_missing(&archive, dir.path(), "flower_photos").unwrap();
        assert_eq!(again, extracted);
    }

    #[test]
    fn test_ensure_dataset_uses_local_files() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(&dir.path().join("flower_photos.tgz"));

        // アーカイブが既にあるのでネットワークには接続しない
        let extracted =
            ensure_dataset("https://invalid.invalid/flower_photos.tgz", dir.path()).unwrap();
        assert_eq!(extracted, dir.path().join("flower_photos"));
    }

    #[test]
    fn test_resolve_extractor_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("extractor.mpk");
        std::fs::write(&weights, b"weights").unwrap();

        let plain = resolve_extractor(weights.to_str().unwrap(), dir.path()).unwrap();
        assert_eq!(plain, weights);

        let file_url = Url::from_file_path(&weights).unwrap();
        assert_eq!(resolve_extractor(file_url.as_str(), dir.path()).unwrap(), weights);

        let cached = dir.path().join("remote.mpk");
        std::fs::write(&cached, b"weights").unwrap();
        assert_eq!(
            resolve_extractor("https://invalid.invalid/models/remote.mpk", dir.path()).unwrap(),
            cached
        );
    }

    #[test]
    fn test_resolve_extractor_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_extractor(dir.path().join("none.mpk").to_str().unwrap(), dir.path()).is_err());
        assert!(resolve_extractor("ftp://example.com/x.mpk", dir.path()).is_err());
    }
}
