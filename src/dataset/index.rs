//! データセットの索引付け
//!
//! ルートディレクトリ直下のサブディレクトリをクラスとみなし、
//! クラス名の順序付き集合（ラベルセット）と各クラスの画像ファイル一覧を提供します。
//!
//! ```text
//! root/
//! ├── LICENSE.txt   （クラスではない予約済みエントリ）
//! ├── daisy/
//! │   ├── 1001.jpg
//! │   └── ...
//! └── roses/
//!     └── ...
//! ```

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// クラスとして扱わない予約済みエントリ名
pub const RESERVED_ENTRY: &str = "LICENSE.txt";

/// 画像として読み込む拡張子
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 順序付きクラス名集合
///
/// 並び順がone-hotのインデックスを決めるため、学習用と検証用の両方に
/// 同じインスタンスを明示的に渡します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// ルート直下のサブディレクトリからラベルセットを構築（名前順）
    pub fn discover(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            anyhow::bail!("データセットディレクトリが存在しません: {}", root.display());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)
            .with_context(|| format!("ディレクトリの読み込みに失敗しました: {}", root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().into_string().map_err(|raw| {
                anyhow::anyhow!(
                    "クラスディレクトリ名がUTF-8ではありません: {}",
                    raw.to_string_lossy()
                )
            })?;
            if name == RESERVED_ENTRY {
                continue;
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            anyhow::bail!("クラスディレクトリが見つかりません: {}", root.display());
        }

        debug!("{}個のクラスを検出: {}", names.len(), names.join(", "));
        Ok(Self { names })
    }

    /// 指定された順序でラベルセットを構築
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                anyhow::bail!("クラス名が重複しています: {}", name);
            }
        }
        if names.is_empty() {
            anyhow::bail!("ラベルセットが空です");
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// クラスインデックスからクラス名を取得
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }

    /// クラス名からクラスインデックスを取得
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// クラスディレクトリ内の画像ファイルを列挙（パス順）
pub fn list_class_files(root: &Path, class_name: &str) -> Result<Vec<PathBuf>> {
    let class_dir = root.join(class_name);
    if !class_dir.is_dir() {
        anyhow::bail!("クラスディレクトリが存在しません: {}", class_dir.display());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&class_dir)
        .with_context(|| format!("ディレクトリの読み込みに失敗しました: {}", class_dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

/// クラスごとの画像枚数（ラベルセットの順）
pub fn class_counts(root: &Path, labels: &LabelSet) -> Result<Vec<(String, usize)>> {
    labels
        .names()
        .iter()
        .map(|name| Ok((name.clone(), list_class_files(root, name)?.len())))
        .collect()
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
