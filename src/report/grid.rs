//! 予測結果の画像グリッド（SVG）
//!
//! 各セルにサムネイル画像（base64のPNG）と予測クラス名を表示します。
//! 正解は緑、不正解は赤で、不正解の場合は正解クラス名も併記します。

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{escape_xml, COLOR_TEXT};
use crate::dataset::LabelSet;
use crate::ml::{BatchReport, Prediction, ReportSink};

const COLOR_CORRECT: &str = "#27ae60";
const COLOR_WRONG: &str = "#c0392b";
const CAPTION_HEIGHT: u32 = 36;
const PADDING: u32 = 8;
const TITLE_HEIGHT: u32 = 40;

/// SVGファイルへ書き出すレポート出力先
pub struct SvgGridSink {
    output_dir: PathBuf,
    columns: usize,
    thumbnail_size: u32,
    written: Vec<PathBuf>,
}

impl SvgGridSink {
    pub fn new(output_dir: &Path, columns: usize, thumbnail_size: u32) -> Result<Self> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("出力ディレクトリ作成エラー: {}", output_dir.display()))?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            columns: columns.max(1),
            thumbnail_size: thumbnail_size.max(1),
            written: Vec::new(),
        })
    }

    /// 書き出したファイル一覧
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn cell(&self, prediction: &Prediction, labels: &LabelSet, x: u32, y: u32) -> Result<String> {
        let size = self.thumbnail_size;
        let data_uri = thumbnail_data_uri(&prediction.path, size)?;
        let predicted = labels.name(prediction.predicted).unwrap_or("?");

        let (color, caption) = if prediction.is_correct() {
            (COLOR_CORRECT, predicted.to_string())
        } else {
            let actual = labels.name(prediction.actual).unwrap_or("?");
            (COLOR_WRONG, format!("{} (正解: {})", predicted, actual))
        };

        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<image x="{}" y="{}" width="{}" height="{}" href="{}"/>"#,
            x, y, size, size, data_uri
        ));
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            x, y, size, size, color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            x + size / 2,
            y + size + 14,
            color,
            escape_xml(&caption)
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="10" fill="{}">{:.1}%</text>"#,
            x + size / 2,
            y + size + 28,
            COLOR_TEXT,
            prediction.confidence * 100.0
        ));
        Ok(svg)
    }
}

impl ReportSink for SvgGridSink {
    fn render(&mut self, report: &BatchReport, labels: &LabelSet) -> Result<()> {
        let count = report.predictions.len();
        let columns = self.columns.min(count.max(1));
        let rows = count.div_ceil(columns).max(1);

        let cell_width = self.thumbnail_size + PADDING * 2;
        let cell_height = self.thumbnail_size + CAPTION_HEIGHT + PADDING * 2;
        let width = cell_width * columns as u32;
        let height = TITLE_HEIGHT + cell_height * rows as u32;

        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
            width, height, width, height
        ));
        svg.push_str(&format!(
            r#"<rect width="{}" height="{}" fill="white"/>"#,
            width, height
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="26" text-anchor="middle" font-family="Arial, sans-serif" font-size="16" font-weight="bold" fill="{}">{}</text>"#,
            width / 2,
            COLOR_TEXT,
            escape_xml(&format!(
                "バッチ {}: 正解 {}/{}",
                report.batch_index + 1,
                report.correct(),
                count
            ))
        ));

        for (i, prediction) in report.predictions.iter().enumerate() {
            let x = (i % columns) as u32 * cell_width + PADDING;
            let y = TITLE_HEIGHT + (i / columns) as u32 * cell_height + PADDING;
            svg.push_str(&self.cell(prediction, labels, x, y)?);
        }

        svg.push_str("</svg>");

        let path = self
            .output_dir
            .join(format!("predictions_{:03}.svg", report.batch_index));
        std::fs::write(&path, svg).with_context(|| format!("SVG書き込みエラー: {}", path.display()))?;
        debug!("予測グリッドを書き出しました: {}", path.display());
        self.written.push(path);

        Ok(())
    }
}

/// 画像を縮小してPNGのdata URIにする
fn thumbnail_data_uri(path: &Path, size: u32) -> Result<String> {
    let thumbnail = image::open(path)
        .with_context(|| format!("画像のデコードに失敗しました: {}", path.display()))?
        .resize_exact(size, size, FilterType::Triangle);

    let mut buffer = Vec::new();
    thumbnail
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .context("サムネイルのPNGエンコードに失敗しました")?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&buffer)))
}
