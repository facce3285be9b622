//! 学習履歴のSVGチャート
//!
//! バッチごとの損失と正解率を折れ線で描画します。

use anyhow::{Context, Result};
use std::path::Path;

use super::{escape_xml, COLOR_AXIS, COLOR_GRID, COLOR_TEXT};
use crate::ml::CollectBatchStats;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_LOSS: &str = "#e74c3c";
const COLOR_ACCURACY: &str = "#3498db";

/// 折れ線の系列
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub color: String,
}

/// 学習履歴（損失・正解率の2系列）をSVGで保存
pub fn generate_history_chart(history: &CollectBatchStats, output_path: &Path) -> Result<()> {
    let series = [
        DataSeries {
            name: "loss".to_string(),
            values: history.batch_losses.clone(),
            color: COLOR_LOSS.to_string(),
        },
        DataSeries {
            name: "accuracy".to_string(),
            values: history.batch_accuracies.clone(),
            color: COLOR_ACCURACY.to_string(),
        },
    ];
    let svg = line_chart_svg("学習履歴", "ステップ", "値", &series);
    std::fs::write(output_path, svg)
        .with_context(|| format!("チャート書き込みエラー: {}", output_path.display()))
}

/// x軸をインデックスとした折れ線グラフ
pub fn line_chart_svg(title: &str, x_label: &str, y_label: &str, series: &[DataSeries]) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let max_len = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let x_max = max_len.saturating_sub(1).max(1) as f64;
    let y_max = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .filter(|v| v.is_finite())
        .fold(1.0f64, f64::max);

    let to_x = |i: usize| MARGIN_LEFT + (i as f64 / x_max) * plot_width;
    let to_y = |v: f64| MARGIN_TOP + plot_height - (v / y_max) * plot_height;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    ));

    // グリッド線とY軸目盛り
    for i in 0..=5 {
        let value = y_max * i as f64 / 5.0;
        let y = to_y(value);
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.2}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            COLOR_TEXT,
            value
        ));
    }

    // 軸
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        MARGIN_LEFT + plot_width,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        COLOR_TEXT,
        escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0,
        COLOR_TEXT,
        CHART_HEIGHT / 2.0,
        escape_xml(y_label)
    ));

    for data in series {
        if data.values.is_empty() {
            continue;
        }
        let path: Vec<String> = data
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let command = if i == 0 { "M" } else { "L" };
                format!("{} {:.2} {:.2}", command, to_x(i), to_y(v))
            })
            .collect();
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            path.join(" "),
            data.color
        ));
    }

    // 凡例
    let mut legend_y = MARGIN_TOP + 10.0;
    for data in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 100.0,
            legend_y,
            data.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 80.0,
            legend_y + 12.0,
            COLOR_TEXT,
            escape_xml(&data.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_chart_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.svg");
        let history = CollectBatchStats {
            batch_losses: vec![1.2, 0.8, 0.5],
            batch_accuracies: vec![0.25, 0.5, 0.75],
        };

        generate_history_chart(&history, &path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches("<path").count(), 2);
        assert!(svg.contains(COLOR_LOSS));
    }

    #[test]
    fn test_empty_history_has_no_lines() {
        let svg = line_chart_svg("t", "x", "y", &[]);
        assert!(!svg.contains("<path"));
    }
}
