//! 転移学習による画像分類 CLI

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use transfer_lab_lib::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use transfer_lab_lib::dataset::{class_counts, LabelSet};
use transfer_lab_lib::fetch::ensure_dataset;
use transfer_lab_lib::logging::{init_logging, LogConfig, LogLevel};
use transfer_lab_lib::ml::InferenceEngine;
use transfer_lab_lib::model::{load_metadata, print_metadata_info, AppConfig};
use transfer_lab_lib::pipeline;

/// 事前学習済み特徴抽出器 + 分類層による画像分類
#[derive(Parser, Debug)]
#[command(name = "transfer_lab")]
#[command(version)]
#[command(about = "Transfer-learning image classification with Burn", long_about = None)]
struct Cli {
    /// 設定ファイル（JSON）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// デバッグログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    /// ログレベル（trace, debug, info, warn, error）
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

/// レポートのバッチ上限（`--limit N` または `--all`）
#[derive(Args, Debug, Default)]
struct LimitArgs {
    /// 描画するバッチ数の上限
    #[arg(long, conflicts_with = "all")]
    limit: Option<usize>,

    /// 全バッチを描画
    #[arg(long)]
    all: bool,
}

impl LimitArgs {
    fn apply(&self, config: &mut AppConfig) {
        if self.all {
            config.report.batch_limit = None;
        } else if let Some(limit) = self.limit {
            config.report.batch_limit = Some(limit);
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// データセットをダウンロードして展開
    Fetch {
        /// アーカイブのURL
        #[arg(long)]
        url: Option<String>,

        /// ダウンロード先
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// クラス一覧と画像枚数を表示
    Classes {
        /// データセットのルート（クラスごとのサブディレクトリを含む）
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// 学習・保存・予測レポートを実行
    Train {
        /// データセットのルート
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// 事前学習済み特徴抽出器（URLまたはパス）
        #[arg(long)]
        extractor: Option<String>,

        /// 特徴抽出器を固定して分類層のみ学習
        #[arg(long)]
        freeze: bool,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// モデルの保存先（.tar.gz）
        #[arg(short, long)]
        output: Option<String>,

        #[command(flatten)]
        limit: LimitArgs,
    },

    /// 保存済みモデルで検証用バッチの予測レポートを作成
    Report {
        #[arg(short, long)]
        model: Option<PathBuf>,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[command(flatten)]
        limit: LimitArgs,
    },

    /// 画像を分類
    Predict {
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// 分類する画像（複数可）
        #[arg(short, long, num_args = 1.., required = true)]
        input: Vec<PathBuf>,
    },

    /// モデルのメタデータを表示
    Inspect {
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig::from_cli(cli.verbose, cli.log_level))?;

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path);

    match cli.command {
        Commands::Fetch { url, data_dir } => {
            if let Some(url) = url {
                config.data.dataset_url = url;
            }
            if let Some(data_dir) = data_dir {
                config.data.data_dir = data_dir;
            }
            let extracted = ensure_dataset(&config.data.dataset_url, Path::new(&config.data.data_dir))?;
            println!("データセット: {}", extracted.display());
        }

        Commands::Classes { data_dir } => {
            let dataset_dir = data_dir.unwrap_or_else(|| config.dataset_dir());
            let labels = LabelSet::discover(&dataset_dir)?;
            println!("=== クラス一覧 ({}) ===", dataset_dir.display());
            for (index, (name, count)) in class_counts(&dataset_dir, &labels)?.into_iter().enumerate() {
                println!("  [{}] {}: {}枚", index, name, count);
            }
        }

        Commands::Train {
            data_dir,
            extractor,
            freeze,
            epochs,
            batch_size,
            seed,
            output,
            limit,
        } => {
            if extractor.is_some() {
                config.model.extractor = extractor;
            }
            if freeze {
                config.model.freeze_extractor = true;
            }
            if let Some(epochs) = epochs {
                config.training.num_epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(seed) = seed {
                config.data.seed = seed;
            }
            if let Some(output) = output {
                config.model.model_path = output;
            }
            limit.apply(&mut config);

            let dataset_dir = data_dir.unwrap_or_else(|| config.dataset_dir());
            let device = default_device(config.device_type)?;
            info!("バックエンド: {}", backend_name());
            if cli.verbose {
                config.display();
            }

            let outcome = pipeline::train::<TrainingBackend>(&config, &dataset_dir, &device)?;
            println!("\n=== 学習完了 ===");
            println!("クラス: {}", outcome.labels.names().join(", "));
            println!("学習ステップ数: {}", outcome.history.len());
            println!("モデル: {}", outcome.model_path.display());
            println!(
                "予測レポート: {} バッチ / 正解率 {:.2}% ({})",
                outcome.report.batches_rendered,
                outcome.report.accuracy() * 100.0,
                config.report.output_dir
            );
        }

        Commands::Report {
            model,
            data_dir,
            limit,
        } => {
            limit.apply(&mut config);
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            let dataset_dir = data_dir.unwrap_or_else(|| config.dataset_dir());
            let device = default_device(config.device_type)?;

            let summary =
                pipeline::report::<DefaultBackend>(&config, &model_path, &dataset_dir, &device)?;
            println!(
                "予測レポート: {} バッチ / {} 枚 / 正解率 {:.2}%",
                summary.batches_rendered,
                summary.samples,
                summary.accuracy() * 100.0
            );
        }

        Commands::Predict { model, input } => {
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            let device = default_device(config.device_type)?;
            let engine = InferenceEngine::<DefaultBackend>::load(&model_path, &device)?;

            for (path, (class_name, confidence)) in input.iter().zip(engine.classify_batch(&input)?) {
                println!("{}: {} ({:.1}%)", path.display(), class_name, confidence * 100.0);
            }
        }

        Commands::Inspect { model } => {
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            print_metadata_info(&load_metadata(&model_path)?);
        }
    }

    Ok(())
}
