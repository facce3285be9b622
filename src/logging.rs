//! ログ出力の初期化
//!
//! `tracing` のマクロで出力したログを `tracing-subscriber` で標準エラーへ書き出します。

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 表示する最小レベル
    pub level: LogLevel,
    /// モジュールパスを表示するか
    pub include_target: bool,
    /// ANSIカラーを使うか
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// デバッグ用の詳細ログ
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ansi_colors: true,
        }
    }

    /// コマンドライン指定から作成（`level` が `verbose` より優先）
    pub fn from_cli(verbose: bool, level: Option<LogLevel>) -> Self {
        let base = if verbose { Self::verbose() } else { Self::default() };
        match level {
            Some(level) => Self { level, ..base },
            None => base,
        }
    }
}

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => anyhow::bail!("不明なログレベルです: {}", other),
        }
    }
}

/// グローバルなsubscriberを設定（プロセスにつき1回）
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("ログの初期化に失敗しました: {}", e))
}
