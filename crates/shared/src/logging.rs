use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログの出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 構造化ログ（サーバー向け）
    Json,
    /// 人が読む形式で標準エラーへ（CLI 向け）
    Compact,
}

/// トレーシングサブスクライバーを初期化
/// 出力レベルは RUST_LOG 環境変数で制御する。未設定時はサーバーが info、CLI が warn
pub fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_level = match format {
        LogFormat::Json => "info",
        LogFormat::Compact => "warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false).json())
            .with(filter)
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()?,
    }

    Ok(())
}
