//! Брокер mxbus.
//!
//! Читает настройки (файл, `MX_*`, аргументы), поднимает логирование,
//! печатает баннер и обслуживает компоненты до Ctrl-C или кадра `Quit`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mxbus::{
    init_logging,
    network::banner::{print_banner, print_startup_log, BannerInfo},
    Broker, LogFormat, Settings,
};
use tracing::{info, warn};

/// Аргументы командной строки брокера.
#[derive(Parser, Debug)]
#[command(name = "mxbus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "mxbus - message-exchange bus broker", long_about = None)]
struct Cli {
    /// Имя шины (определяет порт по умолчанию)
    #[arg(short, long, env = "MX_NAME")]
    name: Option<String>,
    /// Адрес для прослушивания
    #[arg(short = 'H', long, env = "MX_HOST")]
    host: Option<String>,
    /// Порт для прослушивания
    #[arg(short, long, env = "MX_PORT")]
    port: Option<u16>,
    /// TOML-файл с настройками
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Уровень логирования (или директива EnvFilter)
    #[arg(long, env = "MX_LOG_LEVEL")]
    log_level: Option<String>,
    /// Формат логов: json, pretty, compact
    #[arg(long, env = "MX_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if cli.name.is_some() {
        settings.name = cli.name;
    }
    if cli.host.is_some() {
        settings.host = cli.host;
    }
    if cli.port.is_some() {
        settings.port = cli.port;
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    if let Some(format) = cli.log_format {
        settings.log_format = format;
    }

    let logging = init_logging(settings.logging_config()).context("initializing logging")?;

    let config = settings.broker_config();
    let broker = Broker::bind(config)
        .await
        .context("starting broker")?;

    let bus = broker.config().name.clone();
    let listen = broker.local_addr().ip().to_string();
    let echo = broker.config().broadcast_echo.to_string();
    print_banner(&BannerInfo {
        bus: &bus,
        listen: &listen,
        port: broker.local_addr().port(),
        echo: &echo,
    });
    print_startup_log();

    let handle = broker.handle();
    let mut server = tokio::spawn(broker.run());

    tokio::select! {
        result = &mut server => {
            result.context("broker task failed")??;
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Ctrl-C received, shutting down");
            handle.shutdown();
            server.await.context("broker task failed")??;
        }
    }

    let stats = handle.stats();
    info!(
        frames = stats.frames_routed,
        deliveries = stats.deliveries,
        slow_consumers = stats.slow_consumers,
        "Broker exited"
    );
    logging.shutdown().await;
    Ok(())
}
