//! CLI оператора mxbus.
//!
//! Печатает итоговые имя шины, хост и порт, останавливает брокер и
//! показывает события обнаружения (подключения компонентов, новые типы,
//! подписчики и публикаторы) в текстовом виде или строками JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mxbus::{
    effective_host, effective_name, init_logging, Client, ClientConfig, ComponentEvent,
    LoggingConfig, MessageTypeEvent, MxResult, PublisherEvent, RunStatus, SubscriberEvent,
};
use serde::Serialize;
use tracing::debug;

/// Основная структура CLI аргументов.
#[derive(Parser)]
#[command(name = "mxbus-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "mxbus-cli - operator tool for the mxbus broker", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Имя шины
    #[arg(short, long, global = true, env = "MX_NAME")]
    name: Option<String>,
    /// Хост брокера
    #[arg(short = 'H', long, global = true, env = "MX_HOST")]
    host: Option<String>,
    /// Порт брокера
    #[arg(short, long, global = true, env = "MX_PORT")]
    port: Option<u16>,
    /// Включить подробный вывод (debug)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Подавить логирование (только error)
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Подкоманды CLI.
#[derive(Subcommand)]
enum Commands {
    /// Итоговое имя шины
    Name,
    /// Итоговый хост брокера
    Host,
    /// Итоговый порт брокера
    Port,
    /// Остановить брокер
    Quit,
    /// Показывать события обнаружения до Ctrl-C
    Watch {
        /// Печатать события строками JSON
        #[arg(long)]
        json: bool,
        /// Также следить за подписчиками и публикаторами этих типов сообщений
        #[arg(short = 't', long = "type")]
        types: Vec<String>,
    },
}

/// Одна строка вывода `watch --json`.
#[derive(Serialize)]
struct EventLine<'a, T: Serialize> {
    event: &'static str,
    #[serde(flatten)]
    data: &'a T,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "warn",
    };
    let _logging = init_logging(LoggingConfig {
        level: level.to_string(),
        ..LoggingConfig::default()
    })?;

    let bus = effective_name(cli.name.as_deref());
    let config = ClientConfig::new("mxbus-cli")
        .with_bus(bus.clone())
        .with_host(effective_host(cli.host.as_deref()));
    let config = match cli.port {
        Some(port) => config.with_port(port),
        None => config,
    };

    match cli.command {
        Commands::Name => println!("{bus}"),
        Commands::Host => println!("{}", effective_host(cli.host.as_deref())),
        Commands::Port => println!("{}", mxbus::config::effective_port_for(cli.port, &bus)),
        Commands::Quit => quit(config).await?,
        Commands::Watch { json, types } => watch(config, json, &types).await?,
    }
    Ok(())
}

async fn quit(config: ClientConfig) -> Result<()> {
    let address = config.address();
    let client = Client::connect(config)
        .await
        .with_context(|| format!("connecting to {address}"))?;
    client.quit_broker()?;
    client.close().await;
    println!("OK");
    Ok(())
}

async fn watch(
    config: ClientConfig,
    json: bool,
    types: &[String],
) -> Result<()> {
    let mut client = Client::connect(config).await?;
    debug!(component = %client.id(), "Watching bus");

    client.on_new_component(move |_, e: &ComponentEvent| {
        print_event(json, "new_component", e, || format!("+ component {} {}", e.id, e.name))
    })?;
    client.on_end_component(move |_, e: &ComponentEvent| {
        print_event(json, "end_component", e, || format!("- component {} {}", e.id, e.name))
    })?;
    client.on_new_message(move |_, e: &MessageTypeEvent| {
        print_event(json, "new_message", e, || format!("+ message {} {}", e.msg_type, e.name))
    })?;

    for name in types {
        let msg_type = client.register(name).await?;
        client.on_new_subscriber(msg_type, move |_, e: &SubscriberEvent| {
            print_event(json, "new_subscriber", e, || {
                format!("+ subscriber {} {} to {}", e.id, e.name, e.msg_type)
            })
        })?;
        client.on_end_subscriber(msg_type, move |_, e: &SubscriberEvent| {
            print_event(json, "end_subscriber", e, || {
                format!("- subscriber {} {} from {}", e.id, e.name, e.msg_type)
            })
        })?;
        client.on_new_publisher(msg_type, move |_, e: &PublisherEvent| {
            print_event(json, "new_publisher", e, || {
                format!("+ publisher {} {} of {}", e.id, e.name, e.msg_type)
            })
        })?;
        client.on_end_publisher(msg_type, move |_, e: &PublisherEvent| {
            print_event(json, "end_publisher", e, || {
                format!("- publisher {} {} of {}", e.id, e.name, e.msg_type)
            })
        })?;
    }

    tokio::select! {
        status = client.run() => match status {
            Ok(RunStatus::ConnectionLost) => eprintln!("Connection to broker lost"),
            Ok(RunStatus::Shutdown) => {}
            Err(e) if json => println!("{}", serde_json::to_string(&e.to_response())?),
            Err(e) => return Err(e.into()),
        },
        _ = tokio::signal::ctrl_c() => {}
    }
    client.close().await;
    Ok(())
}

fn print_event<T: Serialize>(
    json: bool,
    event: &'static str,
    data: &T,
    text: impl FnOnce() -> String,
) -> MxResult<()> {
    if json {
        match serde_json::to_string(&EventLine { event, data }) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Failed to encode event: {e}"),
        }
    } else {
        println!("{}", text());
    }
    Ok(())
}
