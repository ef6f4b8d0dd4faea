use std::env;

use atty::Stream;
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;

/// Полный баннер с информацией о брокере.
pub const ASCII_FULL: &str = r#"
    mxbus {version}
    ----------------------------------------------
    Bus:              {bus}
    Mode:             {mode}
    Listening:        {listen}
    Port:             {port}
    PID:              {pid}
    Host:             {host}
    OS/Arch:          {os}/{arch}
    CPU(s):           {cpus}
    Echo:             {echo}
    Build:            {build_id} ({build_time})
"#;

/// Компактный баннер для вывода.
pub const ASCII_COMPACT: &str = r#"
mxbus {version} - {bus} - {listen}:{port} - PID {pid}
"#;

/// Параметры, которые показывает баннер.
#[derive(Debug, Clone)]
pub struct BannerInfo<'a> {
    pub bus: &'a str,
    pub listen: &'a str,
    pub port: u16,
    pub echo: &'a str,
}

/// Вывод баннера брокера с информацией о конфигурации.
///
/// Режим выбирается переменной `MX_BANNER` (`full` | `compact`); по
/// умолчанию debug-сборка печатает полный баннер, release - компактный.
pub fn print_banner(info: &BannerInfo<'_>) {
    let forced = env::var("MX_BANNER").ok();
    let full = match forced.as_deref() {
        Some("full") => true,
        Some("compact") => false,
        _ => cfg!(debug_assertions),
    };

    let text = if full {
        render_full(info)
    } else {
        render_compact(info)
    };
    let color = atty::is(Stream::Stdout);

    if !color {
        println!("{text}");
        println!();
        return;
    }

    if full {
        let pid = std::process::id().to_string();
        let port = info.port.to_string();
        for (i, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if i == 1 {
                println!("{}", line.bold().bright_blue());
            } else if trimmed.starts_with("Bus:") || trimmed.starts_with("Mode:") {
                println!("{}", line.cyan());
            } else if trimmed.starts_with("Port:") || trimmed.starts_with("PID:") {
                println!(
                    "{}",
                    line.replace(&port, &port.magenta().to_string())
                        .replace(&pid, &pid.magenta().to_string())
                );
            } else if trimmed.starts_with("Git:") || trimmed.starts_with("Build:") {
                println!("{}", line.dimmed());
            } else {
                println!("{line}");
            }
        }
    } else {
        println!("{}", text.bold().green());
    }
    println!();
}

fn version_with_bits() -> String {
    let bits = std::mem::size_of::<usize>() * 8;
    format!("{} ({bits}-bit)", env!("CARGO_PKG_VERSION"))
}

/// Профиль cargo, с которым собран брокер.
fn mode() -> &'static str {
    match option_env!("MXBUS_PROFILE") {
        Some(profile) => profile,
        None if cfg!(debug_assertions) => "debug",
        None => "release",
    }
}

/// Подставляет значения в полный шаблон.
pub fn render_full(info: &BannerInfo<'_>) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into());

    let build_id = option_env!("MXBUS_BUILD_ID").unwrap_or("unknown");
    let build_time_raw = option_env!("MXBUS_BUILD_TIME").unwrap_or("unknown");
    let build_time = match DateTime::parse_from_rfc3339(build_time_raw) {
        Ok(dt) => dt
            .with_timezone(&Local)
            .format("%d.%m.%Y %H:%M:%S")
            .to_string(),
        Err(_) => build_time_raw.to_string(),
    };

    ASCII_FULL
        .replace("{version}", &version_with_bits())
        .replace("{bus}", info.bus)
        .replace("{mode}", mode())
        .replace("{listen}", info.listen)
        .replace("{port}", &info.port.to_string())
        .replace("{pid}", &std::process::id().to_string())
        .replace("{host}", &host)
        .replace("{os}", env::consts::OS)
        .replace("{arch}", env::consts::ARCH)
        .replace("{cpus}", &num_cpus::get().to_string())
        .replace("{echo}", info.echo)
        .replace("{build_id}", build_id)
        .replace("{build_time}", &build_time)
}

pub fn render_compact(info: &BannerInfo<'_>) -> String {
    ASCII_COMPACT
        .replace("{version}", &version_with_bits())
        .replace("{bus}", info.bus)
        .replace("{listen}", info.listen)
        .replace("{port}", &info.port.to_string())
        .replace("{pid}", &std::process::id().to_string())
}

/// Лог запуска брокера с точностью до миллисекунд.
pub fn print_startup_log() {
    let pid = std::process::id();
    let ts = Local::now().format("%d %b %Y %H:%M:%S%.3f");

    if atty::is(Stream::Stdout) {
        println!(
            "[{}] {} {} {}",
            pid.to_string().red(),
            ts.to_string().white(),
            "# Broker started, mxbus version".dimmed().bold(),
            env!("CARGO_PKG_VERSION").dimmed().bold()
        );
        println!(
            "[{}] {} {}",
            pid.to_string().red(),
            ts.to_string().white(),
            "* Ready to accept components".green()
        );
    } else {
        println!(
            "[{pid}] {ts} # Broker started, mxbus version {}",
            env!("CARGO_PKG_VERSION")
        );
        println!("[{pid}] {ts} * Ready to accept components");
    }
}
