//! Сведения о сборке для баннера брокера.

use std::{env, process::Command};

/// Вывод команды git, если она выполнилась и что-то напечатала.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=MXBUS_BUILD_ID");

    // Сборки вне git-репозитория (пакеты дистрибутивов) задают id сами.
    let build_id = env::var("MXBUS_BUILD_ID")
        .ok()
        .or_else(|| git(&["describe", "--always", "--dirty", "--abbrev=8"]))
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=MXBUS_BUILD_ID={build_id}");

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".into());
    println!("cargo:rustc-env=MXBUS_PROFILE={profile}");

    let build_time = chrono::Utc::now().to_rfc3339();
    println!("cargo:rustc-env=MXBUS_BUILD_TIME={build_time}");
}
