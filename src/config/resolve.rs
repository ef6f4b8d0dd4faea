//! Итоговые имя шины, хост и порт.
//!
//! Порядок приоритета: явный аргумент, затем переменные окружения, затем
//! значения по умолчанию. Функции ничего не меняют и только читают
//! окружение.

use std::env;

/// Переменная окружения с именем шины.
pub const ENV_NAME: &str = "MX_NAME";
/// Переменная окружения с хостом брокера.
pub const ENV_HOST: &str = "MX_HOST";
/// Переменная окружения с портом брокера.
pub const ENV_PORT: &str = "MX_PORT";

pub const DEFAULT_NAME: &str = "mxbus";
pub const DEFAULT_HOST: &str = "localhost";

const FIRST_PORT: u32 = 1024;
const PORT_SPAN: u32 = 65535 - FIRST_PORT + 1;

/// Имя шины: `hint`, затем `MX_NAME`, затем `USER`, затем `"mxbus"`.
pub fn effective_name(hint: Option<&str>) -> String {
    name_from(hint, env_lookup)
}

/// Хост брокера: `hint`, затем `MX_HOST`, затем `"localhost"`.
pub fn effective_host(hint: Option<&str>) -> String {
    host_from(hint, env_lookup)
}

/// Порт брокера: `hint`, затем `MX_PORT` (если разбирается), затем порт,
/// вычисленный из итогового имени шины.
pub fn effective_port(hint: Option<u16>) -> u16 {
    port_from(hint, env_lookup)
}

/// Порт конкретной шины: `hint`, затем `MX_PORT`, затем `port_for_name(bus)`.
pub fn effective_port_for(
    hint: Option<u16>,
    bus: &str,
) -> u16 {
    hint.or_else(|| env_port(env_lookup))
        .unwrap_or_else(|| port_for_name(bus))
}

/// Детерминированный порт для имени шины, в диапазоне `1024..=65535`.
///
/// Разные пользователи одной машины по умолчанию получают разные порты.
pub fn port_for_name(name: &str) -> u16 {
    let sum = name
        .bytes()
        .fold(0u32, |acc, b| (acc + u32::from(b) * 307) % PORT_SPAN);
    (FIRST_PORT + sum) as u16
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_port(lookup: impl Fn(&str) -> Option<String>) -> Option<u16> {
    lookup(ENV_PORT).and_then(|p| p.trim().parse().ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn name_from(
    hint: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    non_empty(hint.map(str::to_string))
        .or_else(|| non_empty(lookup(ENV_NAME)))
        .or_else(|| non_empty(lookup("USER")))
        .unwrap_or_else(|| DEFAULT_NAME.to_string())
}

pub(crate) fn host_from(
    hint: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    non_empty(hint.map(str::to_string))
        .or_else(|| non_empty(lookup(ENV_HOST)))
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

pub(crate) fn port_from(
    hint: Option<u16>,
    lookup: impl Fn(&str) -> Option<String>,
) -> u16 {
    hint.or_else(|| env_port(&lookup))
        .unwrap_or_else(|| port_for_name(&name_from(None, lookup)))
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
