//! Конфигурация брокера и разрешение имени, хоста и порта шины.

pub mod resolve;
pub mod settings;

pub use resolve::{effective_host, effective_name, effective_port, effective_port_for, port_for_name};
pub use settings::Settings;
