//! Logger bootstrap for binaries and examples built on the central.

use std::io::Write;

use chrono::Local;
use log::LevelFilter;

/// Installs `env_logger` at `level`; `RUST_LOG` overrides it when set.
///
/// Returns false if a logger was already installed.
pub fn init(level: LevelFilter) -> bool {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}
