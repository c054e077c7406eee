pub mod error;
pub mod gpu;
pub mod ids;
pub mod renderer;
pub mod settings;

pub use error::{RenderError, Result};
pub use settings::RenderSettings;

/// Installs the default `env_logger` logger at info level unless `RUST_LOG` says otherwise.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
