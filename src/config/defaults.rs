//! Built-in defaults, the lowest configuration layer.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the broker defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("listen", "127.0.0.1:8547")?
        .set_default("default_version", crate::input::DEFAULT_VERSION)?
        .set_default("artifacts.binaries_url", "https://binaries.soliditylang.org")?
        .set_default("artifacts.platform", super::default_platform())?
        .set_default("artifacts.verify_checksums", true)?
        .set_default("cache.enabled", true)
}
