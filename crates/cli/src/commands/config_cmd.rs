//! `turnloop config`: show the effective configuration.

use turnloop_config::SessionConfig;

pub fn show(config: &SessionConfig) -> anyhow::Result<()> {
    println!("{}", config.to_redacted_toml()?);

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  WARNING: No API key configured.");
        eprintln!("  Set ANTHROPIC_API_KEY (or TURNLOOP_API_KEY), or add `api_key` to turnloop.toml.");
    }
    Ok(())
}
