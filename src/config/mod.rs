// Configuration management module
// TOML settings file plus a live settings handle shared across the pipeline

pub mod settings;

use anyhow::{Context, Result};
use console::style;

pub use settings::{
    Config, ConfigError, EmbeddingConfig, GraphBackend, GraphConfig, IndexingConfig, Settings,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Print the effective configuration to stderr
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    eprintln!(
        "  Requests/min: {}",
        style(config.embedding.requests_per_minute).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Graph Settings:").bold().yellow());
    eprintln!("  Enabled: {}", style(config.graph.enabled).cyan());
    eprintln!("  Backend: {}", style(format!("{:?}", config.graph.backend)).cyan());
    eprintln!("  URI: {}", style(&config.graph.uri).cyan());

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    eprintln!();
    eprintln!("{}", style(rendered).dim());
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}
