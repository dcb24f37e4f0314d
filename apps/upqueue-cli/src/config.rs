//! Command-line arguments and configuration loading.
//!
//! Queue settings come from a TOML file (`upqueue.toml` in the working
//! directory unless `--config` or `UPQUEUE_CONFIG` says otherwise). A
//! missing file means defaults. Flags override the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use upqueue_core::QueueConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "upqueue", version, about = "Upload files through a bounded queue")]
pub struct Cli {
    /// Files to upload, in queue order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Path to the TOML configuration file.
    #[arg(short, long, env = "UPQUEUE_CONFIG", default_value = "upqueue.toml")]
    pub config: PathBuf,

    /// Endpoint to post files to.
    #[arg(short, long, env = "UPQUEUE_URL")]
    pub url: Option<String>,

    /// Number of simultaneous transfers.
    #[arg(short = 'j', long, env = "UPQUEUE_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Multipart field name carrying the file.
    #[arg(long)]
    pub field: Option<String>,

    /// Extra form field sent with every file, as `name=value`.
    #[arg(long = "form", value_parser = parse_field)]
    pub form: Vec<(String, String)>,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    if name.is_empty() {
        return Err("form field name is empty".into());
    }
    Ok((name.to_string(), value.to_string()))
}

/// Reads the config file (if any) and applies command-line overrides.
pub fn load(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = read_file(&cli.config)?;

    if let Some(url) = &cli.url {
        config.post_url = url.clone();
    }
    if let Some(n) = cli.concurrency {
        config.upload_concurrency = n;
    }
    if let Some(field) = &cli.field {
        config.field_name = field.clone();
    }
    config.extra_fields.extend(cli.form.iter().cloned());

    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> anyhow::Result<QueueConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(QueueConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
