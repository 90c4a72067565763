// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use oeb_server::ServerConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "oeb-daemon", version, about = "Observability event bus server")]
struct Args {
    /// Bind address. Overrides `OEB_BIND` and the built-in default.
    #[arg(long)]
    bind: Option<String>,

    /// Directory backing process discovery and the voice clip cache.
    /// Overrides `OEB_CACHE_DIR`.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Ring buffer capacity. Overrides `OEB_CAPACITY`.
    #[arg(long)]
    capacity: Option<usize>,

    /// Disable the voice playback queue regardless of `OEB_VOICE_DISABLE`.
    #[arg(long)]
    no_voice: bool,

    /// Enable verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "oeb=debug" } else { "oeb=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = build_config(args)?;
    info!(bind = %config.bind, capacity = config.capacity, voice = config.voice_enabled, "starting oeb-daemon");

    oeb_server::serve(config).await.context("oeb-server terminated")?;
    Ok(())
}

/// Layer defaults, then environment variables, then CLI flags (highest
/// priority) into a single [`ServerConfig`].
fn build_config(args: Args) -> Result<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Ok(bind) = std::env::var("OEB_BIND") {
        config.bind = bind.parse().context("invalid OEB_BIND")?;
    }
    if let Ok(cache_dir) = std::env::var("OEB_CACHE_DIR") {
        config.cache_dir = PathBuf::from(cache_dir);
    }
    if let Ok(disable) = std::env::var("OEB_VOICE_DISABLE") {
        if disable == "1" || disable.eq_ignore_ascii_case("true") {
            config.voice_enabled = false;
        }
    }
    if let Ok(capacity) = std::env::var("OEB_CAPACITY") {
        config.capacity = capacity.parse().context("invalid OEB_CAPACITY")?;
    }
    if let Ok(persist) = std::env::var("OEB_PERSIST") {
        config.persist_path = Some(PathBuf::from(persist));
    }

    if let Some(bind) = args.bind {
        config.bind = bind.parse().context("invalid --bind")?;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if args.no_voice {
        config.voice_enabled = false;
    }

    Ok(config)
}
