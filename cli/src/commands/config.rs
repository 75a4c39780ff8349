//! Config command - show or initialise the configuration file.

use anyhow::Result;
use porthog_core::Config;

use super::Context;
use crate::render::Format;

pub async fn run(ctx: &Context, init: bool) -> Result<()> {
    if init {
        if ctx.store.path().exists() {
            println!("Config already exists at {}", ctx.store.path().display());
        } else {
            ctx.store.save(&Config::default()).await?;
            println!("Wrote default config to {}", ctx.store.path().display());
        }
        return Ok(());
    }

    let config = &ctx.config;
    if ctx.format == Format::Json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Config file:        {}", ctx.store.path().display());
    println!("Output format:      {:?}", config.default_output_format);
    println!("Cache TTL:          {}s", config.cache_ttl_secs);
    println!("Watch interval:     {}s", config.watch_interval_secs);
    println!("Critical processes: {}", config.critical_process_denylist.join(", "));
    Ok(())
}
