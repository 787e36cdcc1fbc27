mod cli;
mod output;

use std::collections::HashMap;

use anyhow::{Context, Result};
use beleriand::message::InvalidationMessage;
use beleriand::{
    BeleriandConfig, Cache, CacheManager, CacheStore, CachingConfiguration, Channels,
    create_shared_store, load_config, observability,
};
use clap::Parser;
use colored::Colorize;
use futures_util::StreamExt;
use serde_json::Value;

use cli::{Cli, Commands};
use output::{print_error, print_success, print_warning};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    observability::init_tracing_with_level(level);

    if !config.redis.enabled {
        print_warning("Redis is disabled; this command only sees an in-process store");
    }

    tracing::debug!(
        command = cli.command.name(),
        cache = %cli.cache,
        redis = config.redis.enabled,
        "dispatching command"
    );
    match cli.command {
        Commands::Watch => watch(&config, &cli.cache).await,
        command => execute(&config, &cli.cache, command).await,
    }
}

async fn execute(config: &BeleriandConfig, cache_name: &str, command: Commands) -> Result<()> {
    let manager = CacheManager::connect(config, CachingConfiguration::new())
        .await
        .context("failed to connect shared store")?;
    let cache = manager.get_cache(cache_name).await?;
    tracing::debug!(cache = %cache_name, instance_id = %cache.instance_id(), "cache ready");

    match command {
        Commands::Get(args) => {
            if let [key] = args.keys.as_slice() {
                let value: Option<Value> = cache.get_or_default(key).await?;
                output::print_value(key, value.as_ref());
            } else {
                let values: HashMap<String, Value> = cache.get_many_or_default(&args.keys).await?;
                for key in &args.keys {
                    output::print_value(key, values.get(key));
                }
            }
        }
        Commands::Set(args) => {
            let value: Value = serde_json::from_str(&args.value)
                .with_context(|| format!("value is not valid JSON: {}", args.value))?;
            cache.set(&args.key, &value).await?;
            print_success(&format!("Set {}:{}", cache.name(), args.key));
        }
        Commands::Remove(args) => {
            cache.remove(&args.key).await?;
            print_success(&format!("Removed {}:{}", cache.name(), args.key));
        }
        Commands::Clear => {
            cache.clear().await?;
            print_success(&format!("Cleared cache {}", cache.name()));
        }
        Commands::Stats => {
            let channels = Channels::new(&config.cache.channel_prefix, cache.name());
            println!("{}: {}", "Instance".cyan(), cache.instance_id());
            println!(
                "{}: {}",
                "Shared store".cyan(),
                if config.redis.enabled {
                    config.redis.url.as_str()
                } else {
                    "in-process"
                }
            );
            println!("{}: {:?}", "Local store".cyan(), config.cache.local_store);
            println!("{}: {}", "Update channel".cyan(), channels.update);
            println!("{}: {}", "Clear channel".cyan(), channels.clear);
            output::print_stats(&cache.stats());
        }
        Commands::Watch => {}
    }

    manager.shutdown().await;
    tracing::debug!(cache = %cache_name, "command finished");
    Ok(())
}

async fn watch(config: &BeleriandConfig, cache: &str) -> Result<()> {
    let shared = create_shared_store(&config.redis)
        .await
        .context("failed to connect shared store")?;
    let channels = Channels::new(&config.cache.channel_prefix, cache);
    let mut messages = shared.subscribe(&channels.all()).await?;

    println!(
        "Watching {} and {} (Ctrl-C to stop)",
        channels.update.cyan(),
        channels.clear.cyan()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = messages.next() => match next {
                Some(message) => match InvalidationMessage::decode(&message.payload) {
                    Ok(decoded) => output::print_invalidation(&message.channel, &decoded),
                    Err(e) => {
                        tracing::warn!(channel = %message.channel, error = %e, "undecodable message");
                        print_warning(&format!("{}: {e}", message.channel));
                    }
                },
                None => anyhow::bail!("subscription closed by the shared store"),
            }
        }
    }
    Ok(())
}
