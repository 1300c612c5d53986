//! segment - record analytics events from the command line
//!
//! Every event command runs the message through the full client pipeline
//! (context stamping, durable queue) and returns once it is persisted.
//! Uploading happens only on `segment flush`.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Queue: $XDG_DATA_HOME/segment/<write key digest>.db
//! - Config: $XDG_CONFIG_HOME/segment/config.toml (~/.config/segment/config.toml)
//! - Logs (with --verbose): $XDG_STATE_HOME/segment/segment.log.<date>

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use segment_core::logging::{self, LoggingGuard};
use segment_core::prelude::*;
use segment_core::{ClientConfig, Config, TransportOptions};
use serde_json::Value;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "segment")]
#[command(about = "Record analytics events and upload them in batches")]
#[command(version)]
struct Args {
    /// Verbose output (writes a log file to the state directory)
    #[arg(short, long)]
    verbose: bool,

    /// Write key to use instead of client.write_key from config.toml
    #[arg(long, global = true)]
    write_key: Option<String>,

    /// Collection endpoint to use instead of client.base_url
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration, identity and queue status
    Status,

    /// Record an action
    Track {
        event: String,
        /// Event property as key=value (value parsed as JSON when possible)
        #[arg(short = 'p', long = "property", value_parser = parse_pair)]
        properties: Vec<(String, Value)>,
    },

    /// Record a screen view
    Screen {
        name: String,
        #[arg(short = 'p', long = "property", value_parser = parse_pair)]
        properties: Vec<(String, Value)>,
    },

    /// Identify the current user
    Identify {
        user_id: String,
        /// User trait as key=value
        #[arg(short = 't', long = "trait", value_parser = parse_pair)]
        traits: Vec<(String, Value)>,
    },

    /// Associate the current user with a group
    Group {
        group_id: String,
        #[arg(short = 't', long = "trait", value_parser = parse_pair)]
        traits: Vec<(String, Value)>,
    },

    /// Merge the current identity into a new user id
    Alias { new_id: String },

    /// Upload every queued message
    Flush,

    /// Forget the current user and start a new anonymous identity
    Reset,
}

/// Parses `key=value`; the value is JSON if it parses as JSON, a string otherwise.
fn parse_pair(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;
    if key.trim().is_empty() {
        return Err(format!("missing key in {:?}", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn into_properties(pairs: Vec<(String, Value)>) -> Properties {
    pairs.into_iter().collect()
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(write_key) = args.write_key {
        config.client.write_key = Some(write_key);
    }
    if let Some(base_url) = args.base_url {
        config.client.base_url = base_url;
    }

    let _log_guard: Option<LoggingGuard> = if args.verbose {
        Some(logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config.client),
        Command::Track { event, properties } => {
            let analytics = open_client(&config.client)?;
            let message = analytics
                .new_track(event)?
                .properties(into_properties(properties))
                .build()?;
            enqueue(&analytics, message)
        }
        Command::Screen { name, properties } => {
            let analytics = open_client(&config.client)?;
            let message = analytics
                .new_screen(name)?
                .properties(into_properties(properties))
                .build()?;
            enqueue(&analytics, message)
        }
        Command::Identify { user_id, traits } => {
            let analytics = open_client(&config.client)?;
            let mut builder = analytics.new_identify(user_id)?;
            if !traits.is_empty() {
                builder = builder.traits(into_properties(traits));
            }
            enqueue(&analytics, builder.build()?)
        }
        Command::Group { group_id, traits } => {
            let analytics = open_client(&config.client)?;
            let message = analytics
                .new_group(group_id)?
                .traits(into_properties(traits))
                .build()?;
            enqueue(&analytics, message)
        }
        Command::Alias { new_id } => {
            let analytics = open_client(&config.client)?;
            let message = analytics.new_alias(new_id)?.build()?;
            enqueue(&analytics, message)
        }
        Command::Flush => cmd_flush(&config.client),
        Command::Reset => cmd_reset(&config.client),
    }
}

/// Build a client with context stamping and no automatic flushing.
fn open_client(client: &ClientConfig) -> Result<Analytics> {
    if client.write_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
        bail!(
            "no write key configured; set client.write_key in {} or pass --write-key",
            Config::config_path().display()
        );
    }

    AnalyticsBuilder::from_config(client.clone())
        .interceptor(Arc::new(ContextInterceptor::new()))?
        .transport(TransportOptions::default())
        .build()
        .context("failed to start analytics client")
}

fn enqueue(analytics: &Analytics, message: Message) -> Result<()> {
    let message_type = message.message_type();
    let Some(pending) = analytics.enqueue(message) else {
        println!("Message dropped by an interceptor");
        return Ok(());
    };

    let persisted = pending.wait().context("failed to queue message")?;
    let queued = analytics.queue_size().wait()?;
    println!(
        "Queued {} {} ({} pending)",
        message_type,
        persisted.message_id(),
        queued
    );
    Ok(())
}

fn cmd_status(client: &ClientConfig) -> Result<()> {
    println!("Segment Client Configuration");
    println!("============================");
    println!();
    println!("Config file:     {}", Config::config_path().display());
    println!("Log directory:   {}", logging::log_dir().display());

    let write_key = match client.write_key() {
        Ok(key) => key,
        Err(_) => {
            println!("Write key:       <not set>");
            println!();
            println!("No write key configured. Add one to config.toml:");
            println!();
            println!("  [client]");
            println!("  write_key = \"your-write-key\"");
            return Ok(());
        }
    };

    println!("Write key:       <set>");
    println!("Base URL:        {}", client.base_url);
    println!("Flush at:        {}", client.flush_at);
    println!("Flush interval:  {}s", client.flush_interval_secs);
    println!("Timeout:         {}s", client.timeout_secs);
    println!("Max retries:     {}", client.max_retries);
    println!(
        "Queue database:  {}",
        Config::queue_database_path(write_key).display()
    );

    if let Err(e) = client.validate() {
        println!();
        println!("Configuration is invalid: {}", e);
        return Ok(());
    }

    let analytics = open_client(client)?;
    println!();
    println!("Identity");
    println!("--------");
    println!(
        "User ID:         {}",
        analytics.user_id()?.as_deref().unwrap_or("<none>")
    );
    println!("Anonymous ID:    {}", analytics.anonymous_id()?);
    println!();
    println!("Queued messages: {}", analytics.queue_size().wait()?);

    Ok(())
}

fn cmd_flush(client: &ClientConfig) -> Result<()> {
    let analytics = open_client(client)?;

    let mut total = 0;
    let mut batches = 0;
    loop {
        let sent = analytics
            .flush()
            .wait()
            .with_context(|| format!("upload failed after {} messages", total))?;
        if sent.is_empty() {
            break;
        }
        batches += 1;
        total += sent.len();
        tracing::debug!(batch = batches, count = sent.len(), "Uploaded batch");
    }

    if total == 0 {
        println!("Nothing to upload");
    } else {
        println!("Uploaded {} messages in {} batches", total, batches);
    }
    Ok(())
}

fn cmd_reset(client: &ClientConfig) -> Result<()> {
    let analytics = open_client(client)?;
    analytics.reset()?;
    println!("Identity reset");
    println!("Anonymous ID:    {}", analytics.anonymous_id()?);
    Ok(())
}
