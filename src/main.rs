use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use tracing_subscriber::EnvFilter;

use feedhound::config::Config;
use feedhound::feed::Fetcher;
use feedhound::ingest;

#[derive(Parser)]
#[command(name = "feedhound", about = "Feed discovery crawler", version)]
struct Cli {
    /// Path to a config file (default: ~/.config/feedhound/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover the feed behind a URL and print what would be ingested
    Discover { url: String },

    /// Crawl every URL in a file (one per line, # comments allowed)
    Crawl {
        file: PathBuf,
        /// Simultaneous crawls (default: from config)
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

fn config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    let home = std::env::var("HOME").ok()?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("feedhound")
            .join("config.toml"),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedhound=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match config_path(&cli) {
        Some(path) => Config::load(&path).context("failed to load config")?,
        None => Config::default(),
    };
    let fetcher = Fetcher::new(&config).context("failed to build HTTP client")?;

    match cli.command {
        Command::Discover { url } => {
            let discovered = ingest::discover(&fetcher, &url).await?;
            print_discovered(&url, &discovered);
        }
        Command::Crawl { file, concurrency } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let urls: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_owned)
                .collect();

            let concurrency = concurrency.unwrap_or(config.fetch_concurrency);
            let fetcher = &fetcher;
            stream::iter(urls)
                .map(|url| async move {
                    let result = ingest::discover(fetcher, &url).await;
                    (url, result)
                })
                .buffer_unordered(concurrency.max(1))
                .for_each(|(url, result)| async move {
                    match result {
                        Ok(discovered) => println!(
                            "{url} -> {} ({} entries)",
                            discovered.descriptor.url,
                            discovered.entries.len()
                        ),
                        // One seed's failure never stops the batch
                        Err(error) => println!("{url} -> {error}"),
                    }
                })
                .await;
        }
    }

    Ok(())
}

fn print_discovered(seed: &str, discovered: &ingest::Discovered) {
    let descriptor = &discovered.descriptor;
    println!("Seed:     {seed}");
    println!("Feed:     {}", descriptor.url);
    println!("Site:     {}", descriptor.link);
    println!("Title:    {}", descriptor.title);
    if let Some(subtitle) = &descriptor.subtitle {
        println!("About:    {subtitle}");
    }
    if let Some(favicon) = &discovered.favicon {
        println!("Favicon:  {} ({} bytes)", favicon.url, favicon.bytes.len());
    }
    println!("Entries:  {}", discovered.entries.len());
    for entry in discovered.entries.iter().take(10) {
        println!("  - {}", entry.title);
    }
}
