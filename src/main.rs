use clap::{Parser, Subcommand};

use vast_pipeline::config::{DisplayConfig, NetworkTransport, SelectorConfig};
use vast_pipeline::net::{HttpFetch, ReqwestFetcher};
use vast_pipeline::selector::MediaSelector;

/// VAST ad pipeline inspector
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a VAST file or URL and print the ads
    Parse {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Show the media rendition the selector would pick for each ad
    Select {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Display width in pixels
        #[arg(long, default_value_t = 1920)]
        width: u32,

        /// Display height in pixels
        #[arg(long, default_value_t = 1080)]
        height: u32,

        /// Assume a WiFi bandwidth budget instead of the constrained default
        #[arg(long)]
        wifi: bool,
    },
}

async fn load_input(input: &str) -> Result<String, Box<dyn std::error::Error>> {
    if std::path::Path::new(input).exists() {
        return Ok(tokio::fs::read_to_string(input).await?);
    }
    let fetcher = ReqwestFetcher::new()?;
    Ok(fetcher.fetch(input).await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Parse { input, pretty } => {
            let content = load_input(input).await?;
            let ads = vast_pipeline::parser::parse_str(&content)?;

            if *pretty {
                println!("{ads:#?}");
            } else {
                println!("{ads:?}");
            }
            eprintln!("{} ad(s) parsed", ads.len());
        }
        Commands::Select {
            input,
            width,
            height,
            wifi,
        } => {
            let content = load_input(input).await?;
            let ads = vast_pipeline::parser::parse_str(&content)?;

            let transport = if *wifi {
                NetworkTransport::Wifi
            } else {
                NetworkTransport::Other
            };
            let selector = MediaSelector::new(SelectorConfig {
                display: DisplayConfig {
                    width: *width,
                    height: *height,
                },
                ..SelectorConfig::for_transport(transport)
            });

            for ad in &ads {
                match selector.select_best(ad) {
                    Some(media) => println!(
                        "{}: {} ({} {}x{} @{}kbps)",
                        ad.id,
                        media.url,
                        media.mime_type,
                        media.width,
                        media.height,
                        media.bitrate_kbps
                    ),
                    None => println!("{}: no media files", ad.id),
                }
            }
        }
    }

    Ok(())
}
