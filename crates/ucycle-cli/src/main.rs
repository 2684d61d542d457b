mod adapters;

use adapters::{print_health, print_notices, FixedPositionSensor, StaticPermissions, TerminalBell};
use anyhow::Context;
use base64::Engine;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ucycle_api::ItemDirectoryClient;
use ucycle_cache::SqliteStore;
use ucycle_core::{
    AcquireOptions, AudioCue, BoardPorts, Category, Config, DirectoryItemSource, EffectiveStatus,
    ItemDraft, ListedItem, ListingsBoard, LocationPoint, PermissionState,
};

#[derive(Parser)]
#[command(name = "ucycle")]
#[command(version, about = "Kerbside listings near you, with alerts for new finds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Device latitude
    #[arg(long, global = true, env = "UCYCLE_LAT", allow_negative_numbers = true, requires = "lon")]
    lat: Option<f64>,

    /// Device longitude
    #[arg(long, global = true, env = "UCYCLE_LON", allow_negative_numbers = true, requires = "lat")]
    lon: Option<f64>,

    /// Item directory base URL (overrides config)
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List live items around you, nearest first
    Feed {
        /// Browse radius in km
        #[arg(long)]
        radius: Option<f64>,
        /// Only this category
        #[arg(long)]
        category: Option<Category>,
        /// Only favorites
        #[arg(long)]
        favorites: bool,
        /// Include collected, removed and expired items
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Poll for new nearby items and collected posts until Ctrl-C
    Watch,
    /// Toggle an item in your favorites
    Favorite {
        /// Item id
        id: String,
    },
    /// Show your favorites
    Favorites,
    /// Turn notifications on or off
    Notifications {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Mark an item as collected
    Claim {
        /// Item id
        id: String,
    },
    /// Post an item at your current location
    Post {
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: Category,
        #[arg(long, default_value = "")]
        description: String,
        /// Hours until the listing expires
        #[arg(long, default_value_t = 48)]
        expiry_hours: u32,
        /// Photo of the item
        #[arg(long)]
        image: PathBuf,
        /// Additional photos
        #[arg(long = "extra-image")]
        extra_images: Vec<PathBuf>,
    },
    /// Show or write the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand)]
enum ConfigAction {
    /// Print where the config file lives
    Path,
    /// Write the current settings (defaults plus env overrides) to the config file
    Init,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Switch {
    On,
    Off,
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - helps when things go sideways
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ucycle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;

    if let Commands::Config { action } = &cli.command {
        match action {
            ConfigAction::Path => println!("{}", Config::config_path()?.display()),
            ConfigAction::Init => {
                config.save()?;
                println!("Wrote {}", Config::config_path()?.display());
            }
        }
        return Ok(());
    }

    if let Some(url) = cli.api_url.clone() {
        config.directory.base_url = url;
    }

    let position = match (cli.lat, cli.lon) {
        (Some(lat), Some(lon)) => Some(LocationPoint::new(lat, lon)),
        _ => None,
    };
    let board = build_board(&config, position)?;

    match cli.command {
        Commands::Feed {
            radius,
            category,
            favorites,
            all,
            json,
        } => {
            locate(&board).await;
            board.refresh().await;
            let health = board.feed_health();
            if let Some(e) = health.last_error {
                eprintln!("Could not reach the directory ({}); showing what we had", e);
            }

            let mut filter = config.display_filter();
            if let Some(radius) = radius {
                filter.radius_km = radius;
            }
            filter.category = category.or(filter.category);
            filter.favorites_only |= favorites;
            filter.include_inactive = all;

            let rows = board.display_set(&filter);
            if json {
                let items: Vec<_> = rows.iter().map(|r| &r.item).collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if rows.is_empty() {
                println!("Nothing listed nearby right now.");
            } else {
                rows.iter().for_each(print_row);
            }
        }
        Commands::Watch => {
            if !board.notifications_enabled() {
                anyhow::bail!("Notifications are off. Run `ucycle notifications on` first.");
            }
            locate(&board).await;

            let printer = tokio::spawn(print_notices(board.dispatcher().subscribe()));
            let health = tokio::spawn(print_health(board.feed().subscribe_health()));
            board.start_polling();
            println!("Watching for new items. Ctrl-C to stop.");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            board.shutdown().await;
            printer.abort();
            health.abort();
        }
        Commands::Favorite { id } => {
            if board.toggle_favorite(&id) {
                println!("★ Added {} to favorites", id);
            } else {
                println!("Removed {} from favorites", id);
            }
        }
        Commands::Favorites => {
            let favorites = board.favorites();
            if favorites.is_empty() {
                println!("No favorites yet.");
            } else {
                board.refresh().await;
                for id in &favorites {
                    match board.feed().find(id) {
                        Some(item) => println!("★ {}  {}", id, item.title),
                        None => println!("★ {}  (no longer listed)", id),
                    }
                }
            }
        }
        Commands::Notifications { state } => {
            match state {
                // Polling only runs under `watch`; here we just persist the switch
                Switch::On => board.registry().set_notifications_enabled(true),
                Switch::Off => board.registry().set_notifications_enabled(false),
                Switch::Status => {}
            }
            let label = if board.notifications_enabled() { "on" } else { "off" };
            println!("Notifications are {}", label);
        }
        Commands::Claim { id } => {
            board.refresh().await;
            board
                .claim(&id)
                .await
                .with_context(|| format!("Could not claim {}", id))?;
            println!("🎉 Marked {} as collected", id);
        }
        Commands::Post {
            title,
            category,
            description,
            expiry_hours,
            image,
            extra_images,
        } => {
            let draft = ItemDraft {
                title,
                category,
                description,
                expiry_hours,
                image_base64: encode_image(&image)?,
                extra_images: extra_images
                    .iter()
                    .map(|path| encode_image(path))
                    .collect::<anyhow::Result<_>>()?,
            };

            let item = board
                .post_item(draft)
                .await
                .context("Could not post item (posting needs --lat/--lon)")?;
            println!("Posted {} ({}), we'll let you know when it's collected", item.title, item.id);
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn build_board(config: &Config, position: Option<LocationPoint>) -> anyhow::Result<ListingsBoard> {
    let client = ItemDirectoryClient::with_base_url(
        config.directory.base_url.clone(),
        Duration::from_secs(config.directory.timeout_secs),
    );

    let db_path = config.db_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("Could not open {}", db_path.display()))?;

    let audio: Option<Arc<dyn AudioCue>> = if config.notifications.sound {
        Some(Arc::new(TerminalBell))
    } else {
        None
    };

    Ok(ListingsBoard::new(
        BoardPorts {
            source: Arc::new(DirectoryItemSource::new(client)),
            sensor: Arc::new(FixedPositionSensor::new(position)),
            permissions: Arc::new(StaticPermissions(PermissionState::Granted)),
            store: Arc::new(store),
            audio,
        },
        config,
    ))
}

/// Best effort: without a position the feed is simply unfiltered
async fn locate(board: &ListingsBoard) {
    if let Err(e) = board.locate(AcquireOptions::silent()).await {
        tracing::debug!("No device location: {}", e);
    }
}

fn print_row(row: &ListedItem) {
    let distance = row.formatted_distance().unwrap_or_else(|| "?".to_string());
    let star = if row.favorite { "★" } else { " " };
    let status = match row.status() {
        EffectiveStatus::Active => row.time_left(),
        other => other.label().to_string(),
    };
    println!(
        "{} {:>8}  {:<32} {:<12} {:<14} {}",
        star,
        distance,
        row.item.title,
        row.item.category.as_str(),
        status,
        row.item.id
    );
}

fn encode_image(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Could not read image {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
