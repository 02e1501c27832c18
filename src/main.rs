use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use biasbrief::config::Config;
use biasbrief::controller::FeedController;
use biasbrief::derive::SortOrder;
use biasbrief::prefs::PreferenceStore;
use biasbrief::remote::{ArticleSource, NewsApi};
use biasbrief::storage::SqliteStore;
use biasbrief::ArticleId;

/// Get the config directory path (~/.config/biasbrief/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("biasbrief"))
}

#[derive(Parser, Debug)]
#[command(name = "biasbrief", about = "Headless BiasBrief feed: fetch, filter, and print headlines")]
struct Args {
    /// Config file path (default: ~/.config/biasbrief/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Preference database path (overrides config)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// News API base URL (overrides config)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Category to display ("All" shows everything)
    #[arg(long, default_value = "All")]
    category: String,

    /// Search query
    #[arg(long)]
    search: Option<String>,

    /// Page number (1-based)
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// Sort oldest-first instead of newest-first
    #[arg(long)]
    oldest_first: bool,

    /// Show unbiased headline variants (default: the stored bias-mode
    /// preference)
    #[arg(long)]
    unbiased: bool,

    /// Show only bookmarked articles (unpaginated)
    #[arg(long)]
    bookmarks: bool,

    /// Toggle a bookmark by article id, then exit
    #[arg(long, value_name = "ID")]
    toggle_bookmark: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let db_path = args
        .db
        .map(|p| p.display().to_string())
        .or_else(|| (!config.db_path.is_empty()).then(|| config.db_path.clone()))
        .unwrap_or_else(|| {
            std::fs::create_dir_all(&config_dir).ok();
            config_dir.join("prefs.db").display().to_string()
        });

    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open preference store at {db_path}"))?;
    let prefs = Arc::new(PreferenceStore::with_poll_interval(
        Arc::new(store),
        std::time::Duration::from_secs(config.preference_poll_secs.max(1)),
    ));

    let api_url = args.api_url.as_deref().unwrap_or(&config.api_base_url);
    let api = NewsApi::new(reqwest::Client::new(), api_url)
        .with_context(|| format!("Invalid API base URL: {api_url}"))?;

    let mut controller = FeedController::with_cache_capacity(
        Arc::new(api) as Arc<dyn ArticleSource>,
        Arc::clone(&prefs),
        config.cache_capacity,
    );
    controller.init().await;

    if let Some(id) = args.toggle_bookmark {
        let id = ArticleId::new(&id);
        let bookmarked = controller.toggle_bookmark(&id).await?;
        println!(
            "{} {}",
            if bookmarked { "Bookmarked" } else { "Removed bookmark" },
            id
        );
        return Ok(());
    }

    let unbiased = args.unbiased || !prefs.default_bias_mode().await.value;

    controller.set_category(&args.category);
    if let Some(search) = &args.search {
        controller.set_search_query(search);
    }
    if args.oldest_first {
        controller.set_sort_order(SortOrder::OldToNew);
    }
    controller.go_to_page(args.page.max(1));
    if args.bookmarks {
        controller.set_bookmarks_only(true);
    }

    controller.fetch_page();
    if controller.is_loading() {
        controller.next_event().await;
    }

    let view = controller.view();

    if let Some(notice) = &view.last_error {
        eprintln!("note: {notice}");
    }

    if view.articles.is_empty() {
        println!("No articles.");
        return Ok(());
    }

    for article in &view.articles {
        let marker = if controller.is_bookmarked(&article.id) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} [{}] {}  ({})",
            article.section,
            article.display_title(unbiased),
            article.id
        );
    }
    if !args.bookmarks {
        println!(
            "\npage {}/{} — {} article(s)",
            view.current_page, view.total_pages, view.total_count
        );
    }

    Ok(())
}
