use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

use newsdesk::config::{Config, API_KEY_ENV};
use newsdesk::news::{NewsApiClient, NewsSource};
use newsdesk::paging::PagingConfig;
use newsdesk::storage::{Article, Database, DatabaseError};
use newsdesk::{NewsPager, NewsRepository};

/// Get the config directory path (~/.config/newsdesk/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsdesk"))
}

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "Offline-first news reader backed by NewsAPI")]
struct Args {
    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh and list top headlines
    Headlines {
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Search all articles
    Search {
        query: String,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// List bookmarked articles
    Bookmarks,
    /// Toggle the bookmark on an article, caching it first if unseen
    Bookmark {
        url: String,
        /// Title to cache for an article that is not stored yet
        #[arg(long)]
        title: Option<String>,
    },
    /// Show a cached article
    Show { url: String },
}

fn format_published(published_at: Option<i64>) -> String {
    published_at
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "undated".to_string())
}

fn print_article(index: usize, article: &Article) {
    let mark = if article.is_bookmarked { "*" } else { " " };
    println!("{:>3}. {} {}", index + 1, mark, article.title);
    println!(
        "        {} | {} | {}",
        article.source_name.as_deref().unwrap_or("unknown source"),
        format_published(article.published_at),
        article.url
    );
}

/// Refresh a session, then append until `pages` pages are loaded.
async fn load_pages<S: NewsSource>(pager: &mut NewsPager<S>, pages: usize) {
    pager.refresh().await;
    if let Some(err) = pager.load_states().refresh.error() {
        eprintln!("Warning: refresh failed, showing cached articles: {}", err);
    }

    while pager.pages().len() < pages && !pager.is_end_of_pagination() {
        let before = pager.item_count();
        pager.append().await;
        if let Some(err) = pager.load_states().append.error() {
            eprintln!("Warning: could not load more articles: {}", err);
            break;
        }
        if pager.item_count() == before {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;
    tracing::debug!(config = ?config, "Effective configuration");

    let db_path = config
        .database_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir.join("news.db"));

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newsdesk appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let http_client = reqwest::Client::builder()
        .user_agent(concat!("newsdesk/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let mut client = NewsApiClient::new(http_client, &config.base_url)
        .with_context(|| format!("Invalid base_url '{}'", config.base_url))?
        .with_country(config.country.clone())
        .with_category(config.category.clone())
        .with_timeout(Duration::from_secs(config.request_timeout_secs))
        .with_retry(config.max_retries, Duration::from_secs(1));
    match config.resolve_api_key() {
        Some(key) => client = client.with_api_key(SecretString::from(key)),
        None => eprintln!(
            "Warning: no API key configured. Set {} or api_key in config.toml.",
            API_KEY_ENV
        ),
    }

    let repo = NewsRepository::with_paging_config(
        db,
        client,
        PagingConfig {
            page_size: config.page_size,
        },
    );

    match args.command {
        Command::Headlines { pages } => {
            let mut pager = repo.headlines();
            load_pages(&mut pager, pages.max(1)).await;
            if pager.item_count() == 0 {
                println!("No headlines cached.");
            }
            for (i, article) in pager.items().enumerate() {
                print_article(i, article);
            }
        }
        Command::Search { query, pages } => {
            let mut index = 0;
            let mut batches = std::pin::pin!(repo.search(query).into_page_stream().take(pages.max(1)));
            while let Some(batch) = batches.next().await {
                match batch {
                    Ok(articles) => {
                        for article in &articles {
                            print_article(index, article);
                            index += 1;
                        }
                    }
                    Err(e) => {
                        eprintln!("Search failed: {}", e);
                        break;
                    }
                }
            }
            if index == 0 {
                println!("No results.");
            }
        }
        Command::Bookmarks => {
            let saved = repo
                .bookmarked_articles()
                .await
                .context("Failed to load bookmarks")?;
            if saved.is_empty() {
                println!("No bookmarks yet.");
            }
            for (i, article) in saved.iter().enumerate() {
                print_article(i, article);
            }
        }
        Command::Bookmark { url, title } => {
            let seed = Article::new(url.clone(), title.unwrap_or_else(|| url.clone()));
            if repo
                .upsert_article(&seed)
                .await
                .context("Failed to cache article")?
            {
                tracing::debug!(url = %url, "Cached article before bookmarking");
            }
            let article = repo
                .get_article_by_url(&url)
                .await
                .context("Failed to look up article")?
                .unwrap_or(seed);
            let bookmarked = repo
                .toggle_bookmark(&article)
                .await
                .context("Failed to toggle bookmark")?;
            if bookmarked {
                println!("Bookmarked: {}", article.title);
            } else {
                println!("Removed bookmark: {}", article.title);
            }
        }
        Command::Show { url } => {
            let Some(article) = repo
                .get_article_by_url(&url)
                .await
                .context("Failed to look up article")?
            else {
                eprintln!("Not cached: {}", url);
                std::process::exit(1);
            };
            println!("{}", article.title);
            if let Some(author) = &article.author {
                println!("by {}", author);
            }
            println!(
                "{} | {}",
                article.source_name.as_deref().unwrap_or("unknown source"),
                format_published(article.published_at)
            );
            println!("{}", article.url);
            if article.is_bookmarked {
                println!("[bookmarked]");
            }
            if let Some(description) = &article.description {
                println!();
                println!("{}", description);
            }
            if let Some(content) = &article.content {
                println!();
                println!("{}", content);
            }
        }
    }

    Ok(())
}
