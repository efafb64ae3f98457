mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod notify;
mod services;
mod worker;

use app::App;
use config::Config;
use error::{AppError, Result};
use models::IntervalOption;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    // Load configuration
    let config = Config::load()?;

    let app = App::new(&config).await?;

    match args.get(1).map(String::as_str) {
        // Headless refresh: one forced sync, then exit
        Some("--refresh") => {
            let report = app.refresh_blocking().await?;
            println!("Fetched {} articles", report.fetched);
            if let Some(url) = report.notified {
                println!("New article: {}", url);
            }
        }

        Some("--set-interval") => {
            let option = args
                .get(2)
                .and_then(|m| m.parse::<u32>().ok())
                .and_then(IntervalOption::from_minutes)
                .ok_or_else(|| {
                    let choices: Vec<String> = IntervalOption::ALL
                        .iter()
                        .map(|o| o.minutes().to_string())
                        .collect();
                    AppError::Config(format!(
                        "--set-interval expects one of: {}",
                        choices.join(", ")
                    ))
                })?;
            app.set_interval(option.minutes()).await?;
            println!("Sync interval set to {}", option.label());
        }

        Some("--reset") => {
            let deleted = app.reset().await?;
            println!("Deleted {} articles", deleted);
        }

        Some("--list") => {
            for article in app.list().await? {
                let excerpt = article.content.lines().next().unwrap_or_default();
                println!(
                    "#{} {}  {}\n    {}\n    {}",
                    article.id, article.date, article.header, excerpt, article.url
                );
            }
        }

        Some(other) => {
            return Err(AppError::Config(format!("unknown argument: {other}")));
        }

        None => app.run_daemon().await?,
    }

    Ok(())
}
