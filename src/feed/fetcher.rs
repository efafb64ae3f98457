use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{ArticleSummary, NewArticle};

use super::extract::Extractor;

/// Where the sync job gets its articles from.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Summaries from the index page, newest first.
    async fn fetch_index(&self) -> Result<Vec<ArticleSummary>>;

    /// Full article behind one summary.
    async fn fetch_article(&self, summary: &ArticleSummary) -> Result<NewArticle>;
}

pub struct PageFetcher {
    client: Client,
    index_url: String,
    extractor: Extractor,
}

impl PageFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            index_url: config.index_url(),
            extractor: Extractor::new(&config.base_url, &config.selectors)?,
        })
    }

    async fn get_html(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ArticleSource for PageFetcher {
    async fn fetch_index(&self) -> Result<Vec<ArticleSummary>> {
        let html = self.get_html(&self.index_url).await?;
        tracing::debug!(url = %self.index_url, bytes = html.len(), "fetched index page");
        self.extractor.parse_index(&html)
    }

    async fn fetch_article(&self, summary: &ArticleSummary) -> Result<NewArticle> {
        let html = self.get_html(&summary.url).await?;
        tracing::debug!(link = %summary.link, header = %summary.header, "fetched article page");
        Ok(self.extractor.parse_detail(summary, &html))
    }
}
