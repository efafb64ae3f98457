use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::SelectorConfig;
use crate::error::{AppError, Result};
use crate::models::{ArticleSummary, NewArticle};

/// Pulls article summaries out of the index page and article bodies out of
/// detail pages.
pub struct Extractor {
    base: Url,
    article: Selector,
    header: Selector,
    link_attribute: String,
    date: Selector,
    paragraph: Selector,
}

impl Extractor {
    pub fn new(base_url: &str, selectors: &SelectorConfig) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid base url {base_url}: {e}")))?;

        Ok(Self {
            base,
            article: parse_selector(&selectors.article)?,
            header: parse_selector(&selectors.header)?,
            link_attribute: selectors.link_attribute.clone(),
            date: parse_selector(&selectors.date)?,
            paragraph: parse_selector(&selectors.paragraph)?,
        })
    }

    /// Summaries in page order. Entries without a link are skipped.
    pub fn parse_index(&self, html: &str) -> Result<Vec<ArticleSummary>> {
        let document = Html::parse_document(html);
        let mut summaries = Vec::new();

        for (index, element) in document.select(&self.article).enumerate() {
            let header = element
                .select(&self.header)
                .map(element_text)
                .collect::<Vec<_>>()
                .join(" ");

            let Some(link) = element
                .value()
                .attr(&self.link_attribute)
                .map(str::trim)
                .filter(|l| !l.is_empty())
            else {
                tracing::warn!(index, header = %header, "index entry has no link, skipping");
                continue;
            };

            let url = self
                .base
                .join(link)
                .map_err(|e| AppError::Parse(format!("bad article link {link:?}: {e}")))?;

            summaries.push(ArticleSummary {
                header,
                link: link.to_string(),
                url: url.to_string(),
            });
        }

        tracing::debug!(count = summaries.len(), "index entries parsed");
        Ok(summaries)
    }

    /// Build the full article from its detail page. A missing date element
    /// yields an empty date.
    pub fn parse_detail(&self, summary: &ArticleSummary, html: &str) -> NewArticle {
        let document = Html::parse_document(html);

        let date = document
            .select(&self.date)
            .next()
            .map(element_text)
            .unwrap_or_default();

        let content = document
            .select(&self.paragraph)
            .map(element_text)
            .collect::<Vec<_>>()
            .join("\n");

        NewArticle {
            header: summary.header.clone(),
            date,
            content,
            url: summary.url.clone(),
        }
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Config(format!("invalid selector {css:?}: {e:?}")))
}

// Text of an element with runs of whitespace collapsed.
fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
