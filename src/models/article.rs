use serde::{Deserialize, Serialize};

/// A stored announcement. `url` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub header: String,
    pub date: String,
    pub content: String,
    pub url: String,
}

/// An extracted announcement that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArticle {
    pub header: String,
    pub date: String,
    pub content: String,
    pub url: String,
}

/// One entry of the index page, before its detail page is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub header: String,
    /// Link as it appears on the page, usually relative.
    pub link: String,
    /// `link` resolved against the site base URL.
    pub url: String,
}

