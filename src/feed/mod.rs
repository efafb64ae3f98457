mod extract;
mod fetcher;

pub use fetcher::{ArticleSource, PageFetcher};
