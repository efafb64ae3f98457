mod article;
mod sync_state;

pub use article::{Article, ArticleSummary, NewArticle};
pub use sync_state::{IntervalOption, SyncState, DEFAULT_INTERVAL_MINUTES};
