use rusqlite::{params, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Article, NewArticle};

const ARTICLE_COLUMNS: &str = "id, header, date, content, url";

#[derive(Clone)]
pub struct ArticleStore {
    conn: Connection,
}

impl ArticleStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace every article, keyed by url, in one transaction.
    ///
    /// The whole call is tagged with a fresh batch number and each article
    /// keeps its index within the batch, so `query_all` can return the most
    /// recent page order.
    pub async fn upsert_all(&self, articles: Vec<NewArticle>) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }

        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let batch: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(batch), 0) + 1 FROM articles",
                    [],
                    |row| row.get(0),
                )?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO articles (header, date, content, url, batch, position)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                           ON CONFLICT(url) DO UPDATE SET
                               header = excluded.header,
                               date = excluded.date,
                               content = excluded.content,
                               batch = excluded.batch,
                               position = excluded.position,
                               updated_at = datetime('now')"#,
                    )?;
                    for (position, article) in articles.iter().enumerate() {
                        stmt.execute(params![
                            article.header,
                            article.date,
                            article.content,
                            article.url,
                            batch,
                            position as i64,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(articles.len())
            })
            .await?;

        tracing::debug!(count = written, "upserted articles");
        Ok(written)
    }

    /// Snapshot of all articles: latest batch first, each batch in page order.
    pub async fn query_all(&self) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY batch DESC, position ASC, id ASC"
                ))?;
                let articles = stmt
                    .query_map([], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    #[cfg(test)]
    pub async fn find_by_url(&self, url: &str) -> Result<Option<Article>> {
        use rusqlite::OptionalExtension;

        let url = url.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1"),
                        params![url],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn count(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    /// Remove every stored article so the next sync re-fetches from scratch.
    pub async fn delete_all(&self) -> Result<usize> {
        let removed = self
            .conn
            .call(|conn| {
                let removed = conn.execute("DELETE FROM articles", [])?;
                Ok(removed)
            })
            .await?;
        tracing::info!(removed, "cleared article store");
        Ok(removed)
    }
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        header: row.get(1)?,
        date: row.get(2)?,
        content: row.get(3)?,
        url: row.get(4)?,
    })
}
