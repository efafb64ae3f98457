mod repository;
mod schema;
mod state;

pub use repository::ArticleStore;
pub use state::StateStore;

use tokio_rusqlite::Connection;

use crate::error::Result;
use schema::SCHEMA;

/// Open the database file and make sure the schema exists.
///
/// The returned handle is cheap to clone; every clone talks to the same
/// background connection thread, so all statements are serialized.
pub async fn open(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path).await?;
    init(&conn).await?;
    Ok(conn)
}

#[cfg(test)]
pub async fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().await?;
    init(&conn).await?;
    Ok(conn)
}

async fn init(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    })
    .await?;
    Ok(())
}
