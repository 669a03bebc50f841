use sqlx::postgres::{PgPool, PgPoolOptions};

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run the full Postgres schema migration inline.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Puzzle bank (Lichess puzzle export)
CREATE TABLE IF NOT EXISTS puzzles (
    id               BIGSERIAL PRIMARY KEY,
    puzzle_id        TEXT UNIQUE,
    fen              TEXT NOT NULL,
    moves            TEXT NOT NULL,
    rating           INTEGER,
    rating_deviation INTEGER,
    popularity       INTEGER,
    nb_plays         INTEGER,
    themes           TEXT,
    game_url         TEXT,
    opening_tags     TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_puzzles_rating ON puzzles (rating);
"#;
