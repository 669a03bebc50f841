use std::path::Path;

use anyhow::Context;
use sqlx::PgPool;
use tokio::io::AsyncBufReadExt;

use crate::error::AppError;

/// One row of the puzzle bank. `fen` and `moves` drive the replay engine;
/// the rest is passthrough metadata from the Lichess export.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PuzzleRow {
    pub id: i64,
    pub puzzle_id: Option<String>,
    pub fen: String,
    pub moves: String,
    pub rating: Option<i32>,
    pub rating_deviation: Option<i32>,
    pub popularity: Option<i32>,
    pub nb_plays: Option<i32>,
    pub themes: Option<String>,
    pub game_url: Option<String>,
    pub opening_tags: Option<String>,
}

/// Fetch one uniformly random puzzle, or None when the bank is empty.
pub async fn fetch_random(pool: &PgPool) -> Result<Option<PuzzleRow>, AppError> {
    let row = sqlx::query_as::<_, PuzzleRow>(
        r#"SELECT id, puzzle_id, fen, moves, rating, rating_deviation,
                  popularity, nb_plays, themes, game_url, opening_tags
           FROM puzzles
           ORDER BY RANDOM()
           LIMIT 1"#,
    )
    .fetch_optional(pool)
    .await
    .map_err(AppError::Sqlx)?;

    Ok(row)
}

pub async fn count(pool: &PgPool) -> Result<i64, AppError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM puzzles")
        .fetch_one(pool)
        .await
        .map_err(AppError::Sqlx)?;

    Ok(row.0)
}

/// Rating spread over the whole bank: (avg, min, max), all NULL when empty.
pub async fn rating_stats(
    pool: &PgPool,
) -> Result<(Option<f64>, Option<i32>, Option<i32>), AppError> {
    let row: (Option<f64>, Option<i32>, Option<i32>) = sqlx::query_as(
        "SELECT AVG(rating)::float8, MIN(rating), MAX(rating) FROM puzzles",
    )
    .fetch_one(pool)
    .await
    .map_err(AppError::Sqlx)?;

    Ok(row)
}

const SEED_BATCH_SIZE: usize = 1000;

/// One parsed line of the Lichess puzzle export.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedPuzzle {
    pub puzzle_id: String,
    pub fen: String,
    pub moves: String,
    pub rating: Option<i32>,
    pub rating_deviation: Option<i32>,
    pub popularity: Option<i32>,
    pub nb_plays: Option<i32>,
    pub themes: Option<String>,
    pub game_url: Option<String>,
    pub opening_tags: Option<String>,
}

/// Parse one export line
/// (PuzzleId,FEN,Moves,Rating,RatingDeviation,Popularity,NbPlays,Themes,GameUrl,OpeningTags).
/// The export never quotes fields, so a plain comma split holds.
pub fn parse_seed_line(line: &str) -> Option<SeedPuzzle> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 10 {
        return None;
    }

    let puzzle_id = fields[0].trim();
    let fen = fields[1].trim();
    let moves = fields[2].trim();
    if puzzle_id.is_empty() || fen.is_empty() || moves.is_empty() {
        return None;
    }

    Some(SeedPuzzle {
        puzzle_id: puzzle_id.to_string(),
        fen: fen.to_string(),
        moves: moves.to_string(),
        rating: fields[3].trim().parse().ok(),
        rating_deviation: fields[4].trim().parse().ok(),
        popularity: fields[5].trim().parse().ok(),
        nb_plays: fields[6].trim().parse().ok(),
        themes: non_empty(fields[7]),
        game_url: non_empty(fields[8]),
        opening_tags: non_empty(fields[9]),
    })
}

fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Insert a batch inside one transaction. Rows whose puzzle_id is already
/// in the bank are skipped.
async fn insert_batch(pool: &PgPool, batch: &[SeedPuzzle]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for puzzle in batch {
        sqlx::query(
            r#"INSERT INTO puzzles (
                puzzle_id, fen, moves, rating, rating_deviation, popularity,
                nb_plays, themes, game_url, opening_tags
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (puzzle_id) DO NOTHING"#,
        )
        .bind(&puzzle.puzzle_id)
        .bind(&puzzle.fen)
        .bind(&puzzle.moves)
        .bind(puzzle.rating)
        .bind(puzzle.rating_deviation)
        .bind(puzzle.popularity)
        .bind(puzzle.nb_plays)
        .bind(puzzle.themes.as_deref())
        .bind(puzzle.game_url.as_deref())
        .bind(puzzle.opening_tags.as_deref())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Stream a Lichess puzzle CSV into the bank. Returns the number of rows
/// handed to Postgres; malformed rows are skipped.
pub async fn seed_from_csv(pool: &PgPool, path: &Path) -> anyhow::Result<usize> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let mut lines = tokio::io::BufReader::new(file).lines();

    let mut batch: Vec<SeedPuzzle> = Vec::with_capacity(SEED_BATCH_SIZE);
    let mut total = 0usize;
    let mut skipped = 0usize;
    let mut first = true;

    while let Some(line) = lines.next_line().await? {
        if first {
            first = false;
            if line.starts_with("PuzzleId,") {
                continue;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_seed_line(&line) {
            Some(puzzle) => batch.push(puzzle),
            None => {
                skipped += 1;
                tracing::debug!("Skipping malformed puzzle row: {line}");
                continue;
            }
        }

        if batch.len() >= SEED_BATCH_SIZE {
            insert_batch(pool, &batch).await?;
            total += batch.len();
            batch.clear();
            tracing::debug!("Seeded {total} puzzles so far");
        }
    }

    if !batch.is_empty() {
        insert_batch(pool, &batch).await?;
        total += batch.len();
    }
    if skipped > 0 {
        tracing::warn!("Skipped {skipped} malformed puzzle rows");
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ROW: &str = "00sHx,q3k1nr/1pp1nQpp/3p4/1P2p3/4P3/B1PP1b2/B5PP/5K2 b k - 0 17,e8d7 a2e6 d7d8 f7f8,1760,80,83,72,mate mateIn2 middlegame short,https://lichess.org/yyznGmXs/black#34,Italian_Game Italian_Game_Classical_Variation";

    #[test]
    fn test_parse_seed_line() {
        let puzzle = parse_seed_line(SAMPLE_ROW).unwrap();
        assert_eq!(puzzle.puzzle_id, "00sHx");
        assert_eq!(
            puzzle.fen,
            "q3k1nr/1pp1nQpp/3p4/1P2p3/4P3/B1PP1b2/B5PP/5K2 b k - 0 17"
        );
        assert_eq!(puzzle.moves, "e8d7 a2e6 d7d8 f7f8");
        assert_eq!(puzzle.rating, Some(1760));
        assert_eq!(puzzle.rating_deviation, Some(80));
        assert_eq!(puzzle.themes.as_deref(), Some("mate mateIn2 middlegame short"));
        assert_eq!(
            puzzle.opening_tags.as_deref(),
            Some("Italian_Game Italian_Game_Classical_Variation")
        );
    }

    #[test]
    fn test_parse_seed_line_with_empty_tail_fields() {
        let row = "abc12,8/8/8/8/8/8/8/8 w - - 0 1,a2a4 a7a5,1200,75,90,10,endgame,,";
        let puzzle = parse_seed_line(row).unwrap();
        assert_eq!(puzzle.themes.as_deref(), Some("endgame"));
        assert_eq!(puzzle.game_url, None);
        assert_eq!(puzzle.opening_tags, None);
    }

    #[test]
    fn test_parse_seed_line_rejects_short_rows() {
        assert!(parse_seed_line("").is_none());
        assert!(parse_seed_line("onlyone,two").is_none());
    }

    #[test]
    fn test_parse_seed_line_tolerates_bad_numbers() {
        let row = "abc12,some fen,e2e4,notanum,80,83,72,t,u,o";
        let puzzle = parse_seed_line(row).unwrap();
        assert_eq!(puzzle.rating, None);
        assert_eq!(puzzle.rating_deviation, Some(80));
    }
}
