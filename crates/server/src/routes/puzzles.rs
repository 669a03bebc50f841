use axum::{Extension, Json};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::db::puzzles::{self, PuzzleRow};
use crate::error::AppError;

/// GET /api/puzzles/random
pub async fn get_random_puzzle(
    Extension(pool): Extension<PgPool>,
) -> Result<Json<PuzzleRow>, AppError> {
    let puzzle = puzzles::fetch_random(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("No puzzle found".to_string()))?;

    Ok(Json(puzzle))
}

/// GET /api/puzzles/stats
pub async fn get_puzzle_stats(
    Extension(pool): Extension<PgPool>,
) -> Result<Json<JsonValue>, AppError> {
    let total = puzzles::count(&pool).await?;
    let (avg_rating, min_rating, max_rating) = puzzles::rating_stats(&pool).await?;

    Ok(Json(serde_json::json!({
        "total": total,
        "rating": {
            "avg": avg_rating,
            "min": min_rating,
            "max": max_rating,
        },
    })))
}
