use std::env;
use std::path::PathBuf;

use puzzle_core::PromotionPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub cors_origin: Option<String>,
    pub puzzle_csv: Option<PathBuf>,
    pub promotion_policy: PromotionPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            cors_origin: env::var("CORS_ORIGIN").ok(),
            puzzle_csv: env::var("PUZZLE_CSV").ok().map(PathBuf::from),
            promotion_policy: match env::var("PROMOTION_POLICY").as_deref() {
                Ok("auto_queen") => PromotionPolicy::AutoQueen,
                _ => PromotionPolicy::Prompt,
            },
        }
    }
}
