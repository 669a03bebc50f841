pub mod health;
pub mod play;
pub mod puzzles;
