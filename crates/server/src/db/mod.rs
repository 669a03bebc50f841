pub mod pool;
pub mod puzzles;
