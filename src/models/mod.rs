// Core models
pub mod event;
pub mod leaderboard;
pub mod outcome;

// Re-export commonly used types
pub use event::*;
pub use leaderboard::*;
pub use outcome::*;
