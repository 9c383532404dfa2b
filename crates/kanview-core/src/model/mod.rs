pub mod board;
pub mod issue;

pub use board::{BoardConfiguration, Column, ProjectRules};
pub use issue::{Issue, Rank, User, compare_ranks};
