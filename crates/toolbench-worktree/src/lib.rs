mod project;
mod solver;
mod worktree;

pub use project::{BuildProject, PROJECT_FILE_NAME};
pub use solver::DepsSolver;
pub use worktree::{BuildWorktree, WORKTREE_DIR_NAME, WORKTREE_FILE_NAME};
