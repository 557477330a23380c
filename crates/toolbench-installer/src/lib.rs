mod artifact;
mod database;
mod layout;
mod reconcile;
mod svn;

pub use artifact::extract_archive;
pub use database::{Database, UpdateTransport};
pub use layout::{default_user_prefix, resolve_prefix, ToolbenchLayout, PREFIX_ENV_VAR};
pub use reconcile::{plan_update, PackageChange, UpdateOptions, UpdatePlan, UpdateReport};
pub use svn::{SvnClient, SvnCommand};

#[cfg(test)]
mod tests;
