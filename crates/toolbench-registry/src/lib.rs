mod feed;
mod fetch;
mod git_ops;
mod toolchain_store;

pub use feed::{resolve_location, FeedParser, ToolchainFeedParser};
pub use fetch::{is_remote, local_path, url_to_filename, Fetcher, HttpFetcher};
pub use toolchain_store::{validate_toolchain_name, ToolchainRecord, ToolchainStore};

pub(crate) use git_ops::sync_git_feed;
