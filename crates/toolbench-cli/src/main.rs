mod completion;
mod dispatch;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use toolbench_core::{DependencyKind, DependencyKinds};
use tracing_subscriber::EnvFilter;

use crate::completion::CliCompletionShell;
use crate::dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "toolbench", version)]
#[command(about = "Multi-project build and toolchain manager", long_about = None)]
struct Cli {
    /// Root of toolchains, caches and state. Defaults to $TOOLBENCH_PREFIX,
    /// then ~/.toolbench.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage toolchains and their packages.
    Toolchain {
        #[command(subcommand)]
        command: ToolchainCommands,
    },
    /// Print the projects and packages needed by projects of a worktree.
    Deps(DepsArgs),
    /// Print the sdk directories a project builds against.
    SdkDirs {
        project: String,
        #[command(flatten)]
        selection: WorktreeSelection,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ToolchainCommands {
    Create {
        name: String,
        #[command(flatten)]
        feed: FeedArgs,
    },
    List,
    Info {
        name: Option<String>,
    },
    /// Reconcile toolchains with their feeds; every toolchain when no name
    /// is given.
    Update {
        name: Option<String>,
        #[command(flatten)]
        feed: FeedArgs,
        /// Accept the checksum of downloaded archives and write it back to
        /// the feed.
        #[arg(long)]
        update_checksums: bool,
    },
    Remove {
        name: String,
    },
    AddPackage {
        #[arg(short = 'c', long = "toolchain")]
        toolchain: String,
        package: String,
        /// Package archive or directory.
        path: PathBuf,
    },
    RemovePackage {
        #[arg(short = 'c', long = "toolchain")]
        toolchain: String,
        package: String,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct FeedArgs {
    /// Feed location: path, file:// or http(s):// url, or git repository.
    #[arg(long)]
    feed: Option<String>,
    /// Branch of a git feed.
    #[arg(long, requires = "feed_name")]
    branch: Option<String>,
    /// Name of the feed inside a git feed repository (feeds/<name>.xml).
    #[arg(long, requires = "branch")]
    feed_name: Option<String>,
}

#[derive(Args, Debug)]
struct DepsArgs {
    /// Projects to solve; the project containing the current directory when
    /// empty.
    projects: Vec<String>,
    #[command(flatten)]
    selection: WorktreeSelection,
    /// List the projects depending on the given ones instead.
    #[arg(long)]
    reverse: bool,
    /// Toolchain providing packages.
    #[arg(short = 'c', long = "toolchain")]
    toolchain: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct WorktreeSelection {
    /// Worktree root; discovered from the current directory when omitted.
    #[arg(long)]
    worktree: Option<PathBuf>,
    /// Dependency kinds to follow. Defaults to build.
    #[arg(long = "kind", value_enum)]
    kinds: Vec<KindArg>,
    /// Build config selecting `build-<config>` directories.
    #[arg(long)]
    config: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum KindArg {
    Build,
    #[value(alias = "run")]
    Runtime,
    Test,
}

impl From<KindArg> for DependencyKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Build => DependencyKind::Build,
            KindArg::Runtime => DependencyKind::Runtime,
            KindArg::Test => DependencyKind::Test,
        }
    }
}

impl WorktreeSelection {
    fn dependency_kinds(&self) -> Result<DependencyKinds> {
        if self.kinds.is_empty() {
            return Ok(DependencyKinds::build());
        }
        DependencyKinds::new(self.kinds.iter().copied().map(DependencyKind::from))
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_cli(cli)
}
