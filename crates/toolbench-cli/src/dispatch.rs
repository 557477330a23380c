use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use toolbench_installer::{
    resolve_prefix, Database, SvnCommand, ToolbenchLayout, UpdateOptions, UpdateTransport,
};
use toolbench_registry::{
    validate_toolchain_name, HttpFetcher, ToolchainFeedParser, ToolchainRecord, ToolchainStore,
};
use toolbench_resolver::Direction;
use toolbench_worktree::{BuildProject, BuildWorktree, DepsSolver};
use tracing::warn;

use crate::completion::write_completions_script;
use crate::render::{
    format_package_lines, format_path_lines, format_project_lines, format_toolchain_list_lines,
    format_update_report_lines, ProgressFetcher, TerminalRenderer,
};
use crate::{Cli, Commands, DepsArgs, FeedArgs, ToolchainCommands, WorktreeSelection};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Toolchain { command } => {
            let layout = ToolbenchLayout::new(resolve_prefix(cli.prefix.as_deref())?);
            run_toolchain_command(&layout, command, renderer)?;
        }
        Commands::Deps(args) => {
            run_deps_command(cli.prefix.as_deref(), args, renderer)?;
        }
        Commands::SdkDirs { project, selection } => {
            let kinds = selection.dependency_kinds()?;
            let worktree = open_worktree(&selection)?;
            let project = worktree.get_build_project(&project)?;
            let dirs = DepsSolver::new(&worktree).get_sdk_dirs(project, &kinds)?;
            renderer.print_lines(&format_path_lines(&dirs));
        }
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout();
            write_completions_script(shell, &mut stdout)?;
        }
    }

    Ok(())
}

fn run_toolchain_command(
    layout: &ToolbenchLayout,
    command: ToolchainCommands,
    renderer: TerminalRenderer,
) -> Result<()> {
    let store = ToolchainStore::new(layout.prefix());

    match command {
        ToolchainCommands::Create { name, feed } => {
            validate_toolchain_name(&name)?;
            let record = apply_feed_args(ToolchainRecord::new(&name), feed);
            store.add_toolchain(record.clone())?;
            layout.ensure_base_dirs()?;
            Database::open(layout, &name)?.save()?;
            renderer.print_status("ok", &format!("created toolchain {name}"));
            if record.feed.is_some() {
                update_toolchain(layout, &record, false, renderer)?;
            }
        }
        ToolchainCommands::List => {
            renderer.print_lines(&format_toolchain_list_lines(&store.list_toolchains()?));
        }
        ToolchainCommands::Info { name } => {
            let records = match name {
                Some(name) => vec![store.get_toolchain(&name)?],
                None => store.list_toolchains()?,
            };
            for record in records {
                let database = Database::open(layout, &record.name)?;
                renderer.print_section(&record.name);
                renderer.print_status(
                    "step",
                    &format!(
                        "toolchain {} ({} packages)",
                        record.name,
                        database.packages().count()
                    ),
                );
                renderer.print_lines(&format_package_lines(database.packages()));
            }
        }
        ToolchainCommands::Update {
            name,
            feed,
            update_checksums,
        } => match name {
            Some(name) => {
                let record = apply_feed_args(store.get_toolchain(&name)?, feed);
                store.upsert_toolchain(record.clone())?;
                update_toolchain(layout, &record, update_checksums, renderer)?;
            }
            None => {
                for record in store.list_toolchains()? {
                    if record.feed.is_none() {
                        warn!(toolchain = %record.name, "no feed configured; skipping");
                        continue;
                    }
                    update_toolchain(layout, &record, update_checksums, renderer)?;
                }
            }
        },
        ToolchainCommands::Remove { name } => {
            store.get_toolchain(&name)?;
            Database::open(layout, &name)?.remove()?;
            store.remove_toolchain(&name)?;
            renderer.print_status("remove", &format!("removed toolchain {name}"));
        }
        ToolchainCommands::AddPackage {
            toolchain,
            package,
            path,
        } => {
            store.get_toolchain(&toolchain)?;
            layout.ensure_base_dirs()?;
            let mut database = Database::open(layout, &toolchain)?;
            let added = database.install_local_package(&package, &path)?.to_string();
            database.save()?;
            renderer.print_status("add", &format!("added {added} to {toolchain}"));
        }
        ToolchainCommands::RemovePackage { toolchain, package } => {
            store.get_toolchain(&toolchain)?;
            let mut database = Database::open(layout, &toolchain)?;
            let removed = database.remove_package(&package)?;
            database.save()?;
            renderer.print_status("remove", &format!("removed {removed} from {toolchain}"));
        }
    }

    Ok(())
}

fn apply_feed_args(mut record: ToolchainRecord, args: FeedArgs) -> ToolchainRecord {
    if let Some(feed) = args.feed {
        record.feed = Some(feed);
        record.branch = args.branch;
        record.feed_name = args.feed_name;
    }
    record
}

fn update_toolchain(
    layout: &ToolbenchLayout,
    record: &ToolchainRecord,
    update_checksums: bool,
    renderer: TerminalRenderer,
) -> Result<()> {
    let feed = record
        .feed
        .as_deref()
        .ok_or_else(|| anyhow!("toolchain '{}' has no feed; pass --feed", record.name))?;
    layout.ensure_base_dirs()?;

    let http = HttpFetcher::new()?;
    let fetcher = ProgressFetcher::new(&http, renderer.style());
    let mut parser = ToolchainFeedParser::new(record.name.as_str(), &fetcher)
        .with_git_cache(layout.feeds_cache_dir());
    let mut database = Database::open(layout, &record.name)?;
    let options = UpdateOptions {
        branch: record.branch.clone(),
        feed_name: record.feed_name.clone(),
        update_checksums,
    };
    let report = database.update(
        &mut parser,
        feed,
        &options,
        UpdateTransport {
            fetcher: &fetcher,
            svn: &SvnCommand,
        },
    )?;
    renderer.print_lines(&format_update_report_lines(
        &record.name,
        &report,
        renderer.style(),
    ));
    Ok(())
}

fn run_deps_command(
    prefix: Option<&Path>,
    args: DepsArgs,
    renderer: TerminalRenderer,
) -> Result<()> {
    let kinds = args.selection.dependency_kinds()?;
    let mut worktree = open_worktree(&args.selection)?;
    if let Some(toolchain) = &args.toolchain {
        let layout = ToolbenchLayout::new(resolve_prefix(prefix)?);
        ToolchainStore::new(layout.prefix()).get_toolchain(toolchain)?;
        worktree.set_toolchain(Database::open(&layout, toolchain)?);
    }

    let requested = requested_projects(&worktree, &args.projects)?;
    let solver = DepsSolver::new(&worktree);
    let direction = if args.reverse {
        Direction::Reverse
    } else {
        Direction::Forward
    };

    let projects = solver.get_dep_projects(&requested, &kinds, direction)?;
    renderer.print_section("projects");
    renderer.print_lines(&format_project_lines(&projects));

    if !args.reverse && worktree.toolchain().is_some() {
        let packages = solver.get_dep_packages(&requested, &kinds)?;
        renderer.print_section("packages");
        renderer.print_lines(&format_package_lines(packages));
    }
    Ok(())
}

fn open_worktree(selection: &WorktreeSelection) -> Result<BuildWorktree> {
    let mut worktree = match &selection.worktree {
        Some(root) => {
            let root = fs::canonicalize(root)
                .with_context(|| format!("failed to resolve worktree {}", root.display()))?;
            BuildWorktree::open(&root)?
        }
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            BuildWorktree::discover(&cwd)?
        }
    };
    worktree.set_build_config(selection.config.as_deref());
    Ok(worktree)
}

/// The named projects, or the innermost project holding the current
/// directory.
fn requested_projects<'w>(
    worktree: &'w BuildWorktree,
    names: &[String],
) -> Result<Vec<&'w BuildProject>> {
    if !names.is_empty() {
        return names
            .iter()
            .map(|name| worktree.get_build_project(name))
            .collect();
    }

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    worktree
        .projects()
        .iter()
        .filter(|project| cwd.starts_with(project.src_dir()))
        .max_by_key(|project| project.src_dir().components().count())
        .map(|project| vec![project])
        .ok_or_else(|| {
            anyhow!(
                "no project given and {} is not inside a project of the worktree",
                cwd.display()
            )
        })
}
