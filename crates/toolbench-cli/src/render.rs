use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use toolbench_core::Package;
use toolbench_installer::UpdateReport;
use toolbench_registry::{url_to_filename, Fetcher, ToolchainRecord};
use toolbench_worktree::BuildProject;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn current() -> Self {
        Self {
            style: current_output_style(),
        }
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.style, title) {
            println!();
            println!("{}", colorize(section_style(), &line));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "add" => "[+]",
        "remove" => "[-]",
        "update" => "[~]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(format!("== {title} ==")),
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn spinner_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn format_toolchain_list_lines(records: &[ToolchainRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["no toolchains configured".to_string()];
    }
    records
        .iter()
        .map(|record| {
            let mut line = record.name.clone();
            if let Some(feed) = &record.feed {
                line.push_str(&format!(" feed={feed}"));
            }
            if let Some(branch) = &record.branch {
                line.push_str(&format!(" branch={branch}"));
            }
            if let Some(feed_name) = &record.feed_name {
                line.push_str(&format!(" feed-name={feed_name}"));
            }
            line
        })
        .collect()
}

pub(crate) fn format_package_lines<'a>(packages: impl IntoIterator<Item = &'a Package>) -> Vec<String> {
    packages
        .into_iter()
        .map(|package| {
            let mut line = package.to_string();
            if package.is_svn() {
                line.push_str(" (svn)");
            }
            if let Some(path) = &package.path {
                line.push_str(&format!(" in {}", path.display()));
            }
            line
        })
        .collect()
}

pub(crate) fn format_update_report_lines(
    toolchain: &str,
    report: &UpdateReport,
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = Vec::new();
    for name in &report.removed {
        lines.push(render_status_line(style, "remove", &format!("removed {name}")));
    }
    for change in &report.updated {
        let verb = if change.is_downgrade() {
            "downgraded"
        } else {
            "updated"
        };
        lines.push(render_status_line(style, "update", &format!("{verb} {change}")));
    }
    for change in &report.added {
        lines.push(render_status_line(style, "add", &format!("added {change}")));
    }
    for name in &report.svn {
        lines.push(render_status_line(style, "step", &format!("svn {name}")));
    }
    for name in &report.checksums_updated {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("checksum of {name} written back to the feed"),
        ));
    }
    if report.is_noop() {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("toolchain {toolchain} is up to date"),
        ));
    } else {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("toolchain {toolchain} updated"),
        ));
    }
    lines
}

pub(crate) fn format_project_lines(projects: &[&BuildProject]) -> Vec<String> {
    projects
        .iter()
        .map(|project| format!("{} ({})", project.name, project.src_dir().display()))
        .collect()
}

pub(crate) fn format_path_lines(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|path| path.display().to_string()).collect()
}

/// Shows a spinner while archives download.
pub(crate) struct ProgressFetcher<'a> {
    inner: &'a dyn Fetcher,
    style: OutputStyle,
}

impl<'a> ProgressFetcher<'a> {
    pub(crate) fn new(inner: &'a dyn Fetcher, style: OutputStyle) -> Self {
        Self { inner, style }
    }

    fn spinner(&self, url: &str) -> Option<ProgressBar> {
        if self.style != OutputStyle::Rich {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}") {
            spinner.set_style(style.tick_chars("|/-\\ "));
        }
        spinner.set_message(format!(
            "{} {}",
            colorize(spinner_label_style(), "download"),
            url_to_filename(url)
        ));
        spinner.enable_steady_tick(Duration::from_millis(80));
        Some(spinner)
    }
}

impl Fetcher for ProgressFetcher<'_> {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let spinner = self.spinner(url);
        let result = self.inner.download(url, dest_dir);
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        result
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        self.inner.fetch_text(url)
    }
}
