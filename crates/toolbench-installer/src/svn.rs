use std::path::Path;
use std::process::Command;

use anyhow::Result;

use crate::artifact::run_command;

/// Version-control backend for `<svn_package>` entries.
pub trait SvnClient {
    fn checkout(&self, url: &str, revision: Option<&str>, dest: &Path) -> Result<()>;
    fn update(&self, dest: &Path, revision: Option<&str>) -> Result<()>;
}

/// Runs the `svn` command line client.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvnCommand;

impl SvnClient for SvnCommand {
    fn checkout(&self, url: &str, revision: Option<&str>, dest: &Path) -> Result<()> {
        let mut command = Command::new("svn");
        command.arg("checkout").arg("--non-interactive");
        if let Some(revision) = revision {
            command.arg("-r").arg(revision);
        }
        command.arg(url).arg(dest);
        run_command(&mut command, &format!("svn checkout of {url} failed"))
    }

    fn update(&self, dest: &Path, revision: Option<&str>) -> Result<()> {
        let mut command = Command::new("svn");
        command.arg("update").arg("--non-interactive");
        if let Some(revision) = revision {
            command.arg("-r").arg(revision);
        }
        command.arg(dest);
        run_command(
            &mut command,
            &format!("svn update of {} failed", dest.display()),
        )
    }
}
