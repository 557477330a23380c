use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use toolbench_core::{ArchiveType, MANIFEST_FILE_NAME};
use tracing::debug;

/// Extracts `archive_path` into `dest`, replacing whatever was there.
///
/// Archives wrapping everything in one top-level directory are unwrapped,
/// unless a package manifest sits at the archive root.
pub fn extract_archive(
    archive_path: &Path,
    archive_type: ArchiveType,
    dest: &Path,
    scratch_root: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(scratch_root)
        .with_context(|| format!("failed to create {}", scratch_root.display()))?;
    let staged = tempfile::Builder::new()
        .prefix("extract-")
        .tempdir_in(scratch_root)
        .with_context(|| format!("failed creating tmp dir in {}", scratch_root.display()))?;

    match archive_type {
        ArchiveType::Tar => {
            let file = open_archive(archive_path)?;
            unpack_tar(file, archive_path, staged.path())?;
        }
        ArchiveType::TarGz => {
            let file = open_archive(archive_path)?;
            unpack_tar(GzDecoder::new(file), archive_path, staged.path())?;
        }
        ArchiveType::Zip => extract_zip(archive_path, staged.path())?,
    }

    let payload = payload_root(staged.path())?;
    debug!(
        archive = %archive_path.display(),
        payload = %payload.display(),
        "archive staged"
    );

    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("failed to remove existing package dir: {}", dest.display()))?;
    }
    move_dir_or_copy(&payload, dest)?;
    Ok(dest.to_path_buf())
}

fn open_archive(archive_path: &Path) -> Result<File> {
    File::open(archive_path).with_context(|| format!("failed to open {}", archive_path.display()))
}

fn unpack_tar(reader: impl Read, archive_path: &Path, dst: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive
        .unpack(dst)
        .with_context(|| format!("failed to extract tar archive {}", archive_path.display()))
}

fn extract_zip(archive_path: &Path, dst: &Path) -> Result<()> {
    if cfg!(windows) {
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(format!(
            "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            escape_ps_single_quote(archive_path),
            escape_ps_single_quote(dst)
        ));
        if run_command(
            &mut command,
            "failed to extract zip archive with powershell",
        )
        .is_ok()
        {
            return Ok(());
        }
    }

    let mut unzip_command = Command::new("unzip");
    unzip_command.arg("-q").arg(archive_path).arg("-d").arg(dst);
    if run_command(
        &mut unzip_command,
        "failed to extract zip archive with unzip",
    )
    .is_ok()
    {
        return Ok(());
    }

    run_command(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract zip archive with tar fallback",
    )
}

fn escape_ps_single_quote(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

/// The directory that becomes the package root.
fn payload_root(staged: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(staged)
        .with_context(|| format!("failed to read {}", staged.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to read {}", staged.display()))?;

    if entries.is_empty() {
        return Err(anyhow!("archive is empty"));
    }
    if staged.join(MANIFEST_FILE_NAME).is_file() {
        return Ok(staged.to_path_buf());
    }
    if let [single] = entries.as_slice() {
        let path = single.path();
        if path.is_dir() {
            return Ok(path);
        }
    }
    Ok(staged.to_path_buf())
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn move_dir_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create install parent: {}", parent.display()))?;
    }

    match fs::rename(src, dst) {
        Ok(_) => Ok(()),
        Err(_) => {
            copy_dir_recursive(src, dst)?;
            fs::remove_dir_all(src)
                .with_context(|| format!("failed to cleanup staging dir: {}", src.display()))?;
            Ok(())
        }
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let metadata = fs::symlink_metadata(&src_path)
            .with_context(|| format!("failed to stat {}", src_path.display()))?;
        if metadata.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
            continue;
        }

        #[cfg(unix)]
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&src_path)
                .with_context(|| format!("failed to read symlink {}", src_path.display()))?;
            std::os::unix::fs::symlink(&target, &dst_path).with_context(|| {
                format!(
                    "failed to create symlink {} -> {}",
                    dst_path.display(),
                    target.display()
                )
            })?;
            continue;
        }

        fs::copy(&src_path, &dst_path).with_context(|| {
            format!(
                "failed to copy {} to {}",
                src_path.display(),
                dst_path.display()
            )
        })?;
    }
    Ok(())
}
