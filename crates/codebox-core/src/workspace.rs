//! Per-job scratch directories mounted into sandboxes.

use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::WorkspaceConfig;
use crate::job::Language;

/// Ephemeral directory holding exactly one source file.
///
/// The directory is removed by [`Workspace::close`], or when the value is
/// dropped if `close` is never reached.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    entry_path: PathBuf,
}

impl Workspace {
    /// Creates a fresh directory and writes `code` into it under the
    /// language's entry filename.
    pub async fn materialize(
        config: &WorkspaceConfig,
        language: Language,
        code: &str,
    ) -> Result<Self, std::io::Error> {
        let mut builder = Builder::new();
        builder.prefix(&config.prefix);
        let dir = match &config.root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        // Sandbox users do not share our uid.
        set_mode(dir.path(), 0o777).await?;

        let entry_path = dir.path().join(language.entry_filename());
        let mut file = fs::File::create(&entry_path).await?;
        file.write_all(code.as_bytes()).await?;
        file.flush().await?;
        set_mode(&entry_path, 0o666).await?;

        Ok(Self { dir, entry_path })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    /// Removes the directory and everything in it.
    pub fn close(self) -> Result<(), std::io::Error> {
        self.dir.close()
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), std::io::Error> {
    Ok(())
}
