//! `.rar` expansion through external archivers.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use crate::error::ExtractError;
use crate::tool::{ToolRunError, find_on_path, run_tool};
use crate::types::{Document, DocumentKind};

pub const KNOWN_ARCHIVERS: &[&str] = &["unrar", "7z", "7za", "bsdtar", "unar"];

const ARCHIVE_NAME: &str = "archive.rar";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Archiver {
    Unrar(PathBuf),
    /// `7z` or `7za`.
    SevenZip(PathBuf),
    Bsdtar(PathBuf),
    Unar(PathBuf),
}

impl Archiver {
    fn from_name(name: &str, path: PathBuf) -> Option<Self> {
        match name {
            "unrar" => Some(Self::Unrar(path)),
            "7z" | "7za" => Some(Self::SevenZip(path)),
            "bsdtar" => Some(Self::Bsdtar(path)),
            "unar" => Some(Self::Unar(path)),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unrar(_) => "unrar",
            Self::SevenZip(_) => "7z",
            Self::Bsdtar(_) => "bsdtar",
            Self::Unar(_) => "unar",
        }
    }

    fn program(&self) -> &Path {
        match self {
            Self::Unrar(p) | Self::SevenZip(p) | Self::Bsdtar(p) | Self::Unar(p) => p,
        }
    }

    fn args(&self, archive: &Path, outdir: &Path) -> Vec<OsString> {
        let archive = archive.as_os_str().to_owned();
        let outdir = outdir.as_os_str().to_owned();
        let flag = |s: &str| OsStr::new(s).to_owned();
        match self {
            Self::Unrar(_) => vec![flag("x"), flag("-idq"), flag("-o+"), archive, outdir],
            Self::SevenZip(_) => {
                let mut out = flag("-o");
                out.push(&outdir);
                vec![flag("x"), flag("-y"), flag("-bd"), out, archive]
            }
            Self::Bsdtar(_) => vec![flag("-xf"), archive, flag("-C"), outdir],
            Self::Unar(_) => vec![
                flag("-quiet"),
                flag("-force-overwrite"),
                flag("-output-directory"),
                outdir,
                archive,
            ],
        }
    }
}

/// Installed archivers in preference order, probed once at startup.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExpander {
    archivers: Vec<Archiver>,
    timeout: Duration,
}

impl ArchiveExpander {
    #[must_use]
    pub fn probe<S: AsRef<str>>(names: &[S], timeout: Duration) -> Self {
        let mut archivers: Vec<Archiver> = Vec::new();
        for name in names {
            let name = name.as_ref();
            let Some(archiver) = find_on_path(name).and_then(|p| Archiver::from_name(name, p))
            else {
                tracing::debug!(tool = name, "archiver not installed");
                continue;
            };
            if archivers.iter().any(|a| a.name() == archiver.name()) {
                continue;
            }
            tracing::info!(tool = name, path = %archiver.program().display(), "archiver available");
            archivers.push(archiver);
        }
        if archivers.is_empty() {
            tracing::warn!("no archiver installed; .rar files cannot be expanded");
        }
        Self {
            archivers,
            timeout,
        }
    }

    #[must_use]
    pub fn from_archivers(archivers: Vec<Archiver>, timeout: Duration) -> Self {
        Self {
            archivers,
            timeout,
        }
    }

    #[must_use]
    pub fn archivers(&self) -> &[Archiver] {
        &self.archivers
    }

    /// Unpack `bytes` into a scoped temporary directory and return the
    /// `.doc`/`.docx` members, sorted by path, at most `max_entries` of them.
    ///
    /// Members are named `"<archive name> / <relative path>"`. An archive with
    /// no matching members yields an empty vector. The workspace is removed
    /// on every exit path.
    ///
    /// # Errors
    ///
    /// `NoToolAvailable` if no archiver is installed or none could be spawned,
    /// `CorruptArchive` if an archiver ran and rejected the file,
    /// `ToolTimeout` if every attempted run timed out.
    pub async fn expand(
        &self,
        name: &str,
        bytes: &[u8],
        max_entries: usize,
    ) -> Result<Vec<Document>, ExtractError> {
        if self.archivers.is_empty() {
            return Err(ExtractError::NoToolAvailable {
                capability: "archive",
            });
        }

        let workspace = tempfile::Builder::new().prefix("tender-rar-").tempdir()?;
        let archive = workspace.path().join(ARCHIVE_NAME);
        let outdir = workspace.path().join("out");
        tokio::fs::write(&archive, bytes).await?;

        let mut rejected: Option<String> = None;
        let mut timed_out: Option<&'static str> = None;
        let mut unpacked = false;

        for archiver in &self.archivers {
            if tokio::fs::try_exists(&outdir).await? {
                tokio::fs::remove_dir_all(&outdir).await?;
            }
            tokio::fs::create_dir_all(&outdir).await?;

            match run_tool(archiver.program(), archiver.args(&archive, &outdir), self.timeout).await {
                Ok(_) => {
                    tracing::debug!(file = name, tool = archiver.name(), "archive unpacked");
                    unpacked = true;
                    break;
                }
                Err(ToolRunError::Spawn(e)) => {
                    tracing::warn!(file = name, tool = archiver.name(), error = %e, "archiver unavailable, trying next");
                }
                Err(ToolRunError::Timeout(_)) => {
                    tracing::warn!(file = name, tool = archiver.name(), "archiver timed out, trying next");
                    timed_out.get_or_insert(archiver.name());
                }
                Err(e @ ToolRunError::Failed { .. }) => {
                    tracing::warn!(file = name, tool = archiver.name(), error = %e, "archiver failed, trying next");
                    rejected.get_or_insert_with(|| format!("{}: {e}", archiver.name()));
                }
            }
        }

        if !unpacked {
            return Err(match (rejected, timed_out) {
                (Some(reason), _) => ExtractError::CorruptArchive {
                    name: name.to_owned(),
                    reason,
                },
                (None, Some(tool)) => ExtractError::ToolTimeout {
                    tool: tool.to_owned(),
                    after: self.timeout,
                },
                (None, None) => ExtractError::NoToolAvailable {
                    capability: "archive",
                },
            });
        }

        let archive_name = name.to_owned();
        let members = tokio::task::spawn_blocking(move || {
            collect_members(&archive_name, &outdir, max_entries)
        })
        .await
        .map_err(|e| ExtractError::Io(std::io::Error::other(e)))??;

        drop(workspace);
        Ok(members)
    }
}

fn collect_members(
    archive_name: &str,
    root: &Path,
    max_entries: usize,
) -> Result<Vec<Document>, ExtractError> {
    let mut members = Vec::new();
    let mut matched = 0usize;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(DocumentKind::from_extension)
            .filter(|k| !k.is_archive())
        else {
            continue;
        };

        matched += 1;
        if members.len() >= max_entries {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = std::fs::read(entry.path())?;
        members.push(Document::new(
            format!("{archive_name} / {relative}"),
            kind,
            bytes,
        ));
    }

    if matched > members.len() {
        tracing::warn!(
            file = archive_name,
            found = matched,
            kept = members.len(),
            "archive member limit reached, remaining documents skipped"
        );
    }

    Ok(members)
}
