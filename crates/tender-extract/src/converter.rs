//! Legacy `.doc` conversion through external command-line tools.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ExtractError;
use crate::tool::{ToolRunError, find_on_path, run_tool};

pub const KNOWN_CONVERTERS: &[&str] = &["soffice", "libreoffice", "antiword", "catdoc"];

const INPUT_NAME: &str = "input.doc";

/// One installed converter binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocConverter {
    /// LibreOffice headless conversion to UTF-8 text.
    Soffice(PathBuf),
    Antiword(PathBuf),
    Catdoc(PathBuf),
}

impl DocConverter {
    fn from_name(name: &str, path: PathBuf) -> Option<Self> {
        match name {
            "soffice" | "libreoffice" => Some(Self::Soffice(path)),
            "antiword" => Some(Self::Antiword(path)),
            "catdoc" => Some(Self::Catdoc(path)),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Soffice(_) => "soffice",
            Self::Antiword(_) => "antiword",
            Self::Catdoc(_) => "catdoc",
        }
    }

    fn program(&self) -> &Path {
        match self {
            Self::Soffice(p) | Self::Antiword(p) | Self::Catdoc(p) => p,
        }
    }

    async fn convert(
        &self,
        input: &Path,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<String, ToolRunError> {
        match self {
            Self::Soffice(program) => {
                let outdir = workdir.join("out");
                let profile = format!(
                    "-env:UserInstallation=file://{}",
                    workdir.join("profile").display()
                );
                let args: [&OsStr; 7] = [
                    OsStr::new(&profile),
                    OsStr::new("--headless"),
                    OsStr::new("--convert-to"),
                    OsStr::new("txt:Text (encoded):UTF8"),
                    OsStr::new("--outdir"),
                    outdir.as_os_str(),
                    input.as_os_str(),
                ];
                run_tool(program, args, timeout).await?;
                let converted = outdir.join(Path::new(INPUT_NAME).with_extension("txt"));
                let bytes = tokio::fs::read(&converted)
                    .await
                    .map_err(|e| ToolRunError::Failed {
                        status: "no output".into(),
                        stderr: format!("{}: {e}", converted.display()),
                    })?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Self::Antiword(program) => {
                let out = run_tool(
                    program,
                    [
                        OsStr::new("-m"),
                        OsStr::new("UTF-8.txt"),
                        OsStr::new("-w"),
                        OsStr::new("0"),
                        input.as_os_str(),
                    ],
                    timeout,
                )
                .await?;
                Ok(String::from_utf8_lossy(&out.stdout).into_owned())
            }
            Self::Catdoc(program) => {
                let out = run_tool(
                    program,
                    [
                        OsStr::new("-d"),
                        OsStr::new("utf-8"),
                        OsStr::new("-w"),
                        input.as_os_str(),
                    ],
                    timeout,
                )
                .await?;
                Ok(String::from_utf8_lossy(&out.stdout).into_owned())
            }
        }
    }
}

/// Installed `.doc` converters in preference order, probed once at startup.
#[derive(Debug, Clone, Default)]
pub struct ConverterChain {
    converters: Vec<DocConverter>,
    timeout: Duration,
}

impl ConverterChain {
    /// Resolve each configured converter name on `PATH`, keeping the
    /// configured order. Names that are unknown or not installed are skipped.
    #[must_use]
    pub fn probe<S: AsRef<str>>(names: &[S], timeout: Duration) -> Self {
        let mut converters: Vec<DocConverter> = Vec::new();
        for name in names {
            let name = name.as_ref();
            let Some(path) = find_on_path(name) else {
                tracing::debug!(tool = name, "converter not installed");
                continue;
            };
            let Some(converter) = DocConverter::from_name(name, path) else {
                tracing::warn!(tool = name, "unknown converter name, ignored");
                continue;
            };
            if converters.iter().any(|c| c.name() == converter.name()) {
                continue;
            }
            tracing::info!(tool = name, path = %converter.program().display(), "doc converter available");
            converters.push(converter);
        }
        if converters.is_empty() {
            tracing::warn!("no .doc converter installed; .doc files will be reported as unsupported");
        }
        Self {
            converters,
            timeout,
        }
    }

    #[must_use]
    pub fn from_converters(converters: Vec<DocConverter>, timeout: Duration) -> Self {
        Self {
            converters,
            timeout,
        }
    }

    #[must_use]
    pub fn converters(&self) -> &[DocConverter] {
        &self.converters
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Convert `.doc` bytes to plain text, trying each converter in order.
    ///
    /// A converter that fails for any reason hands over to the next one.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` when no converter could run at all,
    /// `CorruptDocument` when a converter ran and rejected the file,
    /// `ToolTimeout` when the only runs ended in timeouts.
    pub async fn convert_to_text(&self, name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        if self.converters.is_empty() {
            return Err(ExtractError::UnsupportedFormat {
                name: name.to_owned(),
            });
        }

        let workdir = tempfile::Builder::new().prefix("tender-doc-").tempdir()?;
        let input = workdir.path().join(INPUT_NAME);
        tokio::fs::write(&input, bytes).await?;

        let mut rejected: Option<String> = None;
        let mut timed_out: Option<&'static str> = None;

        for converter in &self.converters {
            match converter.convert(&input, workdir.path(), self.timeout).await {
                Ok(text) => {
                    tracing::debug!(file = name, tool = converter.name(), "doc converted");
                    return Ok(text);
                }
                Err(ToolRunError::Spawn(e)) => {
                    tracing::warn!(file = name, tool = converter.name(), error = %e, "converter unavailable, trying next");
                }
                Err(ToolRunError::Timeout(_)) => {
                    tracing::warn!(file = name, tool = converter.name(), "converter timed out, trying next");
                    timed_out.get_or_insert(converter.name());
                }
                Err(e @ ToolRunError::Failed { .. }) => {
                    tracing::warn!(file = name, tool = converter.name(), error = %e, "converter failed, trying next");
                    rejected.get_or_insert_with(|| format!("{}: {e}", converter.name()));
                }
            }
        }

        Err(match (rejected, timed_out) {
            (Some(reason), _) => ExtractError::CorruptDocument {
                name: name.to_owned(),
                reason,
            },
            (None, Some(tool)) => ExtractError::ToolTimeout {
                tool: tool.to_owned(),
                after: self.timeout,
            },
            (None, None) => ExtractError::UnsupportedFormat {
                name: name.to_owned(),
            },
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn empty_chain_is_unsupported() {
        let chain = ConverterChain::from_converters(vec![], Duration::from_secs(1));
        let err = chain.convert_to_text("a.doc", b"x").await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn first_working_converter_wins() {
        let dir = tempfile::tempdir().unwrap();
        let antiword = script(dir.path(), "antiword", "echo 'from antiword'");
        let catdoc = script(dir.path(), "catdoc", "echo 'from catdoc'");
        let chain = ConverterChain::from_converters(
            vec![DocConverter::Antiword(antiword), DocConverter::Catdoc(catdoc)],
            Duration::from_secs(5),
        );
        let text = chain.convert_to_text("a.doc", b"x").await.unwrap();
        assert_eq!(text.trim(), "from antiword");
    }

    #[tokio::test]
    async fn vanished_tool_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let catdoc = script(dir.path(), "catdoc", "cat \"$4\"");
        let chain = ConverterChain::from_converters(
            vec![
                DocConverter::Antiword(dir.path().join("gone")),
                DocConverter::Catdoc(catdoc),
            ],
            Duration::from_secs(5),
        );
        let text = chain.convert_to_text("a.doc", b"raw body").await.unwrap();
        assert_eq!(text, "raw body");
    }

    #[tokio::test]
    async fn rejection_reports_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let antiword = script(dir.path(), "antiword", "echo 'not a Word document' >&2; exit 1");
        let chain = ConverterChain::from_converters(
            vec![DocConverter::Antiword(antiword)],
            Duration::from_secs(5),
        );
        let err = chain.convert_to_text("a.doc", b"x").await.unwrap_err();
        match err {
            ExtractError::CorruptDocument { name, reason } => {
                assert_eq!(name, "a.doc");
                assert!(reason.contains("not a Word document"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_only_reports_tool_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let catdoc = script(dir.path(), "catdoc", "sleep 5");
        let chain = ConverterChain::from_converters(
            vec![DocConverter::Catdoc(catdoc)],
            Duration::from_millis(100),
        );
        let err = chain.convert_to_text("a.doc", b"x").await.unwrap_err();
        assert!(matches!(err, ExtractError::ToolTimeout { ref tool, .. } if tool == "catdoc"));
    }

    #[tokio::test]
    async fn all_spawn_failures_are_unsupported() {
        let chain = ConverterChain::from_converters(
            vec![DocConverter::Catdoc(PathBuf::from("/nonexistent/catdoc"))],
            Duration::from_secs(1),
        );
        let err = chain.convert_to_text("a.doc", b"x").await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat { .. }));
    }

    #[test]
    fn probe_skips_missing_and_unknown() {
        let chain = ConverterChain::probe(
            &["definitely-missing-converter", "sh"],
            Duration::from_secs(1),
        );
        assert!(chain.is_empty());
    }
}
