// Office document export: turns .docx/.xlsx into HTML with LibreOffice.

use crate::assets::companion_dirs;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::{info, warn};

const MACOS_SOFFICE: &str = "/Applications/LibreOffice.app/Contents/MacOS/soffice";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Word,
    Excel,
    Html,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "doc" | "docx" => Some(DocumentKind::Word),
            "xls" | "xlsx" => Some(DocumentKind::Excel),
            "htm" | "html" => Some(DocumentKind::Html),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported file type: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("LibreOffice 'soffice' not found; install LibreOffice or add soffice to PATH")]
    ConverterNotFound,

    #[error("failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited with {status}: {stderr}", program.display())]
    Failed {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("conversion produced no HTML file for {}", .0.display())]
    NoOutput(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Produces raw exported HTML from an Office document.
pub trait OfficeExporter {
    fn export(&self, src: &Path, workdir: &Path) -> Result<PathBuf, ExportError>;
}

pub struct SofficeExporter {
    configured: Option<PathBuf>,
}

impl SofficeExporter {
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self { configured }
    }

    /// Configured path, then `soffice` on PATH, then the macOS app bundle.
    pub fn locate(&self) -> Result<PathBuf, ExportError> {
        if let Some(p) = &self.configured {
            if p.is_file() {
                return Ok(p.clone());
            }
            warn!(path = %p.display(), "configured soffice not found; searching PATH");
        }
        if let Ok(p) = which::which("soffice") {
            return Ok(p);
        }
        let mac = Path::new(MACOS_SOFFICE);
        if mac.is_file() {
            return Ok(mac.to_path_buf());
        }
        Err(ExportError::ConverterNotFound)
    }
}

impl OfficeExporter for SofficeExporter {
    fn export(&self, src: &Path, workdir: &Path) -> Result<PathBuf, ExportError> {
        let program = self.locate()?;
        fs::create_dir_all(workdir).map_err(|source| ExportError::Io {
            path: workdir.to_path_buf(),
            source,
        })?;
        info!(src = %src.display(), program = %program.display(), "converting with LibreOffice");
        let output = Command::new(&program)
            .arg("--headless")
            .arg("--convert-to")
            .arg("html")
            .arg("--outdir")
            .arg(workdir)
            .arg(src)
            .output()
            .map_err(|source| ExportError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ExportError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        find_output(src, workdir)
    }
}

/// `<stem>.html`, `<stem>.htm`, or the first `<stem>*.htm*` in `workdir`.
fn find_output(src: &Path, workdir: &Path) -> Result<PathBuf, ExportError> {
    let stem = src
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ExportError::NoOutput(src.to_path_buf()))?;
    for ext in ["html", "htm"] {
        let p = workdir.join(format!("{stem}.{ext}"));
        if p.is_file() {
            return Ok(p);
        }
    }
    let entries = fs::read_dir(workdir).map_err(|source| ExportError::Io {
        path: workdir.to_path_buf(),
        source,
    })?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let ext = p
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            p.is_file() && name.starts_with(stem) && ext.starts_with("htm")
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| ExportError::NoOutput(src.to_path_buf()))
}

/// HTML path to feed the normalizer: exported for Office documents, the
/// input itself for HTML.
pub fn prepare_source(
    path: &Path,
    exporter: &dyn OfficeExporter,
    workdir: &Path,
) -> Result<PathBuf, ExportError> {
    match DocumentKind::from_path(path) {
        Some(DocumentKind::Html) => {
            if companion_dirs(path).is_empty() {
                warn!(
                    path = %path.display(),
                    "no companion folder (e.g. name_files or name.fld) next to the HTML file; images and styles may be missing"
                );
            }
            Ok(path.to_path_buf())
        }
        Some(DocumentKind::Word) | Some(DocumentKind::Excel) => exporter.export(path, workdir),
        None => Err(ExportError::Unsupported(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recording {
        calls: RefCell<Vec<PathBuf>>,
    }

    impl OfficeExporter for Recording {
        fn export(&self, src: &Path, workdir: &Path) -> Result<PathBuf, ExportError> {
            self.calls.borrow_mut().push(src.to_path_buf());
            Ok(workdir.join("out.html"))
        }
    }

    fn recording() -> Recording {
        Recording {
            calls: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn kinds_from_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("a/Report.DOCX")), Some(DocumentKind::Word));
        assert_eq!(DocumentKind::from_path(Path::new("Book.xls")), Some(DocumentKind::Excel));
        assert_eq!(DocumentKind::from_path(Path::new("x.htm")), Some(DocumentKind::Html));
        assert_eq!(DocumentKind::from_path(Path::new("x.pdf")), None);
        assert_eq!(DocumentKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn html_passes_through_office_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = recording();
        let html = dir.path().join("page.html");
        assert_eq!(prepare_source(&html, &exporter, dir.path()).unwrap(), html);
        assert!(exporter.calls.borrow().is_empty());

        let docx = dir.path().join("Report.docx");
        let out = prepare_source(&docx, &exporter, dir.path()).unwrap();
        assert_eq!(out, dir.path().join("out.html"));
        assert_eq!(*exporter.calls.borrow(), vec![docx]);

        assert!(matches!(
            prepare_source(Path::new("notes.txt"), &exporter, dir.path()),
            Err(ExportError::Unsupported(_))
        ));
    }

    #[test]
    fn finds_converter_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = Path::new("/in/Report.docx");
        assert!(matches!(find_output(src, dir.path()), Err(ExportError::NoOutput(_))));

        fs::write(dir.path().join("Report-1.xhtml"), "x").unwrap();
        fs::write(dir.path().join("Report (2).htm"), "x").unwrap();
        assert_eq!(find_output(src, dir.path()).unwrap(), dir.path().join("Report (2).htm"));

        fs::write(dir.path().join("Report.htm"), "x").unwrap();
        assert_eq!(find_output(src, dir.path()).unwrap(), dir.path().join("Report.htm"));
        fs::write(dir.path().join("Report.html"), "x").unwrap();
        assert_eq!(find_output(src, dir.path()).unwrap(), dir.path().join("Report.html"));
    }

    #[test]
    fn configured_converter_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("soffice");
        fs::write(&fake, "").unwrap();
        assert_eq!(SofficeExporter::new(Some(fake.clone())).locate().unwrap(), fake);
    }

    #[cfg(unix)]
    #[test]
    fn converter_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("Report.docx");
        if let Ok(false_bin) = which::which("false") {
            let err = SofficeExporter::new(Some(false_bin))
                .export(&src, &dir.path().join("out"))
                .unwrap_err();
            assert!(matches!(err, ExportError::Failed { .. }), "{err}");
        }
        if let Ok(true_bin) = which::which("true") {
            let err = SofficeExporter::new(Some(true_bin))
                .export(&src, &dir.path().join("out"))
                .unwrap_err();
            assert!(matches!(err, ExportError::NoOutput(_)), "{err}");
        }
    }
}
