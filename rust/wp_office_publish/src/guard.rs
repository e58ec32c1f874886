// Single-slot revision guard.
//
// Every publish first captures the page's live content; the capture is the
// only undo generation kept. A publish never writes unless that capture
// succeeded (and, when a backup file is configured, was saved).

use crate::error::{PublishError, Step, StepError};
use crate::publisher::{Credentials, PageId, PagePublisher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_BACKUP_FILE: &str = "temp_backup.html";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backup {
    pub page: PageId,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardState {
    NoBackup,
    HasBackup,
}

#[derive(Serialize, Deserialize)]
struct BackupMeta {
    page: u64,
    bytes: usize,
}

/// Plain HTML file plus a JSON sidecar naming the page it came from.
#[derive(Clone, Debug)]
struct BackupFile {
    html: PathBuf,
    meta: PathBuf,
}

impl BackupFile {
    fn new(html: &Path) -> Self {
        let mut meta = html.as_os_str().to_owned();
        meta.push(".json");
        Self {
            html: html.to_path_buf(),
            meta: PathBuf::from(meta),
        }
    }

    fn io_err(path: &Path, source: io::Error) -> PublishError {
        PublishError::BackupIo {
            path: path.to_path_buf(),
            source,
        }
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn rename(from: &Path, to: &Path) -> Result<(), PublishError> {
        fs::rename(from, to).map_err(|e| Self::io_err(to, e))
    }

    /// Both files are staged before either is replaced. The old record goes
    /// first, so an interrupted save reads back as no backup rather than as
    /// new content under the old page.
    fn save(&self, backup: &Backup) -> Result<(), PublishError> {
        let meta = BackupMeta {
            page: backup.page.0,
            bytes: backup.content.len(),
        };
        let meta = serde_json::to_vec_pretty(&meta)
            .map_err(|e| Self::io_err(&self.meta, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let html_tmp = Self::tmp_path(&self.html);
        let meta_tmp = Self::tmp_path(&self.meta);
        fs::write(&html_tmp, backup.content.as_bytes()).map_err(|e| Self::io_err(&html_tmp, e))?;
        if let Err(e) = fs::write(&meta_tmp, &meta) {
            let _ = fs::remove_file(&html_tmp);
            return Err(Self::io_err(&meta_tmp, e));
        }
        match fs::remove_file(&self.meta) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Self::io_err(&self.meta, e)),
        }
        Self::rename(&html_tmp, &self.html)?;
        Self::rename(&meta_tmp, &self.meta)
    }

    fn load(&self) -> Result<Option<Backup>, PublishError> {
        let content = match fs::read_to_string(&self.html) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(&self.html, e)),
        };
        let meta = match fs::read(&self.meta) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.html.display(), "backup has no page record; ignoring it");
                return Ok(None);
            }
            Err(e) => return Err(Self::io_err(&self.meta, e)),
        };
        let meta: BackupMeta = match serde_json::from_slice(&meta) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.meta.display(), error = %e, "unreadable backup record; ignoring it");
                return Ok(None);
            }
        };
        if meta.bytes != content.len() {
            warn!(
                expected = meta.bytes,
                found = content.len(),
                "backup file does not match its record; ignoring it"
            );
            return Ok(None);
        }
        Ok(Some(Backup {
            page: PageId(meta.page),
            content,
        }))
    }

    fn remove(&self) -> Result<(), PublishError> {
        for p in [&self.html, &self.meta] {
            match fs::remove_file(p) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Self::io_err(p, e)),
            }
        }
        Ok(())
    }
}

pub struct RevisionGuard<P> {
    publisher: P,
    backup: Option<Backup>,
    store: Option<BackupFile>,
}

impl<P> RevisionGuard<P> {
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn state(&self) -> GuardState {
        match self.backup {
            Some(_) => GuardState::HasBackup,
            None => GuardState::NoBackup,
        }
    }

    pub fn backup(&self) -> Option<&Backup> {
        self.backup.as_ref()
    }
}

impl<P: PagePublisher> RevisionGuard<P> {
    /// In-memory slot only.
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            backup: None,
            store: None,
        }
    }

    /// Persist the slot to `path`, restoring whatever a previous session left there.
    pub fn with_backup_file(publisher: P, path: &Path) -> Result<Self, PublishError> {
        let store = BackupFile::new(path);
        let backup = store.load()?;
        if let Some(b) = &backup {
            info!(page = %b.page, path = %path.display(), "restored backup");
        }
        Ok(Self {
            publisher,
            backup,
            store: Some(store),
        })
    }

    /// Capture the page's live content as the backup, then replace it.
    ///
    /// If the capture fails nothing is written and the slot is untouched. If
    /// the replace fails the new backup is kept: it still describes the
    /// content from before the attempt.
    pub fn publish(
        &mut self,
        creds: &Credentials,
        page: PageId,
        html: &str,
    ) -> Result<(), StepError> {
        info!(%page, "fetching live content for backup");
        let content = self
            .publisher
            .get_content(creds, page)
            .map_err(|e| StepError::new(Step::BackupFetch, e))?;
        let backup = Backup { page, content };
        if let Some(store) = &self.store {
            store
                .save(&backup)
                .map_err(|e| StepError::new(Step::BackupFetch, e))?;
        }
        self.backup = Some(backup);

        info!(%page, bytes = html.len(), "publishing");
        self.publisher
            .replace_content(creds, page, html)
            .map_err(|e| StepError::new(Step::Publish, e))
    }

    /// Republish the backup. The slot is kept either way, so a failed
    /// revert can be retried and a successful one repeated.
    pub fn revert(&self, creds: &Credentials, page: PageId) -> Result<(), StepError> {
        let backup = self
            .backup
            .as_ref()
            .ok_or_else(|| StepError::new(Step::Revert, PublishError::NoBackup))?;
        if backup.page != page {
            return Err(StepError::new(
                Step::Revert,
                PublishError::BackupPageMismatch {
                    held: backup.page,
                    requested: page,
                },
            ));
        }
        info!(%page, bytes = backup.content.len(), "reverting to backup");
        self.publisher
            .replace_content(creds, page, &backup.content)
            .map_err(|e| StepError::new(Step::Revert, e))
    }

    pub fn clear(&mut self) -> Result<(), PublishError> {
        self.backup = None;
        if let Some(store) = &self.store {
            store.remove()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteState;
    use crate::testing::{creds, network_down, Call, FakeSite};

    #[test]
    fn publish_then_revert_restores_prior_content() {
        let site = FakeSite::with_page(42, "<p>Old</p>");
        let mut guard = RevisionGuard::new(&site);
        assert_eq!(guard.state(), GuardState::NoBackup);

        guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap();
        assert_eq!(site.content(42).as_deref(), Some("<p>New</p>"));
        assert_eq!(guard.state(), GuardState::HasBackup);
        assert_eq!(guard.backup().unwrap().content, "<p>Old</p>");

        guard.revert(&creds(), PageId(42)).unwrap();
        assert_eq!(site.content(42).as_deref(), Some("<p>Old</p>"));
        assert_eq!(guard.state(), GuardState::HasBackup);

        assert_eq!(
            site.calls(),
            vec![
                Call::Get(PageId(42)),
                Call::Replace(PageId(42), "<p>New</p>".to_string()),
                Call::Replace(PageId(42), "<p>Old</p>".to_string()),
            ]
        );
    }

    #[test]
    fn failed_fetch_never_writes() {
        let site = FakeSite::with_page(42, "<p>Old</p>");
        site.fail_next_get(network_down());
        let mut guard = RevisionGuard::new(&site);

        let err = guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap_err();
        assert_eq!(err.step, Step::BackupFetch);
        assert!(matches!(err.error, PublishError::Network { .. }));
        assert_eq!(site.writes(), 0);
        assert_eq!(guard.state(), GuardState::NoBackup);
        assert_eq!(site.content(42).as_deref(), Some("<p>Old</p>"));
    }

    #[test]
    fn failed_fetch_keeps_previous_backup() {
        let site = FakeSite::with_page(42, "<p>Old</p>");
        let mut guard = RevisionGuard::new(&site);
        guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap();

        site.fail_next_get(network_down());
        assert!(guard.publish(&creds(), PageId(42), "<p>Newer</p>").is_err());
        assert_eq!(guard.backup().unwrap().content, "<p>Old</p>");
    }

    #[test]
    fn revert_without_backup_is_refused_without_network() {
        let site = FakeSite::with_page(42, "<p>Old</p>");
        let guard = RevisionGuard::new(&site);
        let err = guard.revert(&creds(), PageId(42)).unwrap_err();
        assert_eq!(err.step, Step::Revert);
        assert!(matches!(err.error, PublishError::NoBackup));
        assert!(site.calls().is_empty());
    }

    #[test]
    fn failed_replace_keeps_backup() {
        let site = FakeSite::with_page(42, "<p>Old</p>");
        site.fail_next_replace(PublishError::Network {
            message: "response lost".to_string(),
            remote: RemoteState::Unknown,
        });
        let mut guard = RevisionGuard::new(&site);
        let err = guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap_err();
        assert_eq!(err.step, Step::Publish);
        assert!(err.error.outcome_unknown());
        assert_eq!(guard.state(), GuardState::HasBackup);
        assert_eq!(guard.backup().unwrap().content, "<p>Old</p>");
    }

    #[test]
    fn each_publish_overwrites_the_single_slot() {
        let site = FakeSite::with_page(42, "<p>A</p>");
        let mut guard = RevisionGuard::new(&site);
        guard.publish(&creds(), PageId(42), "<p>B</p>").unwrap();
        guard.publish(&creds(), PageId(42), "<p>C</p>").unwrap();
        assert_eq!(guard.backup().unwrap().content, "<p>B</p>");
        guard.revert(&creds(), PageId(42)).unwrap();
        assert_eq!(site.content(42).as_deref(), Some("<p>B</p>"));
    }

    #[test]
    fn revert_for_another_page_is_refused() {
        let site = FakeSite::with_page(42, "<p>Old</p>");
        let mut guard = RevisionGuard::new(&site);
        guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap();
        let err = guard.revert(&creds(), PageId(7)).unwrap_err();
        assert!(matches!(
            err.error,
            PublishError::BackupPageMismatch {
                held: PageId(42),
                requested: PageId(7)
            }
        ));
        assert_eq!(site.writes(), 1);
    }

    #[test]
    fn failed_revert_can_be_retried() {
        let site = FakeSite::with_page(42, "<p>Old</p>");
        let mut guard = RevisionGuard::new(&site);
        guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap();
        site.fail_next_replace(network_down());
        let err = guard.revert(&creds(), PageId(42)).unwrap_err();
        assert!(err.error.is_retryable());
        guard.revert(&creds(), PageId(42)).unwrap();
        assert_eq!(site.content(42).as_deref(), Some("<p>Old</p>"));
    }

    #[test]
    fn backup_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_BACKUP_FILE);
        let site = FakeSite::with_page(42, "<p>Old</p>");
        {
            let mut guard = RevisionGuard::with_backup_file(&site, &path).unwrap();
            assert_eq!(guard.state(), GuardState::NoBackup);
            guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "<p>Old</p>");
        assert!(dir.path().join("temp_backup.html.json").exists());

        let mut guard = RevisionGuard::with_backup_file(&site, &path).unwrap();
        assert_eq!(
            guard.backup(),
            Some(&Backup {
                page: PageId(42),
                content: "<p>Old</p>".to_string()
            })
        );
        guard.revert(&creds(), PageId(42)).unwrap();
        assert_eq!(site.content(42).as_deref(), Some("<p>Old</p>"));

        guard.clear().unwrap();
        assert_eq!(guard.state(), GuardState::NoBackup);
        assert!(!path.exists());
        assert!(!dir.path().join("temp_backup.html.json").exists());
    }

    #[test]
    fn mismatched_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_BACKUP_FILE);
        fs::write(&path, "<p>edited by hand</p>").unwrap();
        fs::write(dir.path().join("temp_backup.html.json"), r#"{"page":42,"bytes":3}"#).unwrap();
        let site = FakeSite::default();
        let guard = RevisionGuard::with_backup_file(&site, &path).unwrap();
        assert_eq!(guard.state(), GuardState::NoBackup);
    }

    #[test]
    fn failed_save_keeps_the_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_BACKUP_FILE);
        let first = FakeSite::with_page(42, "<p>Old</p>");
        RevisionGuard::with_backup_file(&first, &path)
            .unwrap()
            .publish(&creds(), PageId(42), "<p>New</p>")
            .unwrap();

        // Same length as the first capture, so a torn save would pass the size check.
        let second = FakeSite::with_page(7, "<p>Odd</p>");
        fs::create_dir(dir.path().join("temp_backup.html.json.tmp")).unwrap();
        let mut guard = RevisionGuard::with_backup_file(&second, &path).unwrap();
        let err = guard.publish(&creds(), PageId(7), "<p>Eve</p>").unwrap_err();
        assert_eq!(err.step, Step::BackupFetch);
        assert!(matches!(err.error, PublishError::BackupIo { .. }));
        assert_eq!(second.writes(), 0);
        assert!(!dir.path().join("temp_backup.html.tmp").exists());

        let reloaded = RevisionGuard::with_backup_file(&second, &path).unwrap();
        assert_eq!(
            reloaded.backup(),
            Some(&Backup {
                page: PageId(42),
                content: "<p>Old</p>".to_string()
            })
        );
    }

    #[test]
    fn unsaved_backup_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join(DEFAULT_BACKUP_FILE);
        let site = FakeSite::with_page(42, "<p>Old</p>");
        let mut guard = RevisionGuard::with_backup_file(&site, &path).unwrap();
        let err = guard.publish(&creds(), PageId(42), "<p>New</p>").unwrap_err();
        assert_eq!(err.step, Step::BackupFetch);
        assert!(matches!(err.error, PublishError::BackupIo { .. }));
        assert_eq!(site.writes(), 0);
        assert_eq!(guard.state(), GuardState::NoBackup);
    }
}
