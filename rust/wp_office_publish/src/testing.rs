// In-memory site used by guard and session tests.

use crate::error::{PublishError, RemoteState};
use crate::publisher::{Credentials, PageId, PagePublisher, PageSummary};
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    List,
    Get(PageId),
    Replace(PageId, String),
}

#[derive(Default)]
pub(crate) struct FakeSite {
    pages: Mutex<HashMap<PageId, String>>,
    calls: Mutex<Vec<Call>>,
    fail_get: Mutex<Option<PublishError>>,
    fail_replace: Mutex<Option<PublishError>>,
    panic_on_get: bool,
    gate: Mutex<Option<Receiver<()>>>,
}

impl FakeSite {
    pub(crate) fn with_page(page: u64, content: &str) -> Self {
        let site = Self::default();
        site.pages
            .lock()
            .unwrap()
            .insert(PageId(page), content.to_string());
        site
    }

    pub(crate) fn content(&self, page: u64) -> Option<String> {
        self.pages.lock().unwrap().get(&PageId(page)).cloned()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn writes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Replace(..)))
            .count()
    }

    pub(crate) fn fail_next_get(&self, err: PublishError) {
        *self.fail_get.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_next_replace(&self, err: PublishError) {
        *self.fail_replace.lock().unwrap() = Some(err);
    }

    pub(crate) fn panicking(mut self) -> Self {
        self.panic_on_get = true;
        self
    }

    /// Every `get_content` waits for one message on the returned sender.
    pub(crate) fn gated(self) -> (Self, Sender<()>) {
        let (tx, rx) = channel();
        *self.gate.lock().unwrap() = Some(rx);
        (self, tx)
    }
}

pub(crate) fn network_down() -> PublishError {
    PublishError::Network {
        message: "connection refused".to_string(),
        remote: RemoteState::Unchanged,
    }
}

pub(crate) fn creds() -> Credentials {
    Credentials::new("https://example.org", "editor", "secret")
}

impl PagePublisher for FakeSite {
    fn list_editable_pages(&self, _creds: &Credentials) -> Result<Vec<PageSummary>, PublishError> {
        self.calls.lock().unwrap().push(Call::List);
        let mut pages: Vec<PageSummary> = self
            .pages
            .lock()
            .unwrap()
            .keys()
            .map(|id| PageSummary {
                id: *id,
                title: format!("Page {id}"),
            })
            .collect();
        pages.sort_by_key(|p| p.id);
        Ok(pages)
    }

    fn get_content(&self, _creds: &Credentials, page: PageId) -> Result<String, PublishError> {
        if let Some(rx) = self.gate.lock().unwrap().as_ref() {
            let _ = rx.recv();
        }
        self.calls.lock().unwrap().push(Call::Get(page));
        if self.panic_on_get {
            panic!("publisher exploded");
        }
        if let Some(err) = self.fail_get.lock().unwrap().take() {
            return Err(err);
        }
        self.pages
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .ok_or(PublishError::NotFound { page })
    }

    fn replace_content(
        &self,
        _creds: &Credentials,
        page: PageId,
        html: &str,
    ) -> Result<(), PublishError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Replace(page, html.to_string()));
        if let Some(err) = self.fail_replace.lock().unwrap().take() {
            return Err(err);
        }
        let mut pages = self.pages.lock().unwrap();
        match pages.get_mut(&page) {
            Some(content) => {
                *content = html.to_string();
                Ok(())
            }
            None => Err(PublishError::NotFound { page }),
        }
    }
}
