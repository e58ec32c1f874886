// Page publishing seam: the CMS operations the revision guard depends on.

use crate::error::PublishError;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A page as the user names it: numeric id or slug.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageRef {
    Id(PageId),
    Slug(String),
}

impl FromStr for PageRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty page reference".to_string());
        }
        if let Ok(n) = s.parse::<u64>() {
            return Ok(PageRef::Id(PageId(n)));
        }
        let valid = s
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '%');
        if !valid {
            return Err(format!("not a page id or slug: {s}"));
        }
        Ok(PageRef::Slug(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageSummary {
    pub id: PageId,
    pub title: String,
}

/// Site URL + username + application secret. Passed explicitly to every call;
/// never mutated by the core.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub site_url: String,
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(
        site_url: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            site_url: site_url.into().trim().trim_end_matches('/').to_string(),
            username: username.into().trim().to_string(),
            secret: secret.into().trim().to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("site_url", &self.site_url)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Operations against a CMS page endpoint. No call is retried automatically:
/// a failed write may still have landed, so the caller decides.
pub trait PagePublisher {
    fn list_editable_pages(&self, creds: &Credentials) -> Result<Vec<PageSummary>, PublishError>;

    fn get_content(&self, creds: &Credentials, page: PageId) -> Result<String, PublishError>;

    /// Replace the page body with `html` verbatim.
    fn replace_content(
        &self,
        creds: &Credentials,
        page: PageId,
        html: &str,
    ) -> Result<(), PublishError>;
}

impl<P: PagePublisher + ?Sized> PagePublisher for &P {
    fn list_editable_pages(&self, creds: &Credentials) -> Result<Vec<PageSummary>, PublishError> {
        (**self).list_editable_pages(creds)
    }

    fn get_content(&self, creds: &Credentials, page: PageId) -> Result<String, PublishError> {
        (**self).get_content(creds, page)
    }

    fn replace_content(
        &self,
        creds: &Credentials,
        page: PageId,
        html: &str,
    ) -> Result<(), PublishError> {
        (**self).replace_content(creds, page, html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_ref_parses_ids_and_slugs() {
        assert_eq!("42".parse::<PageRef>(), Ok(PageRef::Id(PageId(42))));
        assert_eq!(
            " about-us ".parse::<PageRef>(),
            Ok(PageRef::Slug("about-us".to_string()))
        );
        assert!("".parse::<PageRef>().is_err());
        assert!("a/b".parse::<PageRef>().is_err());
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = Credentials::new("https://example.org/", "editor", "abcd efgh ijkl");
        assert_eq!(creds.site_url, "https://example.org");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("abcd"));
        assert!(dbg.contains("<redacted>"));
    }
}
