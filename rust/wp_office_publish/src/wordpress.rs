// WordPress REST client for the pages endpoint.

use crate::error::{PublishError, RemoteState};
use crate::publisher::{Credentials, PageId, PagePublisher, PageRef, PageSummary};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const PAGES_PATH: &str = "/wp-json/wp/v2/pages";
const EDITABLE_STATUSES: &str = "publish,future,draft,pending,private";

#[derive(Clone, Debug)]
pub struct WpConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub per_page: u32,
    pub user_agent: String,
}

impl Default for WpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(30),
            per_page: 100,
            user_agent: format!("wp-office-publish/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

struct Reply {
    status: u16,
    total_pages: Option<u32>,
    body: String,
}

pub struct WpClient {
    http: Client,
    config: WpConfig,
}

impl WpClient {
    pub fn new(config: WpConfig) -> Result<Self, PublishError> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PublishError::Network {
                message: format!("failed to build HTTP client: {e}"),
                remote: RemoteState::Unchanged,
            })?;
        Ok(Self { http, config })
    }

    fn pages_url(creds: &Credentials) -> String {
        format!("{}{}", creds.site_url, PAGES_PATH)
    }

    fn send(&self, req: RequestBuilder, creds: &Credentials, op: Op) -> Result<Reply, PublishError> {
        let timeout = match op {
            Op::Read => self.config.read_timeout,
            Op::Write => self.config.write_timeout,
        };
        let resp = req
            .basic_auth(&creds.username, Some(&creds.secret))
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .map_err(|e| transport_error(&e, op))?;
        let status = resp.status().as_u16();
        let total_pages = resp
            .headers()
            .get("x-wp-totalpages")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = resp.text().map_err(|e| transport_error(&e, op))?;
        debug!(status, bytes = body.len(), "response");
        Ok(Reply {
            status,
            total_pages,
            body,
        })
    }

    fn list_batch(
        &self,
        creds: &Credentials,
        page: u32,
        edit_context: bool,
    ) -> Result<Reply, PublishError> {
        let per_page = self.config.per_page.to_string();
        let page = page.to_string();
        let mut query = vec![
            ("per_page", per_page.as_str()),
            ("page", page.as_str()),
            ("_fields", "id,title"),
        ];
        if edit_context {
            query.push(("context", "edit"));
            query.push(("status", EDITABLE_STATUSES));
        }
        self.send(
            self.http.get(Self::pages_url(creds)).query(&query),
            creds,
            Op::Read,
        )
    }

    /// Look up a page id by slug.
    pub fn resolve_slug(&self, creds: &Credentials, slug: &str) -> Result<PageId, PublishError> {
        let query = [
            ("slug", slug),
            ("_fields", "id,title"),
            ("status", EDITABLE_STATUSES),
            ("context", "edit"),
        ];
        let reply = self.send(
            self.http.get(Self::pages_url(creds)).query(&query),
            creds,
            Op::Read,
        )?;
        let reply = check(reply, None)?;
        parse_page_list(&reply.body)?
            .first()
            .map(|p| p.id)
            .ok_or_else(|| PublishError::UnknownSlug(slug.to_string()))
    }

    pub fn resolve(&self, creds: &Credentials, page: &PageRef) -> Result<PageId, PublishError> {
        match page {
            PageRef::Id(id) => Ok(*id),
            PageRef::Slug(slug) => self.resolve_slug(creds, slug),
        }
    }
}

impl PagePublisher for WpClient {
    fn list_editable_pages(&self, creds: &Credentials) -> Result<Vec<PageSummary>, PublishError> {
        let mut pages = Vec::new();
        let mut page = 1u32;
        let mut edit_context = true;
        loop {
            let mut reply = self.list_batch(creds, page, edit_context)?;
            // Without a total, a full last batch is only found by asking past it.
            if page > 1 && reply.status == 400 {
                debug!(page, "no such page of results; listing complete");
                break;
            }
            if page == 1 && edit_context && matches!(reply.status, 400 | 401 | 403) {
                debug!(status = reply.status, "edit context refused; listing public pages");
                edit_context = false;
                reply = self.list_batch(creds, page, edit_context)?;
            }
            let reply = check(reply, None)?;
            let batch = parse_page_list(&reply.body)?;
            let short = batch.len() < self.config.per_page as usize;
            let empty = batch.is_empty();
            pages.extend(batch);

            let last = match reply.total_pages {
                Some(total) => page >= total,
                None => short,
            };
            if empty || last {
                break;
            }
            page += 1;
        }
        pages.sort_by_key(|p| p.title.to_lowercase());
        info!(count = pages.len(), "listed pages");
        Ok(pages)
    }

    fn get_content(&self, creds: &Credentials, page: PageId) -> Result<String, PublishError> {
        let url = format!("{}/{}", Self::pages_url(creds), page);
        let reply = self.send(
            self.http.get(&url).query(&[("context", "edit")]),
            creds,
            Op::Read,
        )?;
        // Authors without edit rights on this page may still read it rendered.
        let reply = if matches!(reply.status, 401 | 403) {
            debug!(%page, "edit context refused; fetching rendered content");
            self.send(self.http.get(&url), creds, Op::Read)?
        } else {
            reply
        };
        let reply = check(reply, Some(page))?;
        parse_content(&reply.body)
    }

    fn replace_content(
        &self,
        creds: &Credentials,
        page: PageId,
        html: &str,
    ) -> Result<(), PublishError> {
        let url = format!("{}/{}", Self::pages_url(creds), page);
        let payload = serde_json::json!({ "content": html });
        let reply = self.send(self.http.post(&url).json(&payload), creds, Op::Write)?;
        let reply = if reply.status == 405 {
            debug!(%page, "POST not allowed; retrying with PUT");
            self.send(self.http.put(&url).json(&payload), creds, Op::Write)?
        } else {
            reply
        };
        check(reply, Some(page))?;
        info!(%page, bytes = html.len(), "page content replaced");
        Ok(())
    }
}

fn transport_error(e: &reqwest::Error, op: Op) -> PublishError {
    let remote = match op {
        Op::Read => RemoteState::Unchanged,
        Op::Write if e.is_connect() || e.is_builder() => RemoteState::Unchanged,
        Op::Write => RemoteState::Unknown,
    };
    PublishError::Network {
        message: e.to_string(),
        remote,
    }
}

fn check(reply: Reply, page: Option<PageId>) -> Result<Reply, PublishError> {
    if (200..300).contains(&reply.status) {
        Ok(reply)
    } else {
        Err(status_error(reply.status, &reply.body, page))
    }
}

/// `code` and `message` of a WordPress REST error body.
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };
    let field = |k: &str| json.get(k).and_then(|v| v.as_str()).map(|s| s.to_string());
    (field("code"), field("message"))
}

fn status_error(status: u16, body: &str, page: Option<PageId>) -> PublishError {
    let (code, message) = parse_error_body(body);
    let message = message.unwrap_or_else(|| {
        let snippet: String = body.trim().chars().take(200).collect();
        if snippet.is_empty() {
            format!("HTTP {status}")
        } else {
            snippet
        }
    });
    let invalid_id = code.as_deref() == Some("rest_post_invalid_id");
    match (status, page) {
        (401 | 403, _) => PublishError::Auth { status, message },
        (404, Some(page)) => PublishError::NotFound { page },
        (_, Some(page)) if invalid_id => PublishError::NotFound { page },
        (404, None) => PublishError::Protocol(format!("pages endpoint not found: {message}")),
        (400..=499, _) => PublishError::Conflict { status, message },
        (500..=599, _) => PublishError::Server { status, message },
        _ => PublishError::Protocol(format!("unexpected HTTP {status}: {message}")),
    }
}

fn parse_page_list(body: &str) -> Result<Vec<PageSummary>, PublishError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| PublishError::Protocol(format!("JSON parse error: {e}")))?;
    let items = json
        .as_array()
        .ok_or_else(|| PublishError::Protocol("expected a JSON array of pages".to_string()))?;

    let mut pages = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = item.get("id").and_then(|v| v.as_u64()) else {
            return Err(PublishError::Protocol("page without numeric id".to_string()));
        };
        let title = item.get("title");
        let title = title
            .and_then(|t| t.get("raw"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| {
                title
                    .and_then(|t| t.get("rendered"))
                    .and_then(|v| v.as_str())
                    .map(decode_entities)
            })
            .unwrap_or_default();
        pages.push(PageSummary {
            id: PageId(id),
            title,
        });
    }
    Ok(pages)
}

fn parse_content(body: &str) -> Result<String, PublishError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| PublishError::Protocol(format!("JSON parse error: {e}")))?;
    let content = json.get("content");
    let text = content
        .and_then(|c| c.get("raw"))
        .and_then(|v| v.as_str())
        .or_else(|| content.and_then(|c| c.get("rendered")).and_then(|v| v.as_str()))
        .unwrap_or("");
    Ok(text.to_string())
}

/// Rendered titles come HTML-escaped (`&amp;`, `&#8211;`).
fn decode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let Some(end) = tail.find(';').filter(|&e| e <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
