//! Scripted in-memory `BrowserSession` and page fixtures.

use std::collections::HashMap;

use async_trait::async_trait;
use harvester_core::session::extract_elements;
use harvester_core::{
    BrowserSession, DownloadTarget, DownloadedFile, ElementData, ElementQuery, PageSnapshot,
    SessionError,
};

pub const BASE_URL: &str = "https://example.test";

/// A fake site: URL to markup, redirects, and download endpoints.
#[derive(Debug, Default)]
pub struct StubSession {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    downloads: HashMap<String, Vec<u8>>,
    current: Option<PageSnapshot>,
    /// Every URL passed to `navigate`, in order.
    pub navigations: Vec<String>,
    /// Every resolved download URL, in order.
    pub download_requests: Vec<String>,
    pub closed: bool,
}

impl StubSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&mut self, url: impl Into<String>, html: impl Into<String>) -> &mut Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub fn redirect(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.redirects.insert(from.into(), to.into());
        self
    }

    pub fn download(&mut self, url: impl Into<String>, bytes: &[u8]) -> &mut Self {
        self.downloads.insert(url.into(), bytes.to_vec());
        self
    }

    /// Registers `pages` listing pages, page `n` holding `ids[n - 1]`.
    pub fn listing(&mut self, pages: &[Vec<String>]) -> &mut Self {
        let total = u32::try_from(pages.len()).unwrap();
        for (index, ids) in pages.iter().enumerate() {
            let number = u32::try_from(index).unwrap() + 1;
            self.page(listing_url(number), listing_html(ids, total));
        }
        self
    }

    /// Registers a detail page and artifact for each ID.
    pub fn items(&mut self, ids: &[String]) -> &mut Self {
        for id in ids {
            self.page(item_url(id), detail_html(id, true));
            self.download(download_url(id), format!("d8:announce{id}e").as_bytes());
        }
        self
    }

    pub fn listing_navigations(&self) -> Vec<&str> {
        self.navigations
            .iter()
            .map(String::as_str)
            .filter(|url| url.contains("/favorites/"))
            .collect()
    }

    fn current(&self) -> Result<&PageSnapshot, SessionError> {
        self.current.as_ref().ok_or(SessionError::NoPage)
    }

    fn load(&self, url: &str) -> PageSnapshot {
        let final_url = self
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        match self.pages.get(&final_url) {
            Some(content) => PageSnapshot {
                url: final_url,
                status: 200,
                content: content.clone(),
            },
            None => PageSnapshot {
                url: final_url,
                status: 404,
                content: "<html><body><h1>404 Not Found</h1></body></html>".to_string(),
            },
        }
    }
}

#[async_trait]
impl BrowserSession for StubSession {
    async fn navigate(&mut self, url: &str) -> Result<PageSnapshot, SessionError> {
        self.navigations.push(url.to_string());
        let page = self.load(url);
        self.current = Some(page.clone());
        Ok(page)
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, SessionError> {
        let url = self.current()?.url.clone();
        let page = self.load(&url);
        self.current = Some(page.clone());
        Ok(page)
    }

    async fn query(&mut self, query: &ElementQuery) -> Result<Vec<ElementData>, SessionError> {
        extract_elements(&self.current()?.content, query)
    }

    async fn trigger_download(
        &mut self,
        target: &DownloadTarget,
    ) -> Result<DownloadedFile, SessionError> {
        let url = match target {
            DownloadTarget::Url(url) => url.clone(),
            DownloadTarget::Selector(selector) => {
                let href = extract_elements(
                    &self.current()?.content,
                    &ElementQuery::new(selector.as_str()),
                )?
                .into_iter()
                .find_map(|element| element.attr("href").map(str::to_string))
                .ok_or_else(|| SessionError::ElementNotFound {
                    selector: selector.clone(),
                })?;
                if href.starts_with('/') {
                    format!("{BASE_URL}{href}")
                } else {
                    href
                }
            }
        };
        self.download_requests.push(url.clone());

        match self.downloads.get(&url) {
            Some(bytes) => Ok(DownloadedFile {
                bytes: bytes.clone(),
                suggested_filename: url.rsplit('/').nth(1).map(|id| format!("{id}.torrent")),
            }),
            None => Err(SessionError::HttpStatus { url, status: 404 }),
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current = None;
    }
}

pub fn listing_url(page: u32) -> String {
    if page <= 1 {
        format!("{BASE_URL}/favorites/")
    } else {
        format!("{BASE_URL}/favorites/?page={page}")
    }
}

pub fn item_url(id: &str) -> String {
    format!("{BASE_URL}/g/{id}/")
}

pub fn download_url(id: &str) -> String {
    format!("{BASE_URL}/g/{id}/download")
}

/// IDs `first..first + count` as strings.
pub fn ids(first: u32, count: u32) -> Vec<String> {
    (first..first + count).map(|n| n.to_string()).collect()
}

pub fn listing_html(ids: &[String], total_pages: u32) -> String {
    let links: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<div class="gallery"><a href="/g/{id}/" class="cover"><div class="caption">Item {id}</div></a></div>"#
            )
        })
        .collect();
    let pagination = if total_pages > 1 {
        format!(
            r#"<section class="pagination"><a href="/favorites/?page=2" class="next">&gt;</a><a href="/favorites/?page={total_pages}" class="last">&raquo;</a></section>"#
        )
    } else {
        String::new()
    };
    format!(
        r#"<html><body><div class="container" id="favcontainer">{links}</div>{pagination}</body></html>"#
    )
}

pub fn detail_html(id: &str, with_download_control: bool) -> String {
    let download = if with_download_control {
        format!(
            r#"<a href="/g/{id}/download" class="btn btn-secondary" id="download">Download</a>"#
        )
    } else {
        String::new()
    };
    format!(
        r#"<html><body><div id="bigcontainer" class="gallery-page">
  <h1 class="title"><span class="pretty">Title {id}</span></h1>
  <h2 class="title">Subtitle {id}</h2>
  <section id="tags">
    <div class="tag-container field-name">Tags:
      <span class="tags"><a class="tag" href="/tag/foo/"><span class="name">foo</span><span class="count">1K</span></a><a class="tag" href="/tag/bar/"><span class="name">bar</span><span class="count">20</span></a></span>
    </div>
    <div class="tag-container field-name">Pages:
      <span class="tags"><a class="tag" href="/search/?q=pages"><span class="name">24</span></a></span>
    </div>
  </section>
  {download}
</div></body></html>"#
    )
}
