use crate::config::Settings;
use crate::error::{FetchError, FetchResult};
use crate::throttle::RateLimiter;
use regex::Regex;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

const SEARCH_LIMIT: &str = "10";
const CONTENT_RATINGS: [&str; 4] = ["safe", "suggestive", "erotica", "pornographic"];

#[derive(Deserialize)]
struct SearchResponse {
    data: Vec<SearchManga>,
}

#[derive(Deserialize)]
struct SearchManga {
    id: String,
    attributes: SearchAttributes,
}

#[derive(Deserialize)]
struct SearchAttributes {
    #[serde(default)]
    title: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct CoverResponse {
    data: Vec<CoverData>,
    limit: u32,
    offset: u32,
    total: u32,
}

#[derive(Deserialize)]
struct CoverData {
    id: String,
    attributes: CoverAttributes,
}

#[derive(Deserialize)]
struct CoverAttributes {
    #[serde(rename = "fileName")]
    file_name: String,
    volume: Option<String>,
    locale: Option<String>,
}

/// The best catalog match for a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
}

impl Display for SearchResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.title, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverReference {
    pub id: String,
    pub file_name: String,
    pub remote_url: String,
    pub volume: Option<String>,
    pub locale: Option<String>,
}

impl SearchManga {
    fn into_result(self) -> SearchResult {
        let title = self
            .attributes
            .title
            .get("en")
            .or_else(|| self.attributes.title.values().next())
            .cloned()
            .unwrap_or_else(|| self.id.clone());
        SearchResult { id: self.id, title }
    }
}

fn bracketed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\(\[\{][^\)\]\}]*[\)\]\}]").expect("valid regex"))
}

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_~:;,!?.‐-―]+").expect("valid regex"))
}

fn leading_article() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(the|a|an)\s+").expect("valid regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Turns a folder name into a search query: drops bracketed tags,
/// separator punctuation and a leading English article.
pub fn normalize_title(title: &str) -> String {
    let title = bracketed().replace_all(title, " ");
    let title = separators().replace_all(&title, " ");
    let title = whitespace().replace_all(title.trim(), " ");
    let stripped = leading_article().replace(&title, "");
    if stripped.trim().is_empty() {
        title.into_owned()
    } else {
        stripped.trim().to_string()
    }
}

/// The normalized title, or the raw folder name when normalizing leaves
/// nothing. `None` when neither holds a letter or digit.
fn search_query(title: &str) -> Option<String> {
    let has_word = |s: &str| s.chars().any(char::is_alphanumeric);
    let clean_title = normalize_title(title);
    if has_word(&clean_title) {
        return Some(clean_title);
    }
    let raw = title.trim();
    has_word(raw).then(|| raw.to_string())
}

pub struct MangaDexClient {
    client: Client,
    limiter: RateLimiter,
    api_base: String,
    uploads_base: String,
    page_size: u32,
    locales: Vec<String>,
}

impl MangaDexClient {
    pub fn new(settings: &Settings) -> FetchResult<Self> {
        let client = build_http_client(&settings.user_agent, settings.timeout)?;
        Ok(Self {
            client,
            limiter: RateLimiter::new(settings.delay),
            api_base: settings.api_base.clone(),
            uploads_base: settings.uploads_base.clone(),
            page_size: settings.page_size,
            locales: settings.cover_locales.clone(),
        })
    }

    fn send_get_request<T: DeserializeOwned>(
        &mut self,
        url_slug: &str,
        query: &[(&str, &str)],
    ) -> FetchResult<T> {
        self.limiter.wait();
        let url = format!("{}/{}", self.api_base, url_slug);
        debug!("GET {} {:?}", url, query);

        let resp = self.client.get(&url).query(query).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, &url));
        }
        let body = resp.text()?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::Permanent(format!("malformed response from {}: {}", url, e)))
    }

    /// Returns the first match the catalog reports for `title`.
    pub fn search(&mut self, title: &str) -> FetchResult<SearchResult> {
        let clean_title = search_query(title)
            .ok_or_else(|| FetchError::NotFound(title.to_string()))?;
        info!("Searching MangaDex for: {}", clean_title);

        let mut query = vec![("title", clean_title.as_str()), ("limit", SEARCH_LIMIT)];
        query.extend(CONTENT_RATINGS.iter().map(|r| ("contentRating[]", *r)));

        let resp: SearchResponse = self.send_get_request("manga", &query)?;
        let result = resp
            .data
            .into_iter()
            .next()
            .map(SearchManga::into_result)
            .ok_or_else(|| FetchError::NotFound(title.to_string()))?;

        info!("Matched '{}' to {}", title, result);
        Ok(result)
    }

    /// Collects every cover of `manga_id`, one page at a time.
    pub fn list_covers(&mut self, manga_id: &str) -> FetchResult<Vec<CoverReference>> {
        let limit = self.page_size.to_string();
        let locales = self.locales.clone();
        let mut covers = Vec::new();
        let mut offset: u32 = 0;

        loop {
            let offset_str = offset.to_string();
            let mut query = vec![
                ("manga[]", manga_id),
                ("limit", limit.as_str()),
                ("offset", offset_str.as_str()),
                ("order[volume]", "asc"),
            ];
            query.extend(locales.iter().map(|l| ("locales[]", l.as_str())));

            let page: CoverResponse = self.send_get_request("cover", &query)?;
            let fetched = page.data.len() as u32;
            covers.extend(page.data.into_iter().map(|c| self.cover_reference(manga_id, c)));
            debug!(
                "cover page offset={} limit={} got={} total={}",
                page.offset, page.limit, fetched, page.total
            );

            offset += fetched;
            if fetched == 0 || offset >= page.total {
                break;
            }
        }

        Ok(covers)
    }

    fn cover_reference(&self, manga_id: &str, cover: CoverData) -> CoverReference {
        let remote_url = format!(
            "{}/covers/{}/{}",
            self.uploads_base, manga_id, cover.attributes.file_name
        );
        CoverReference {
            id: cover.id,
            file_name: cover.attributes.file_name,
            remote_url,
            volume: cover
                .attributes
                .volume
                .filter(|v| !v.trim().is_empty()),
            locale: cover.attributes.locale,
        }
    }
}

pub fn build_http_client(user_agent: &str, timeout: Duration) -> FetchResult<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Config(format!("cannot build http client: {}", e)))
}
