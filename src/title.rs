//! Display titles for saved links.
//!
//! PDFs are named after their file, HTML pages after their `<title>`, and
//! anything that cannot be fetched or parsed falls back to the URL itself.
use anyhow::{anyhow, bail, Context, Result};
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::info;

static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("static title selector"));

#[derive(Debug, Clone)]
pub struct TitleResolver {
    http: Client,
    max_bytes: usize,
}

impl TitleResolver {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pocket-trello-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build title HTTP client")?;
        Ok(Self { http, max_bytes })
    }

    /// Resolve a title for `url`. Never fails; the URL is the last resort.
    pub async fn resolve(&self, url: &str) -> String {
        if let Some(name) = pdf_title(url) {
            return name;
        }
        match self.fetch_title(url).await {
            Ok(title) => title,
            Err(err) => {
                info!(url, reason = %format!("{:#}", err), "title lookup failed; using url");
                url.to_string()
            }
        }
    }

    async fn fetch_title(&self, url: &str) -> Result<String> {
        let html = self.fetch_capped(url).await?;
        extract_title(&html).ok_or_else(|| anyhow!("no <title> in document"))
    }

    /// Read the body in chunks, stopping once `max_bytes` have been read,
    /// then decode it with the charset from `Content-Type`.
    async fn fetch_capped(&self, url: &str) -> Result<String> {
        let mut res = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to fetch page")?;
        if !res.status().is_success() {
            bail!("page returned {}", res.status());
        }
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = res.chunk().await.context("failed to read page body")? {
            let room = self.max_bytes - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(decode_body(&body, content_type.as_deref()))
    }
}

/// Decode `body` using the `charset` parameter of `content_type`, falling
/// back to UTF-8 when it is absent or unknown. A BOM overrides both.
pub fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .and_then(|m| {
            m.get_param(mime::CHARSET)
                .and_then(|cs| Encoding::for_label(cs.as_str().as_bytes()))
        })
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(body);
    text.into_owned()
}

/// Title for a URL whose path ends in `.pdf`: the file name without extension.
pub fn pdf_title(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    if !path.to_ascii_lowercase().ends_with(".pdf") {
        return None;
    }
    let segment = path.rsplit('/').next().unwrap_or(&path);
    let stem = &segment[..segment.len() - ".pdf".len()];
    let decoded = urlencoding::decode(stem)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| stem.to_string());
    Some(decoded)
}

/// Text of the first `<title>` element, whitespace collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let element = document.select(&TITLE_SELECTOR).next()?;
    let text = element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
