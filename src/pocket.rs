use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::model::{ItemStatus, SourceItem};

const POCKET_API_BASE: &str = "https://getpocket.com/";

/// Filters for the retrieve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    pub state: String,
    pub tag: Option<String>,
    pub since: Option<i64>,
}

#[async_trait]
pub trait PocketService: Send + Sync {
    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<SourceItem>>;

    async fn archive(&self, item_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct PocketClient {
    http: Client,
    base_url: Url,
    consumer_key: String,
    access_token: String,
}

impl fmt::Debug for PocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PocketClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Modify actions staged locally until `commit` sends them in one request.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingActions {
    actions: Vec<Value>,
}

impl PendingActions {
    pub fn archive(&mut self, item_id: &str) -> &mut Self {
        self.actions
            .push(json!({ "action": "archive", "item_id": item_id }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

impl PocketClient {
    pub fn new(consumer_key: String, access_token: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(POCKET_API_BASE).context("invalid default Pocket URL")?;
        Self::with_base_url(consumer_key, access_token, base_url, timeout)
    }

    pub fn with_base_url(
        consumer_key: String,
        access_token: String,
        base_url: Url,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pocket-trello-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build Pocket HTTP client")?;
        Ok(Self {
            http,
            base_url,
            consumer_key,
            access_token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .context("invalid Pocket base URL")
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Response> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "sending pocket request");
        let res = self
            .http
            .post(url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("X-Accept", "application/json")
            .json(body)
            .send()
            .await
            .context("failed to reach Pocket")?;

        if !res.status().is_success() {
            let status = res.status();
            let reason = res
                .headers()
                .get("X-Error")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string);
            let body = res.text().await.unwrap_or_default();
            return Err(match reason {
                Some(reason) => anyhow!("pocket error {} ({}): {}", status, reason, body),
                None => anyhow!("pocket error {}: {}", status, body),
            });
        }
        Ok(res)
    }

    /// Send every staged action in one `v3/send` call.
    pub async fn commit(&self, pending: PendingActions) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let count = pending.len();
        let body = build_send_request(&self.consumer_key, &self.access_token, &pending);
        let res = self.post("v3/send", &body).await?;
        let payload: SendResponse = res.json().await.context("invalid Pocket send response")?;
        check_send_response(&payload, count)
    }
}

#[async_trait]
impl PocketService for PocketClient {
    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<SourceItem>> {
        let body = build_retrieve_request(&self.consumer_key, &self.access_token, query);
        let res = self.post("v3/get", &body).await?;
        let payload: RetrieveResponse = res
            .json()
            .await
            .context("invalid Pocket retrieve response")?;
        parse_item_list(payload.list)
    }

    async fn archive(&self, item_id: &str) -> Result<()> {
        let mut pending = PendingActions::default();
        pending.archive(item_id);
        self.commit(pending)
            .await
            .with_context(|| format!("failed to archive Pocket item {}", item_id))
    }
}

pub fn build_retrieve_request(consumer_key: &str, access_token: &str, query: &ItemQuery) -> Value {
    let mut body = Map::new();
    body.insert("consumer_key".into(), json!(consumer_key));
    body.insert("access_token".into(), json!(access_token));
    body.insert("state".into(), json!(query.state));
    body.insert("detailType".into(), json!("complete"));
    if let Some(tag) = query.tag.as_deref().filter(|t| !t.is_empty()) {
        body.insert("tag".into(), json!(tag));
    }
    if let Some(since) = query.since {
        body.insert("since".into(), json!(since));
    }
    Value::Object(body)
}

pub fn build_send_request(consumer_key: &str, access_token: &str, pending: &PendingActions) -> Value {
    json!({
        "consumer_key": consumer_key,
        "access_token": access_token,
        "actions": pending.actions,
    })
}

fn check_send_response(payload: &SendResponse, expected: usize) -> Result<()> {
    if payload.status != 1 {
        bail!("pocket send returned status {}", payload.status);
    }
    if payload.action_results.len() != expected {
        bail!(
            "pocket returned {} results for {} actions",
            payload.action_results.len(),
            expected
        );
    }
    let failed = payload
        .action_results
        .iter()
        .filter(|r| matches!(r, Value::Bool(false) | Value::Null))
        .count();
    if failed > 0 {
        bail!("pocket rejected {} of {} actions", failed, expected);
    }
    Ok(())
}

/// Pocket returns `list` as an object keyed by item id, but as `[]` when
/// there is nothing to return.
pub fn parse_item_list(list: Value) -> Result<Vec<SourceItem>> {
    match list {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, raw)| {
                let raw: RawItem = serde_json::from_value(raw)
                    .with_context(|| format!("malformed Pocket item {}", key))?;
                Ok(raw.into_item(key))
            })
            .collect(),
        other => Err(anyhow!("unexpected Pocket item list: {}", other)),
    }
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    list: Value,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    action_results: Vec<Value>,
    status: i64,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    given_url: Option<String>,
    #[serde(default)]
    resolved_url: Option<String>,
    #[serde(default)]
    excerpt: Option<String>,
    #[serde(default)]
    has_image: Option<String>,
    #[serde(default)]
    image: Option<RawImage>,
    #[serde(default)]
    tags: Option<Map<String, Value>>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct RawImage {
    src: Option<String>,
}

impl RawItem {
    fn into_item(self, key: String) -> SourceItem {
        let url = self
            .given_url
            .filter(|u| !u.is_empty())
            .or(self.resolved_url)
            .unwrap_or_default();
        // has_image "1" means the item has images; "2" means it is one.
        let image_url = if self.has_image.as_deref() == Some("1") {
            self.image.and_then(|i| i.src).filter(|s| !s.is_empty())
        } else {
            None
        };
        SourceItem {
            id: self.item_id.filter(|id| !id.is_empty()).unwrap_or(key),
            url,
            excerpt: self.excerpt.unwrap_or_default(),
            image_url,
            tags: self
                .tags
                .map(|t| t.into_iter().map(|(name, _)| name).collect())
                .unwrap_or_default(),
            status: ItemStatus::from_code(self.status.as_deref().unwrap_or("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> ItemQuery {
        ItemQuery {
            state: "all".into(),
            tag: Some("trello".into()),
            since: None,
        }
    }

    #[test]
    fn retrieve_request_includes_filters() {
        let mut q = query();
        q.since = Some(1_700_000_000);
        let body = build_retrieve_request("ck", "at", &q);
        assert_eq!(body["consumer_key"], "ck");
        assert_eq!(body["access_token"], "at");
        assert_eq!(body["state"], "all");
        assert_eq!(body["detailType"], "complete");
        assert_eq!(body["tag"], "trello");
        assert_eq!(body["since"], 1_700_000_000i64);
    }

    #[test]
    fn retrieve_request_omits_unset_filters() {
        let q = ItemQuery {
            state: "unread".into(),
            tag: None,
            since: None,
        };
        let body = build_retrieve_request("ck", "at", &q);
        assert!(body.get("tag").is_none());
        assert!(body.get("since").is_none());
    }

    #[test]
    fn send_request_carries_staged_archive() {
        let mut pending = PendingActions::default();
        pending.archive("11").archive("12");
        let body = build_send_request("ck", "at", &pending);
        assert_eq!(body["actions"][0]["action"], "archive");
        assert_eq!(body["actions"][0]["item_id"], "11");
        assert_eq!(body["actions"][1]["item_id"], "12");
    }

    #[test]
    fn empty_list_shapes() {
        assert!(parse_item_list(json!([])).unwrap().is_empty());
        assert!(parse_item_list(json!({})).unwrap().is_empty());
        assert!(parse_item_list(Value::Null).unwrap().is_empty());
        assert!(parse_item_list(json!("nope")).is_err());
    }

    #[test]
    fn parses_complete_items() {
        let list = json!({
            "229279689": {
                "item_id": "229279689",
                "given_url": "https://example.com/post",
                "resolved_url": "https://example.com/post?ref=x",
                "excerpt": "An excerpt",
                "status": "0",
                "has_image": "1",
                "image": { "item_id": "229279689", "src": "https://example.com/a.png" },
                "tags": {
                    "rust": { "item_id": "229279689", "tag": "rust" },
                    "async": { "item_id": "229279689", "tag": "async" },
                    "trello": { "item_id": "229279689", "tag": "trello" }
                }
            },
            "5": {
                "given_url": "",
                "resolved_url": "https://example.com/resolved",
                "status": "1",
                "has_image": "2",
                "image": { "src": "https://example.com/b.png" }
            }
        });
        let items = parse_item_list(list).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.id, "229279689");
        assert_eq!(first.url, "https://example.com/post");
        assert_eq!(first.excerpt, "An excerpt");
        assert_eq!(first.image_url.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(first.tags, vec!["rust", "async", "trello"]);
        assert!(first.is_unread());

        let second = &items[1];
        assert_eq!(second.id, "5");
        assert_eq!(second.url, "https://example.com/resolved");
        assert_eq!(second.image_url, None);
        assert!(second.tags.is_empty());
        assert_eq!(second.status, ItemStatus::Archived);
    }

    #[test]
    fn send_response_checks() {
        let ok = SendResponse {
            action_results: vec![json!(true)],
            status: 1,
        };
        check_send_response(&ok, 1).unwrap();

        let rejected = SendResponse {
            action_results: vec![json!(false)],
            status: 1,
        };
        assert!(check_send_response(&rejected, 1).is_err());

        let failed = SendResponse {
            action_results: vec![],
            status: 0,
        };
        assert!(check_send_response(&failed, 1).is_err());
    }
}
