use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::model::{Card, Label};

const TRELLO_API_BASE: &str = "https://api.trello.com/1/";

#[async_trait]
pub trait TrelloService: Send + Sync {
    /// Board that owns the given list.
    async fn board_of_list(&self, list_id: &str) -> Result<String>;

    async fn get_labels(&self, board_id: &str) -> Result<Vec<Label>>;

    async fn create_label(&self, board_id: &str, name: &str, color: &str) -> Result<Label>;

    async fn create_card(&self, list_id: &str, name: &str, desc: &str) -> Result<Card>;

    async fn attach_url(&self, card_id: &str, url: &str) -> Result<()>;

    async fn assign_label(&self, card_id: &str, label_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct TrelloClient {
    http: Client,
    base_url: Url,
    api_key: String,
    token: String,
}

impl fmt::Debug for TrelloClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrelloClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TrelloClient {
    pub fn new(api_key: String, token: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(TRELLO_API_BASE).context("invalid default Trello URL")?;
        Self::with_base_url(api_key, token, base_url, timeout)
    }

    pub fn with_base_url(
        api_key: String,
        token: String,
        base_url: Url,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pocket-trello-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build Trello HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            token,
        })
    }

    fn auth_params(&self) -> [(&str, &str); 2] {
        [("key", &self.api_key), ("token", &self.token)]
    }

    /// Authenticated request builder for a path relative to the API base.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .context("invalid Trello base URL")?;
        Ok(self.http.request(method, url).query(&self.auth_params()))
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let request = builder
            .build()
            .with_context(|| format!("failed to build Trello request: {}", what))?;
        debug!(method = %request.method(), path = %request.url().path(), "sending trello request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach Trello: {}", what))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("trello error {} ({}): {}", status, what, body));
        }

        res.json::<T>()
            .await
            .with_context(|| format!("invalid Trello response: {}", what))
    }
}

#[async_trait]
impl TrelloService for TrelloClient {
    async fn board_of_list(&self, list_id: &str) -> Result<String> {
        let req = self
            .request(Method::GET, &format!("lists/{}", list_id))?
            .query(&[("fields", "id,idBoard")]);
        let list: TrelloList = self.execute(req, "get list").await?;
        Ok(list.id_board)
    }

    async fn get_labels(&self, board_id: &str) -> Result<Vec<Label>> {
        let req = self
            .request(Method::GET, &format!("boards/{}/labels", board_id))?
            .query(&[("fields", "id,name,color"), ("limit", "1000")]);
        let labels: Vec<TrelloLabel> = self.execute(req, "get labels").await?;
        Ok(labels.into_iter().map(TrelloLabel::into_label).collect())
    }

    async fn create_label(&self, board_id: &str, name: &str, color: &str) -> Result<Label> {
        let req = self
            .request(Method::POST, "labels")?
            .query(&[("name", name), ("color", color), ("idBoard", board_id)]);
        let label: TrelloLabel = self.execute(req, "create label").await?;
        Ok(label.into_label())
    }

    async fn create_card(&self, list_id: &str, name: &str, desc: &str) -> Result<Card> {
        let req = self
            .request(Method::POST, "cards")?
            .query(&[("idList", list_id), ("name", name), ("desc", desc)]);
        let card: TrelloCard = self.execute(req, "create card").await?;
        Ok(Card {
            id: card.id,
            name: card.name,
        })
    }

    async fn attach_url(&self, card_id: &str, url: &str) -> Result<()> {
        let req = self
            .request(Method::POST, &format!("cards/{}/attachments", card_id))?
            .query(&[("url", url)]);
        let _: serde_json::Value = self.execute(req, "attach url").await?;
        Ok(())
    }

    async fn assign_label(&self, card_id: &str, label_id: &str) -> Result<()> {
        let req = self
            .request(Method::POST, &format!("cards/{}/idLabels", card_id))?
            .query(&[("value", label_id)]);
        let _: serde_json::Value = self.execute(req, "assign label").await?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrelloList {
    id_board: String,
}

#[derive(Deserialize)]
struct TrelloLabel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

impl TrelloLabel {
    fn into_label(self) -> Label {
        Label {
            id: self.id,
            name: self.name.unwrap_or_default(),
            color: self.color,
        }
    }
}

#[derive(Deserialize)]
struct TrelloCard {
    id: String,
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TrelloClient {
        TrelloClient::new("key".into(), "tok".into(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn request_carries_auth_params() {
        let request = client()
            .request(Method::POST, "cards/abc/idLabels")
            .unwrap()
            .query(&[("value", "lbl")])
            .build()
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/1/cards/abc/idLabels");
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("key".into(), "key".into())));
        assert!(pairs.contains(&("token".into(), "tok".into())));
        assert!(pairs.contains(&("value".into(), "lbl".into())));
    }

    #[test]
    fn debug_hides_credentials() {
        let rendered = format!("{:?}", client());
        assert!(!rendered.contains("tok"));
        assert!(rendered.contains("api.trello.com"));
    }

    #[test]
    fn colorless_and_unnamed_labels_parse() {
        let raw: TrelloLabel =
            serde_json::from_str(r#"{"id":"l1","name":null,"color":null,"idBoard":"b"}"#).unwrap();
        let label = raw.into_label();
        assert_eq!(label.id, "l1");
        assert_eq!(label.name, "");
        assert_eq!(label.color, None);
    }
}
