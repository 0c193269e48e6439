use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::labels::LabelAllocator;
use crate::model::{Card, SourceItem};
use crate::pocket::{ItemQuery, PocketService};
use crate::title::TitleResolver;
use crate::trello::TrelloService;

/// Where in the per-item pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Creating,
    Attaching,
    Labeling,
    Archiving,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Creating => "creating",
            SyncStage::Attaching => "attaching",
            SyncStage::Labeling => "labeling",
            SyncStage::Archiving => "archiving",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: String,
    pub url: String,
    pub stage: SyncStage,
    pub error: String,
}

impl ItemFailure {
    fn new(item: &SourceItem, stage: SyncStage, err: anyhow::Error) -> Self {
        Self {
            item_id: item.id.clone(),
            url: item.url.clone(),
            stage,
            error: format!("{:#}", err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pocket returned nothing; no further calls were made.
    NoItems,
    Completed(RunReport),
}

pub struct Syncer<'a> {
    pocket: &'a dyn PocketService,
    trello: &'a dyn TrelloService,
    titles: &'a TitleResolver,
    list_id: String,
    marker_tag: Option<String>,
}

impl<'a> Syncer<'a> {
    pub fn new(
        pocket: &'a dyn PocketService,
        trello: &'a dyn TrelloService,
        titles: &'a TitleResolver,
        list_id: impl Into<String>,
        marker_tag: Option<String>,
    ) -> Self {
        Self {
            pocket,
            trello,
            titles,
            list_id: list_id.into(),
            marker_tag,
        }
    }

    /// One pass: fetch, then mirror every unread item into the list.
    /// Item failures are collected in the report; fetch and board lookup
    /// failures abort the pass.
    #[instrument(skip_all)]
    pub async fn run(&self, query: &ItemQuery) -> Result<RunOutcome> {
        let items = self
            .pocket
            .list_items(query)
            .await
            .context("failed to fetch Pocket items")?;
        info!(count = items.len(), state = %query.state, tag = ?query.tag, "fetched pocket items");

        if items.is_empty() {
            info!("no new items");
            return Ok(RunOutcome::NoItems);
        }

        let board_id = self
            .trello
            .board_of_list(&self.list_id)
            .await
            .context("failed to look up Trello list")?;
        let mut labels = LabelAllocator::load(self.trello, &board_id, self.marker_tag.clone()).await?;

        let mut report = RunReport {
            fetched: items.len(),
            ..RunReport::default()
        };

        for item in &items {
            if !item.is_unread() {
                report.skipped += 1;
                continue;
            }
            match self.sync_item(item, &mut labels).await {
                Ok(_) => report.synced += 1,
                Err(failure) => {
                    warn!(
                        item_id = %failure.item_id,
                        url = %failure.url,
                        stage = %failure.stage,
                        error = %failure.error,
                        "item sync failed; left unarchived"
                    );
                    report.failures.push(failure);
                }
            }
        }

        info!(
            fetched = report.fetched,
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failures.len(),
            "sync pass finished"
        );
        Ok(RunOutcome::Completed(report))
    }

    /// Mirror a single unread item. The item is archived only after every
    /// earlier step succeeded.
    #[instrument(skip_all, fields(item_id = %item.id))]
    pub async fn sync_item(
        &self,
        item: &SourceItem,
        labels: &mut LabelAllocator,
    ) -> std::result::Result<Card, ItemFailure> {
        let fail = |stage: SyncStage| move |err: anyhow::Error| ItemFailure::new(item, stage, err);

        info!(url = %item.url, "found item");
        let title = self.titles.resolve(&item.url).await;

        let card = self
            .trello
            .create_card(&self.list_id, &title, &item.excerpt)
            .await
            .map_err(fail(SyncStage::Creating))?;
        info!(card_id = %card.id, name = %card.name, "created card");

        self.trello
            .attach_url(&card.id, &item.url)
            .await
            .map_err(fail(SyncStage::Attaching))?;
        info!(url = %item.url, "attached link");

        if let Some(image_url) = &item.image_url {
            self.trello
                .attach_url(&card.id, image_url)
                .await
                .map_err(fail(SyncStage::Attaching))?;
            info!(url = %image_url, "attached image");
        }

        for tag in &item.tags {
            if labels.is_marker(tag) {
                continue;
            }
            let label = labels
                .ensure_label(self.trello, tag)
                .await
                .map_err(fail(SyncStage::Labeling))?;
            self.trello
                .assign_label(&card.id, &label.id)
                .await
                .map_err(fail(SyncStage::Labeling))?;
        }

        self.pocket
            .archive(&item.id)
            .await
            .map_err(fail(SyncStage::Archiving))?;
        info!(url = %item.url, "archived item");

        Ok(card)
    }
}

/// Run one pass driven by `cfg` and, when it completes without item
/// failures, persist `pocket_last_checked` as the time the pass started.
pub async fn run_and_record(
    cfg: &mut Config,
    config_path: &Path,
    pocket: &dyn PocketService,
    trello: &dyn TrelloService,
    titles: &TitleResolver,
) -> Result<RunOutcome> {
    let started_at = chrono::Utc::now().timestamp();
    let query = ItemQuery {
        state: cfg.state_filter().to_string(),
        tag: cfg.marker_tag().map(str::to_string),
        since: cfg.since(),
    };
    let syncer = Syncer::new(
        pocket,
        trello,
        titles,
        cfg.destination_list_id.clone(),
        cfg.marker_tag().map(str::to_string),
    );

    let outcome = syncer.run(&query).await?;
    if let RunOutcome::Completed(report) = &outcome {
        if report.is_clean() {
            cfg.mark_checked(started_at);
            cfg.save(config_path)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
            info!(last_checked = started_at, "recorded run completion");
        } else {
            warn!(
                failed = report.failures.len(),
                "not advancing last checked timestamp"
            );
        }
    }
    Ok(outcome)
}

/// Bound a whole pass by `limit`. Running out of time is an error.
pub async fn with_deadline<T, F>(limit: Duration, pass: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, pass).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("run exceeded {}s", limit.as_secs_f64())),
    }
}
