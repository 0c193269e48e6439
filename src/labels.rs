use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::model::{Label, LabelColor};
use crate::trello::TrelloService;

/// Colors handed to new labels, in order, wrapping around.
pub const PALETTE: [LabelColor; 10] = [
    LabelColor::Green,
    LabelColor::Yellow,
    LabelColor::Orange,
    LabelColor::Red,
    LabelColor::Purple,
    LabelColor::Blue,
    LabelColor::Sky,
    LabelColor::Lime,
    LabelColor::Pink,
    LabelColor::Black,
];

/// Run-scoped tag → label mapping for one board.
#[derive(Debug)]
pub struct LabelAllocator {
    board_id: String,
    marker_tag: Option<String>,
    labels: HashMap<String, Label>,
    cursor: usize,
}

impl LabelAllocator {
    pub fn new(board_id: impl Into<String>, marker_tag: Option<String>, existing: Vec<Label>) -> Self {
        let labels = existing
            .into_iter()
            .filter(|l| !l.name.is_empty())
            .map(|l| (l.name.clone(), l))
            .collect();
        Self {
            board_id: board_id.into(),
            marker_tag,
            labels,
            cursor: 0,
        }
    }

    /// Seed from the labels already on the board.
    pub async fn load(
        trello: &dyn TrelloService,
        board_id: &str,
        marker_tag: Option<String>,
    ) -> Result<Self> {
        let existing = trello
            .get_labels(board_id)
            .await
            .context("failed to load board labels")?;
        debug!(board_id, count = existing.len(), "loaded board labels");
        Ok(Self::new(board_id, marker_tag, existing))
    }

    /// The marker tag selects items for syncing and never becomes a label.
    pub fn is_marker(&self, tag: &str) -> bool {
        self.marker_tag.as_deref() == Some(tag)
    }

    fn peek_color(&self) -> LabelColor {
        PALETTE[self.cursor]
    }

    fn advance_color(&mut self) {
        self.cursor = (self.cursor + 1) % PALETTE.len();
    }

    /// Existing label for `tag`, or a new one in the next palette color.
    ///
    /// The color is only consumed once the label has been created, so a
    /// failed create does not shift the palette for later tags.
    pub async fn ensure_label(&mut self, trello: &dyn TrelloService, tag: &str) -> Result<Label> {
        if let Some(label) = self.labels.get(tag) {
            debug!(tag, label_id = %label.id, color = ?label.color, "reusing label");
            return Ok(label.clone());
        }
        let color = self.peek_color();
        let label = trello
            .create_label(&self.board_id, tag, color.as_str())
            .await
            .with_context(|| format!("failed to create label '{}'", tag))?;
        self.advance_color();
        info!(tag, color = color.as_str(), label_id = %label.id, "created label");
        self.labels.insert(tag.to_string(), label.clone());
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(id: &str, name: &str) -> Label {
        Label {
            id: id.into(),
            name: name.into(),
            color: Some("red".into()),
        }
    }

    #[test]
    fn seeds_by_exact_name_and_skips_unnamed() {
        let alloc = LabelAllocator::new(
            "b",
            None,
            vec![label("1", "Rust"), label("2", ""), label("3", "go")],
        );
        assert_eq!(alloc.labels.len(), 2);
        assert!(alloc.labels.contains_key("Rust"));
        assert!(!alloc.labels.contains_key("rust"));
    }

    #[test]
    fn marker_detection() {
        let alloc = LabelAllocator::new("b", Some("trello".into()), vec![]);
        assert!(alloc.is_marker("trello"));
        assert!(!alloc.is_marker("Trello"));
        let none = LabelAllocator::new("b", None, vec![]);
        assert!(!none.is_marker("trello"));
    }

    #[test]
    fn palette_wraps() {
        let mut alloc = LabelAllocator::new("b", None, vec![]);
        let colors: Vec<_> = (0..12)
            .map(|_| {
                let color = alloc.peek_color();
                alloc.advance_color();
                color
            })
            .collect();
        assert_eq!(colors[0], LabelColor::Green);
        assert_eq!(colors[9], LabelColor::Black);
        assert_eq!(colors[10], LabelColor::Green);
        assert_eq!(colors[11], LabelColor::Yellow);
    }
}
