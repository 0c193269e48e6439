#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Unread,
    Archived,
    Deleted,
    Unknown,
}

impl ItemStatus {
    /// Map Pocket's string status code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "0" => ItemStatus::Unread,
            "1" => ItemStatus::Archived,
            "2" => ItemStatus::Deleted,
            _ => ItemStatus::Unknown,
        }
    }
}

/// A saved Pocket item, reduced to what the sync needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub id: String,
    pub url: String,
    pub excerpt: String,
    pub image_url: Option<String>,
    /// Tag names in the order Pocket returned them.
    pub tags: Vec<String>,
    pub status: ItemStatus,
}

impl SourceItem {
    pub fn is_unread(&self) -> bool {
        self.status == ItemStatus::Unread
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelColor {
    Green,
    Yellow,
    Orange,
    Red,
    Purple,
    Blue,
    Sky,
    Lime,
    Pink,
    Black,
}

impl LabelColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelColor::Green => "green",
            LabelColor::Yellow => "yellow",
            LabelColor::Orange => "orange",
            LabelColor::Red => "red",
            LabelColor::Purple => "purple",
            LabelColor::Blue => "blue",
            LabelColor::Sky => "sky",
            LabelColor::Lime => "lime",
            LabelColor::Pink => "pink",
            LabelColor::Black => "black",
        }
    }
}

/// Trello label on a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

/// Trello card created for a source item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub id: String,
    pub name: String,
}
