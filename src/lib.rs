pub mod config;
pub mod labels;
pub mod logging;
pub mod model;
pub mod pocket;
pub mod sync;
pub mod title;
pub mod trello;
