//! Trait and types for reading published service alerts.

use anyhow::Result;

use crate::gtfs_rt::alert::Effect;

/// The two alert channels published by WTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Disruptions ("utrudnienia").
    Impediment,
    /// Planned changes ("zmiany").
    Change,
}

impl AlertKind {
    pub const ALL: [AlertKind; 2] = [AlertKind::Impediment, AlertKind::Change];

    /// Value of the feed's `post_type` query parameter.
    pub fn post_type(self) -> &'static str {
        match self {
            AlertKind::Impediment => "impediment",
            AlertKind::Change => "change",
        }
    }

    pub fn effect(self) -> Effect {
        match self {
            AlertKind::Impediment => Effect::ReducedService,
            AlertKind::Change => Effect::OtherEffect,
        }
    }
}

/// One `<item>` of an RSS channel, with CDATA and entities already decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub guid: String,
    pub description: String,
}

/// Source of alert listings and the pages they link to.
#[async_trait::async_trait]
pub trait AlertFeed: Send + Sync {
    /// Returns every item currently listed in the channel.
    async fn items(&self, kind: AlertKind) -> Result<Vec<RssItem>>;

    /// Returns the HTML of an alert's page.
    async fn page(&self, link: &str) -> Result<String>;
}
