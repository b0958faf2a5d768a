use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::fetch::{self, BasicClient, HttpClient};
use crate::markup;
use crate::services::alert_feed::{AlertFeed, AlertKind, RssItem};

const FEED_URL: &str = "https://www.wtp.waw.pl/feed/";

static ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<item(?:\s[^>]*)?>(.*?)</item>").unwrap());

/// Reads WTP's alert RSS channels and the pages they link to.
pub struct WtpClient<C = BasicClient> {
    client: C,
}

impl<C: HttpClient> WtpClient<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    fn feed_url(&self, kind: AlertKind) -> String {
        format!("{FEED_URL}?post_type={}", kind.post_type())
    }
}

/// Extracts the `<item>`s of an RSS document.
///
/// Items missing a `<guid>` or `<link>` are skipped.
pub fn parse_rss(xml: &str) -> Vec<RssItem> {
    ITEM.captures_iter(xml)
        .filter_map(|caps| {
            let item = &caps[1];
            Some(RssItem {
                title: markup::child_text(item, "title").unwrap_or_default(),
                link: markup::child_text(item, "link")?,
                guid: markup::child_text(item, "guid")?,
                description: markup::child_text(item, "description")
                    .map(|d| markup::unescape(&markup::strip_tags(&d)).trim().to_string())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

#[async_trait]
impl<C: HttpClient> AlertFeed for WtpClient<C> {
    async fn items(&self, kind: AlertKind) -> Result<Vec<RssItem>> {
        let url = self.feed_url(kind);
        let xml = fetch::fetch_text(&self.client, &url)
            .await
            .with_context(|| format!("failed to read the {} feed", kind.post_type()))?;
        Ok(parse_rss(&xml))
    }

    async fn page(&self, link: &str) -> Result<String> {
        fetch::fetch_text(&self.client, link)
            .await
            .with_context(|| format!("failed to read alert page {link}"))
    }
}
