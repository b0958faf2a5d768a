//! GTFS-Realtime service alerts from WTP's RSS channels.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::driver::Cycle;
use crate::error::Error;
use crate::gtfs::{self, DatasetScope, RouteKind, Routes};
use crate::gtfs_rt::translated_string::Translation;
use crate::gtfs_rt::{Alert, EntitySelector, FeedEntity, FeedMessage, TranslatedString};
use crate::markup;
use crate::options::AlertsOptions;
use crate::output;
use crate::services::alert_feed::{AlertFeed, AlertKind};

use super::LOCAL_TIME_FORMAT;

static POST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"p=(\d+)").unwrap());
static ROUTE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9A-Za-z-]{1,3}").unwrap());

const TITLE_PREFIXES: [&str; 2] = ["UTRUDNIENIA W KOMUNIKACJI:", "ZMIANY W KOMUNIKACJI:"];

/// One alert as exported to the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub id: String,
    #[serde(skip)]
    pub kind: AlertKind,
    pub routes: Vec<String>,
    pub effect: &'static str,
    pub link: String,
    pub title: String,
    pub body: String,
    pub htmlbody: String,
}

#[derive(Serialize)]
struct AlertsJson<'a> {
    time: String,
    alerts: &'a [AlertRecord],
}

/// `A/IMPEDIMENT/<p>` or `A/CHANGE/<p>` from the post number in the guid.
pub fn alert_id(kind: AlertKind, guid: &str) -> Option<String> {
    let post = POST_NUMBER.captures(guid)?;
    Some(format!("A/{}/{}", kind.post_type().to_uppercase(), &post[1]))
}

/// Route ids listed after the title's category prefix.
///
/// Titles without a known prefix list no routes.
pub fn title_routes(title: &str) -> Vec<String> {
    let title = title.to_uppercase();
    let Some(listed) = TITLE_PREFIXES
        .iter()
        .find_map(|prefix| title.strip_prefix(*prefix))
    else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    ROUTE_TOKEN
        .find_iter(listed)
        .map(|m| m.as_str().to_string())
        .filter(|route| seen.insert(route.clone()))
        .collect()
}

/// Category flags from the icons on an alert page.
pub fn page_flags(html: &str, kind: AlertKind) -> HashSet<String> {
    let class = match kind {
        AlertKind::Impediment => "impediment-category-icon",
        AlertKind::Change => "format-icon",
    };
    markup::image_alts(html, class).into_iter().collect()
}

/// Every route of the first kind flagged on the page.
fn flagged_routes(flags: &HashSet<String>, routes: &Routes) -> Vec<String> {
    let kind = if flags.contains("metro") {
        RouteKind::Metro
    } else if flags.contains("tramwaje") {
        RouteKind::Tram
    } else if flags.contains("kolej") || flags.contains("skm") {
        RouteKind::Rail
    } else if flags.contains("autobusy") {
        RouteKind::Bus
    } else {
        return Vec::new();
    };
    routes.of_kind(kind).map(str::to_string).collect()
}

/// Description of an alert page as `(plain text, html)`.
///
/// Everything after the last `<hr>` is boilerplate and dropped.
pub fn page_description(html: &str, kind: AlertKind) -> Option<(String, String)> {
    let content = match kind {
        AlertKind::Impediment => markup::element_by_class(html, "div", "impediment-content")?.to_string(),
        AlertKind::Change => {
            let main = markup::element_by_class(html, "main", "page-main")?;
            markup::remove_elements(main, "div", "is-style-small")
        }
    };

    let html = markup::cut_at_last_hr(&content).trim().to_string();
    let text = markup::to_plain_text(&html);
    if text.is_empty() {
        return None;
    }
    Some((text, html))
}

async fn scrape<F: AlertFeed + ?Sized>(feed: &F, link: &str, strict: bool) -> Result<Option<String>> {
    match feed.page(link).await {
        Ok(html) => Ok(Some(html)),
        Err(err) if strict => Err(err),
        Err(err) => {
            warn!(link, error = %format!("{err:#}"), "Unable to scrape alert page");
            Ok(None)
        }
    }
}

/// Reads both channels and resolves every alert's routes and description.
///
/// Only alerts affecting at least one known route are returned, impediments
/// first.
#[instrument(skip_all)]
pub async fn collect<F: AlertFeed + ?Sized>(
    feed: &F,
    routes: &Routes,
    strict: bool,
) -> Result<Vec<AlertRecord>> {
    let mut alerts = Vec::new();

    for kind in AlertKind::ALL {
        let items = feed.items(kind).await?;
        debug!(kind = kind.post_type(), items = items.len(), "Read alert channel");

        for item in items {
            let Some(id) = alert_id(kind, &item.guid) else {
                if strict {
                    return Err(anyhow!("no post number in guid {:?}", item.guid));
                }
                warn!(guid = %item.guid, "Skipping alert without a post number");
                continue;
            };

            let page = scrape(feed, &item.link, strict).await?;

            let mut affected: Vec<String> = title_routes(&item.title)
                .into_iter()
                .filter(|route| routes.contains(route))
                .collect();
            if affected.is_empty()
                && let Some(html) = &page
            {
                affected = flagged_routes(&page_flags(html, kind), routes);
            }

            if affected.is_empty() {
                debug!(%id, "Alert affects no known route, skipped");
                continue;
            }

            let (body, htmlbody) = page
                .as_deref()
                .and_then(|html| page_description(html, kind))
                .unwrap_or_default();

            alerts.push(AlertRecord {
                id,
                kind,
                routes: affected,
                effect: kind.effect().as_str_name(),
                link: item.link,
                title: item.description,
                body,
                htmlbody,
            });
        }
    }

    Ok(alerts)
}

fn translated(text: &str) -> TranslatedString {
    TranslatedString {
        translation: vec![Translation {
            text: text.to_string(),
            language: None,
        }],
    }
}

/// Builds the GTFS-Realtime alerts feed.
pub fn build_feed(alerts: &[AlertRecord], now: &DateTime<Tz>) -> FeedMessage {
    let entity = alerts
        .iter()
        .map(|record| {
            FeedEntity {
                id: record.id.clone(),
                alert: Some(Alert {
                    effect: Some(record.kind.effect() as i32),
                    url: Some(translated(&record.link)),
                    header_text: Some(translated(&record.title)),
                    description_text: (!record.body.is_empty()).then(|| translated(&record.body)),
                    informed_entity: record
                        .routes
                        .iter()
                        .map(|route| EntitySelector {
                            route_id: Some(route.clone()),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect();

    FeedMessage {
        header: output::feed_header(now),
        entity,
    }
}

/// Generates the alerts outputs, returning the number of alerts written.
#[instrument(skip_all, fields(target = %options.feed_target.display()))]
pub async fn make<F: AlertFeed + ?Sized>(
    feed: &F,
    routes: &Routes,
    options: &AlertsOptions,
    now: DateTime<Tz>,
) -> Result<usize> {
    let alerts = collect(feed, routes, options.strict).await?;

    output::write_feed(&options.feed_target, &build_feed(&alerts, &now), options.format)?;
    if let Some(json_target) = &options.json_target {
        let json = AlertsJson {
            time: now.format(LOCAL_TIME_FORMAT).to_string(),
            alerts: &alerts,
        };
        output::write_json(json_target, &json)?;
    }

    info!(alerts = alerts.len(), "Alerts generated");
    Ok(alerts.len())
}

/// Alerts bound to the static GTFS archive: reloads only `routes.txt`.
pub struct AlertsCycle<F> {
    feed: F,
    options: AlertsOptions,
    routes: Option<Routes>,
}

impl<F: AlertFeed> AlertsCycle<F> {
    pub fn new(feed: F, options: AlertsOptions) -> Self {
        Self {
            feed,
            options,
            routes: None,
        }
    }

    pub fn routes(&self) -> Option<&Routes> {
        self.routes.as_ref()
    }
}

#[async_trait]
impl<F: AlertFeed> Cycle for AlertsCycle<F> {
    async fn reload(&mut self, content: Bytes) -> Result<(), Error> {
        let dataset = gtfs::load(content, DatasetScope::RoutesOnly)?;
        self.routes = Some(dataset.routes);
        Ok(())
    }

    async fn regenerate(&mut self) -> Result<(), Error> {
        let routes = self
            .routes
            .as_ref()
            .ok_or_else(|| Error::generation(anyhow!("routes not loaded")))?;
        make(&self.feed, routes, &self.options, super::warsaw_now())
            .await
            .map(drop)
            .map_err(Error::generation)
    }
}
