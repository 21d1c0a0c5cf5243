//! View renderers. Each one is a pure function of the registry; the page
//! replaces the matching region with whatever comes out of here.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;

use crate::types::{CityContributor, ContributionRecord, Registry};

pub const DEFAULT_RANKING_LIMIT: usize = 5;
pub const EMPTY_MESSAGE: &str = "No contributions recorded yet.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Gold,
    Silver,
    Bronze,
    Tree,
}

impl Badge {
    pub fn for_rank(rank: usize) -> Self {
        match rank {
            1 => Badge::Gold,
            2 => Badge::Silver,
            3 => Badge::Bronze,
            _ => Badge::Tree,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Badge::Gold => "🥇",
            Badge::Silver => "🥈",
            Badge::Bronze => "🥉",
            Badge::Tree => "🌳",
        }
    }
}

/// A contributor row, flattened out of its city record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub city: String,
    pub id: u64,
    pub name: String,
    pub quantity: u64,
    pub verified: bool,
}

impl From<CityContributor<'_>> for Row {
    fn from(entry: CityContributor<'_>) -> Self {
        Self {
            city: entry.city.to_string(),
            id: entry.contributor.id,
            name: entry.contributor.name.clone(),
            quantity: entry.contributor.quantity,
            verified: entry.contributor.verified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub badge: Badge,
    #[serde(flatten)]
    pub row: Row,
}

impl std::ops::Deref for RankingEntry {
    type Target = Row;

    fn deref(&self) -> &Row {
        &self.row
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// One point feature per city, carrying the popup markup.
pub fn markers(registry: &Registry) -> FeatureCollection {
    let features = registry
        .records()
        .map(|(city, record)| {
            let mut properties = JsonObject::new();
            properties.insert("city".into(), json!(city));
            properties.insert("total".into(), json!(record.total));
            properties.insert("contributors".into(), json!(record.contributors.len()));
            properties.insert("popup".into(), json!(popup_html(city, record)));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeoValue::Point(vec![record.lon, record.lat]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn popup_html(city: &str, record: &ContributionRecord) -> String {
    let mut items = String::new();
    for c in &record.contributors {
        let _ = write!(
            items,
            "<li>{} — 🌳 {}{}</li>",
            escape_html(&c.name),
            c.quantity,
            if c.verified { " ✅" } else { "" }
        );
    }
    format!(
        "<b>{}</b><br>🌳 Total: {} trees planted<br>\
         <details><summary>See contributors</summary><ul>{}</ul></details>",
        escape_html(city),
        record.total,
        items
    )
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Top `limit` contributors across every city by descending quantity. The
/// sort is stable, so ties keep their flatten order.
pub fn ranking(registry: &Registry, limit: usize) -> Vec<RankingEntry> {
    let mut all: Vec<CityContributor<'_>> = registry.contributors().collect();
    all.sort_by(|a, b| b.contributor.quantity.cmp(&a.contributor.quantity));
    all.into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, entry)| RankingEntry {
            rank: i + 1,
            badge: Badge::for_rank(i + 1),
            row: entry.into(),
        })
        .collect()
}

pub fn ranking_html(entries: &[RankingEntry]) -> String {
    if entries.is_empty() {
        return empty_html();
    }
    let mut html = String::from("<ol class=\"ranking\">");
    for entry in entries {
        let _ = write!(
            html,
            "<li><span class=\"badge\">{}</span> <strong>{}</strong> — 🌳 {} <small>({})</small>{} {}</li>",
            entry.badge.symbol(),
            escape_html(&entry.name),
            entry.quantity,
            escape_html(&entry.city),
            verified_mark(entry.verified),
            action_button("toggle", &entry.row, toggle_label(entry.verified)),
        );
    }
    html.push_str("</ol>");
    html
}

pub fn ranking_text(entries: &[RankingEntry]) -> String {
    if entries.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }
    entries
        .iter()
        .map(|e| {
            format!(
                "{} {}. {} — {} tree(s) ({}){}",
                e.badge.symbol(),
                e.rank,
                e.name,
                e.quantity,
                e.city,
                verified_mark(e.verified)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Management
// ---------------------------------------------------------------------------

/// Every contributor, untruncated.
pub fn management_rows(registry: &Registry) -> Vec<Row> {
    registry.contributors().map(Row::from).collect()
}

pub fn management_html(rows: &[Row]) -> String {
    if rows.is_empty() {
        return empty_html();
    }
    let mut html = String::from(
        "<table class=\"manage\"><thead><tr><th>Name</th><th>Trees</th><th>City</th><th></th></tr></thead><tbody>",
    );
    for row in rows {
        let _ = write!(
            html,
            "<tr><td>{}{}</td><td>{}</td><td>{}</td><td>{} {}</td></tr>",
            escape_html(&row.name),
            verified_mark(row.verified),
            row.quantity,
            escape_html(&row.city),
            action_button("toggle", row, toggle_label(row.verified)),
            action_button("delete", row, "Delete"),
        );
    }
    html.push_str("</tbody></table>");
    html
}

pub fn management_text(rows: &[Row]) -> String {
    if rows.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }
    rows.iter()
        .map(|r| {
            format!(
                "[{}] {} — {} tree(s) — {}{}",
                r.id,
                r.name,
                r.quantity,
                r.city,
                if r.verified { " (verified)" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// All three views, rendered from the same registry snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Views {
    pub markers: FeatureCollection,
    pub ranking: String,
    pub manage: String,
}

impl Views {
    pub fn render(registry: &Registry, ranking_limit: usize) -> Self {
        Self {
            markers: markers(registry),
            ranking: ranking_html(&ranking(registry, ranking_limit)),
            manage: management_html(&management_rows(registry)),
        }
    }
}

fn empty_html() -> String {
    format!("<p class=\"empty\">{EMPTY_MESSAGE}</p>")
}

fn verified_mark(verified: bool) -> &'static str {
    if verified {
        " ✅"
    } else {
        ""
    }
}

fn toggle_label(verified: bool) -> &'static str {
    if verified {
        "Unverify"
    } else {
        "Verify"
    }
}

fn action_button(action: &str, row: &Row, label: &str) -> String {
    format!(
        "<button data-action=\"{}\" data-id=\"{}\" data-city=\"{}\">{}</button>",
        action,
        row.id,
        escape_html(&row.city),
        label
    )
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
