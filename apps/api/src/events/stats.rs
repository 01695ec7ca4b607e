use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::{EventLog, EventType, InteractionEvent};
use crate::experiment::Variant;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariantStats {
    pub total_events: usize,
    pub content_views: usize,
    pub content_interactions: usize,
    pub likes: usize,
    pub dislikes: usize,
    /// Interactions per hundred views, two decimals.
    pub conversion_rate: String,
    /// Likes per hundred interactions, two decimals.
    pub satisfaction_rate: String,
    pub unique_users: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallStats {
    pub total_events: usize,
    pub unique_users: usize,
    pub active_sessions: usize,
    pub event_distribution: BTreeMap<Variant, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeRange {
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub hours_retained: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbTestStats {
    pub variants: BTreeMap<Variant, VariantStats>,
    pub overall: OverallStats,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }
}

const CSV_HEADER: &str = "event_type,user_id,timestamp,variant,sequence_id,session_id";

impl EventLog {
    /// Per-variant funnel numbers for every registered variant, even empty ones.
    pub fn get_ab_test_stats(&self) -> AbTestStats {
        let events = self.snapshot();

        let mut groups: BTreeMap<Variant, Vec<&InteractionEvent>> = self
            .assignor()
            .registry()
            .variants()
            .map(|v| (v.clone(), Vec::new()))
            .collect();
        for event in &events {
            if let Some(variant) = &event.variant {
                groups.entry(variant.clone()).or_default().push(event);
            }
        }

        let variants = groups
            .iter()
            .map(|(variant, group)| (variant.clone(), variant_stats(group)))
            .collect();

        let grouped = groups.values().flatten();
        let overall = OverallStats {
            total_events: groups.values().map(Vec::len).sum(),
            unique_users: grouped
                .map(|e| e.user_id.as_str())
                .collect::<HashSet<_>>()
                .len(),
            active_sessions: self.session_count(),
            event_distribution: groups.iter().map(|(v, g)| (v.clone(), g.len())).collect(),
        };

        let oldest = events.iter().map(|e| e.timestamp).min();
        let newest = events.iter().map(|e| e.timestamp).max();
        let hours_retained = match (oldest, newest) {
            (Some(oldest), Some(newest)) => {
                let minutes = (newest - oldest).num_minutes();
                (minutes + 59) / 60
            }
            _ => 0,
        };

        AbTestStats {
            variants,
            overall,
            time_range: TimeRange {
                oldest,
                newest,
                hours_retained,
            },
        }
    }

    /// Serializes every retained event, oldest first.
    pub fn export_events(&self, format: ExportFormat) -> Result<String, serde_json::Error> {
        let events = self.snapshot();
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&events),
            ExportFormat::Csv => {
                let mut out = String::from(CSV_HEADER);
                for event in &events {
                    out.push('\n');
                    out.push_str(&csv_row(event));
                }
                Ok(out)
            }
        }
    }
}

fn variant_stats(events: &[&InteractionEvent]) -> VariantStats {
    let mut likes = 0;
    let mut dislikes = 0;
    let mut views = 0;
    for event in events {
        match event.event_type {
            EventType::ContentView => views += 1,
            EventType::ContentInteraction => match event.metadata.get("action").and_then(|a| a.as_str()) {
                Some("like") => likes += 1,
                Some("dislike") => dislikes += 1,
                _ => {}
            },
            _ => {}
        }
    }
    let interactions = likes + dislikes;

    VariantStats {
        total_events: events.len(),
        content_views: views,
        content_interactions: interactions,
        likes,
        dislikes,
        conversion_rate: percent(interactions, views),
        satisfaction_rate: percent(likes, interactions),
        unique_users: events
            .iter()
            .map(|e| e.user_id.as_str())
            .collect::<HashSet<_>>()
            .len(),
    }
}

fn percent(numerator: usize, denominator: usize) -> String {
    let rate = if denominator > 0 {
        numerator as f64 / denominator as f64 * 100.0
    } else {
        0.0
    };
    format!("{rate:.2}")
}

fn csv_row(event: &InteractionEvent) -> String {
    [
        event.event_type.as_str().to_string(),
        csv_field(&event.user_id),
        event.timestamp.to_rfc3339(),
        event
            .variant
            .as_ref()
            .map(|v| csv_field(v.as_str()))
            .unwrap_or_default(),
        event.sequence_id.to_string(),
        csv_field(&event.session_id),
    ]
    .join(",")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
