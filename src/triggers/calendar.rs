use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::json;
use tracing::{debug, warn};

use super::engine::TriggerDispatcher;
use super::Trigger;
use crate::security::urls::validate_url;

const DEFAULT_POLL_MINUTES: u64 = 15;
const FETCH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct VEvent {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub summary: String,
    pub description: String,
}

/// Minimal VEVENT extractor: DTSTART, DTEND, SUMMARY and DESCRIPTION from
/// unfolded iCal text. Anything else is ignored.
pub fn parse_vevents(ics: &str) -> Vec<VEvent> {
    // Unfold continuation lines (RFC 5545: lines starting with a space or
    // tab continue the previous line).
    let mut unfolded: Vec<String> = Vec::new();
    for raw in ics.lines() {
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !unfolded.is_empty() {
            let last = unfolded.last_mut().unwrap();
            last.push_str(raw.trim_start());
        } else {
            unfolded.push(raw.trim_end().to_string());
        }
    }

    let mut events = Vec::new();
    let mut current: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>, String, String)> = None;

    for line in unfolded {
        if line == "BEGIN:VEVENT" {
            current = Some((None, None, String::new(), String::new()));
            continue;
        }
        if line == "END:VEVENT" {
            if let Some((Some(start), end, summary, description)) = current.take() {
                events.push(VEvent {
                    start,
                    end,
                    summary,
                    description,
                });
            }
            continue;
        }
        let Some(state) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // Property parameters (DTSTART;TZID=...) live before the colon.
        let name = key.split(';').next().unwrap_or(key);
        match name {
            "DTSTART" => state.0 = parse_ical_datetime(value),
            "DTEND" => state.1 = parse_ical_datetime(value),
            "SUMMARY" => state.2 = value.to_string(),
            "DESCRIPTION" => state.3 = value.replace("\\n", "\n").replace("\\,", ","),
            _ => {}
        }
    }
    events
}

/// `YYYYMMDDTHHMMSSZ`, `YYYYMMDDTHHMMSS` (treated as UTC) or `YYYYMMDD`.
fn parse_ical_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Poll an iCal URL; fire for events starting inside the next polling
/// window that were not already announced by the previous poll.
pub fn spawn(dispatcher: Arc<TriggerDispatcher>, trigger: Trigger) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval_minutes = trigger
            .config
            .get("poll_minutes")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_POLL_MINUTES)
            .max(1);
        let url = trigger
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let window = chrono::Duration::minutes(interval_minutes as i64);
        let mut last_poll = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(interval_minutes * 60)).await;

            let settings = dispatcher.settings();
            if settings.ssrf_protection {
                if let Err(e) = validate_url(&url, settings.allow_localhost_urls) {
                    warn!("calendar '{}' URL rejected: {}", trigger.name, e);
                    continue;
                }
            }

            let client = match reqwest::Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
            {
                Ok(c) => c,
                Err(e) => {
                    warn!("calendar '{}' client build failed: {}", trigger.name, e);
                    continue;
                }
            };
            let body = match client.get(&url).send().await {
                Ok(res) => match res.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("calendar '{}' body read failed: {}", trigger.name, e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("calendar '{}' fetch failed: {}", trigger.name, e);
                    continue;
                }
            };

            let now = Utc::now();
            let horizon = now + window;
            let upcoming: Vec<VEvent> = parse_vevents(&body)
                .into_iter()
                .filter(|e| e.start > last_poll && e.start <= horizon)
                .collect();
            debug!(
                "calendar '{}': {} events in the next window",
                trigger.name,
                upcoming.len()
            );
            last_poll = now;

            for event in upcoming {
                dispatcher
                    .fire(
                        &trigger.id,
                        json!({
                            "summary": event.summary,
                            "description": event.description,
                            "start": event.start.to_rfc3339(),
                            "end": event.end.map(|e| e.to_rfc3339()),
                        }),
                    )
                    .await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
DTSTART:20260315T140000Z\r\n\
DTEND:20260315T150000Z\r\n\
SUMMARY:Planning sync\r\n\
DESCRIPTION:Quarterly planning\\, bring numbers\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
DTSTART;VALUE=DATE:20260401\r\n\
SUMMARY:All day thing\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn parses_vevents_with_times_and_dates() {
        let events = parse_vevents(SAMPLE);
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].summary, "Planning sync");
        assert_eq!(events[0].description, "Quarterly planning, bring numbers");
        assert_eq!(
            events[0].start,
            Utc.with_ymd_and_hms(2026, 3, 15, 14, 0, 0).unwrap()
        );
        assert_eq!(
            events[0].end,
            Some(Utc.with_ymd_and_hms(2026, 3, 15, 15, 0, 0).unwrap())
        );

        assert_eq!(events[1].summary, "All day thing");
        assert_eq!(
            events[1].start,
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(events[1].end, None);
    }

    #[test]
    fn folded_lines_are_unfolded() {
        let ics = "BEGIN:VEVENT\r\nDTSTART:20260315T140000Z\r\nSUMMARY:A very long\r\n  title continued\r\nEND:VEVENT\r\n";
        let events = parse_vevents(ics);
        assert_eq!(events[0].summary, "A very long title continued");
    }

    #[test]
    fn events_without_dtstart_are_skipped() {
        let ics = "BEGIN:VEVENT\r\nSUMMARY:No start\r\nEND:VEVENT\r\n";
        assert!(parse_vevents(ics).is_empty());
    }

    #[test]
    fn garbage_outside_vevent_is_ignored() {
        let ics = "X-JUNK:1\r\nDTSTART:20260101T000000Z\r\nBEGIN:VEVENT\r\nDTSTART:20260315T140000Z\r\nSUMMARY:Real\r\nEND:VEVENT\r\n";
        let events = parse_vevents(ics);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "Real");
    }
}
