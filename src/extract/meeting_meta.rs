use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Explicit metadata scraped from meeting-notes content before the
/// structured extractor runs. Everything here is best-effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingMetadata {
    pub source_system: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_title: Option<String>,
    pub participants: Vec<String>,
    pub links: MeetingLinks,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingLinks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+\s+\d{1,2},\s+\d{4})|(\d{4}-\d{2}-\d{2})").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w.\-]+@[\w.\-]+\.\w+").unwrap())
}

fn md_link_re(label: &str) -> Regex {
    Regex::new(&format!(r"\[{label}\]\(([^)]+)\)")).unwrap()
}

fn calendar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://www\.google\.com/calendar/event[^\s)]+").unwrap()
    })
}

/// Parse date, title, participant emails, and link fields from meeting
/// content (Google Meet notes layout).
pub fn parse_meeting_metadata(content: &str) -> MeetingMetadata {
    let lines: Vec<&str> = content.lines().collect();
    let mut metadata = MeetingMetadata {
        source_system: "google_meet".into(),
        ..Default::default()
    };

    // Date near the top, either "Aug 4, 2025" or "2025-08-04"
    for line in lines.iter().take(10) {
        if let Some(caps) = date_re().captures(line) {
            let parsed = caps
                .get(1)
                .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%b %d, %Y").ok())
                .or_else(|| {
                    caps.get(2)
                        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
                });
            if let Some(date) = parsed {
                metadata.meeting_date = Some(format!("{}T00:00:00", date.format("%Y-%m-%d")));
                break;
            }
        }
    }

    // Title: first `##` heading, markdown links flattened to their label
    static LINK_LABEL_RE: OnceLock<Regex> = OnceLock::new();
    let link_label_re =
        LINK_LABEL_RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
    for line in lines.iter().take(30) {
        if let Some(title) = line.strip_prefix("## ") {
            let title = link_label_re.replace_all(title.trim(), "$1").to_string();
            metadata.meeting_title = Some(title);
            break;
        }
    }

    // Participant emails from the Invited section
    let mut in_invited = false;
    for line in lines.iter().take(50) {
        if line.to_lowercase().contains("invited") {
            in_invited = true;
            continue;
        }
        if in_invited {
            for email in email_re().find_iter(line) {
                metadata.participants.push(email.as_str().to_string());
            }
            if line.starts_with("##") {
                break;
            }
        }
    }

    for line in lines.iter().take(50) {
        if metadata.links.transcript.is_none() {
            if let Some(caps) = md_link_re("Transcript").captures(line) {
                metadata.links.transcript = Some(caps[1].to_string());
            }
        }
        if metadata.links.recording.is_none() {
            if let Some(caps) = md_link_re("Recording").captures(line) {
                metadata.links.recording = Some(caps[1].to_string());
            }
        }
        if metadata.links.calendar.is_none() {
            if let Some(m) = calendar_re().find(line) {
                metadata.links.calendar = Some(m.as_str().to_string());
            }
        }
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTES: &str = "\
Aug 4, 2025

## Weekly Sync [Recording](https://example.com/rec)

Invited: team

- alice@example.com
- bob@corp.example.org

## Summary

[Transcript](https://example.com/tr)
https://www.google.com/calendar/event?eid=abc123
";

    #[test]
    fn parses_all_fields() {
        let meta = parse_meeting_metadata(NOTES);
        assert_eq!(meta.meeting_date.as_deref(), Some("2025-08-04T00:00:00"));
        assert_eq!(
            meta.meeting_title.as_deref(),
            Some("Weekly Sync Recording")
        );
        assert_eq!(meta.participants, vec!["alice@example.com", "bob@corp.example.org"]);
        assert_eq!(meta.links.transcript.as_deref(), Some("https://example.com/tr"));
        assert_eq!(meta.links.recording.as_deref(), Some("https://example.com/rec"));
        assert_eq!(
            meta.links.calendar.as_deref(),
            Some("https://www.google.com/calendar/event?eid=abc123")
        );
    }

    #[test]
    fn iso_date_variant() {
        let meta = parse_meeting_metadata("2025-12-01\n\n## Standup\n");
        assert_eq!(meta.meeting_date.as_deref(), Some("2025-12-01T00:00:00"));
    }

    #[test]
    fn missing_fields_stay_none() {
        let meta = parse_meeting_metadata("just some text without structure");
        assert!(meta.meeting_date.is_none());
        assert!(meta.meeting_title.is_none());
        assert!(meta.participants.is_empty());
        assert!(meta.links.transcript.is_none());
    }
}
