use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The declarative posting schedule, parsed from a YAML document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub tweets: Vec<ScheduledTweet>,
}

/// One schedule entry: the tweet text, when to post it, and optional media
/// attachments by URL. Scalar `schedule`/`media` values in the raw document
/// are accepted and normalized to single-element lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTweet {
    pub text: String,
    #[serde(deserialize_with = "one_or_many")]
    pub schedule: Vec<Trigger>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub media: Vec<String>,
}

/// A trigger timestamp: either epoch milliseconds or a timestamp string.
/// Strings are resolved lazily at plan time; a string that fails to parse
/// simply never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    Millis(i64),
    Text(String),
}

impl Trigger {
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Trigger::Text(s) => parse_timestamp(s),
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or a bare date (UTC
/// midnight). Anything else is `None`.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn one_or_many<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

impl Schedule {
    /// Parse a YAML schedule document.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn scalar_schedule_and_media_become_lists() {
        let schedule = Schedule::parse(
            "tweets:\n  - text: hi\n    schedule: 2024-01-01T00:00:00Z\n    media: https://example.com/a.png\n",
        )
        .unwrap();

        let tweet = &schedule.tweets[0];
        assert_eq!(
            tweet.schedule,
            vec![Trigger::Text("2024-01-01T00:00:00Z".into())]
        );
        assert_eq!(tweet.media, vec!["https://example.com/a.png".to_string()]);
    }

    #[test]
    fn list_fields_pass_through_unchanged() {
        let schedule = Schedule::parse(
            "tweets:\n  - text: hi\n    schedule:\n      - 2024-01-01T00:00:00Z\n      - 2024-06-01T00:00:00Z\n    media:\n      - https://example.com/a.png\n",
        )
        .unwrap();

        let tweet = &schedule.tweets[0];
        assert_eq!(tweet.schedule.len(), 2);
        assert_eq!(tweet.media.len(), 1);
    }

    #[test]
    fn media_defaults_to_empty() {
        let schedule =
            Schedule::parse("tweets:\n  - text: hi\n    schedule: 1704067200000\n").unwrap();
        assert!(schedule.tweets[0].media.is_empty());
        assert_eq!(schedule.tweets[0].schedule, vec![Trigger::Millis(1704067200000)]);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Schedule::parse("tweets: [unclosed").is_err());
    }

    #[test]
    fn trigger_resolution_accepts_known_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Trigger::Text("2024-01-01T00:00:00Z".into()).resolve(),
            Some(expected)
        );
        assert_eq!(
            Trigger::Text("2024-01-01 00:00:00".into()).resolve(),
            Some(expected)
        );
        assert_eq!(Trigger::Text("2024-01-01".into()).resolve(), Some(expected));
        assert_eq!(
            Trigger::Millis(expected.timestamp_millis()).resolve(),
            Some(expected)
        );
    }

    #[test]
    fn malformed_trigger_resolves_to_none() {
        assert_eq!(Trigger::Text("next tuesday".into()).resolve(), None);
        assert_eq!(Trigger::Text("".into()).resolve(), None);
    }
}
