use poise::serenity_prelude::UserId;
use serde_json::{Map, Value};
use thiserror::Error;

/// Which feed an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Blacklist,
    Unblacklist,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Blacklist => "blacklist",
            EventKind::Unblacklist => "unblacklist",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single record from one of the feeds. Never persisted; only `event_id`
/// survives in the guild seen-sets.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationEvent {
    pub kind: EventKind,
    pub event_id: String,
    /// Player UUID, resolved to a username for display
    pub subject_external_id: String,
    /// Discord account the enforcement applies to
    pub subject_platform_id: UserId,
    pub offense: String,
    pub effective_date: String,
    pub duration_seconds: Option<i64>,
}

/// Why a feed record was dropped
#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' has an invalid value")]
    InvalidField(&'static str),
}

// The two feeds name the same things differently, and some records carry
// both spellings. Earlier names win.
const SUBJECT_UUID_FIELDS: &[&str] = &["offender_uuid", "uuid"];
const DISCORD_ID_FIELDS: &[&str] = &["offender_discord_id", "discord_id"];
const OFFENSE_FIELDS: &[&str] = &["offense_type", "offense"];
const BLACKLIST_DATE_FIELDS: &[&str] = &["ban_date", "date"];
const UNBLACKLIST_DATE_FIELDS: &[&str] = &["unban_date", "date"];

impl ModerationEvent {
    pub fn from_value(kind: EventKind, value: &Value) -> Result<Self, RecordError> {
        let record = value.as_object().ok_or(RecordError::NotAnObject)?;

        let event_id = scalar_string(record, &["id"])?.ok_or(RecordError::MissingField("id"))?;
        let subject_external_id = scalar_string(record, SUBJECT_UUID_FIELDS)?
            .ok_or(RecordError::MissingField("uuid"))?;

        let raw_discord_id = scalar_string(record, DISCORD_ID_FIELDS)?
            .ok_or(RecordError::MissingField("discord_id"))?;
        let subject_platform_id = raw_discord_id
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(UserId::new)
            .ok_or(RecordError::InvalidField("discord_id"))?;

        let offense = scalar_string(record, OFFENSE_FIELDS)?.unwrap_or_else(|| "N/A".to_string());

        let date_fields = match kind {
            EventKind::Blacklist => BLACKLIST_DATE_FIELDS,
            EventKind::Unblacklist => UNBLACKLIST_DATE_FIELDS,
        };
        let effective_date = scalar_string(record, date_fields)?.unwrap_or_else(|| "Unknown".to_string());

        let duration_seconds = match scalar_string(record, &["ban_duration"])? {
            Some(raw) => Some(
                raw.parse::<f64>()
                    .map(|secs| secs as i64)
                    .map_err(|_| RecordError::InvalidField("ban_duration"))?,
            ),
            None => None,
        };

        Ok(Self {
            kind,
            event_id,
            subject_external_id,
            subject_platform_id,
            offense,
            effective_date,
            duration_seconds,
        })
    }
}

/// First present, non-null field among `names`, rendered as a string.
/// Numbers are accepted because upstream ids are not consistently quoted.
fn scalar_string(
    record: &Map<String, Value>,
    names: &'static [&'static str],
) -> Result<Option<String>, RecordError> {
    for name in names {
        match record.get(*name) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => return Ok(Some(s.trim().to_string())),
            Some(Value::Number(n)) => return Ok(Some(n.to_string())),
            Some(_) => return Err(RecordError::InvalidField(*name)),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blacklist_record() {
        let value = json!({
            "id": 17,
            "offender_uuid": "069a79f4-44e9-4726-a5be-fca90e38aaf5",
            "uuid": "ignored",
            "offender_discord_id": "123456789012345678",
            "offense_type": "Cheating",
            "ban_date": "2024-05-01",
            "ban_duration": "2592000"
        });

        let event = ModerationEvent::from_value(EventKind::Blacklist, &value).unwrap();
        assert_eq!(event.event_id, "17");
        assert_eq!(event.subject_external_id, "069a79f4-44e9-4726-a5be-fca90e38aaf5");
        assert_eq!(event.subject_platform_id, UserId::new(123456789012345678));
        assert_eq!(event.offense, "Cheating");
        assert_eq!(event.effective_date, "2024-05-01");
        assert_eq!(event.duration_seconds, Some(2_592_000));
    }

    #[test]
    fn test_unblacklist_record() {
        let value = json!({
            "id": "u-9",
            "uuid": "abc",
            "discord_id": 42,
            "offense": "Griefing",
            "unban_date": "2024-06-01"
        });

        let event = ModerationEvent::from_value(EventKind::Unblacklist, &value).unwrap();
        assert_eq!(event.kind, EventKind::Unblacklist);
        assert_eq!(event.event_id, "u-9");
        assert_eq!(event.subject_platform_id, UserId::new(42));
        assert_eq!(event.effective_date, "2024-06-01");
        assert_eq!(event.duration_seconds, None);
    }

    #[test]
    fn test_invalid_records() {
        let missing_id = json!({ "uuid": "abc", "discord_id": 42 });
        assert_eq!(
            ModerationEvent::from_value(EventKind::Unblacklist, &missing_id),
            Err(RecordError::MissingField("id"))
        );

        let zero_account = json!({ "id": 1, "uuid": "abc", "discord_id": 0 });
        assert_eq!(
            ModerationEvent::from_value(EventKind::Unblacklist, &zero_account),
            Err(RecordError::InvalidField("discord_id"))
        );

        assert_eq!(
            ModerationEvent::from_value(EventKind::Blacklist, &json!("E1")),
            Err(RecordError::NotAnObject)
        );
    }
}
