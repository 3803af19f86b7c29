use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Creation instant carried by every envelope, serialized as RFC 3339 / ISO-8601.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| Self(dt.with_timezone(&Utc)))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl std::ops::Deref for Timestamp {
    type Target = DateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_timestamp_now_is_recent() {
        let timestamp = Timestamp::now();
        let age = Utc::now() - timestamp.into_inner();
        assert!(age.num_seconds() < 1);
    }

    #[test]
    fn test_timestamp_display_is_iso8601() {
        let timestamp = Timestamp::from(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        assert_eq!(timestamp.to_string(), "2024-03-01T12:30:00.000Z");
    }

    #[test]
    fn test_timestamp_parse_offset_normalizes_to_utc() {
        let timestamp = Timestamp::parse("2024-03-01T14:30:00+02:00").unwrap();
        assert_eq!(
            timestamp.into_inner(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_timestamp_serialize() {
        let timestamp = Timestamp::from(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        let serialized = serde_json::to_string(&timestamp).unwrap();
        assert_eq!(serialized, "\"2024-03-01T12:30:00.000Z\"");
    }

    #[test]
    fn test_timestamp_deserialize_rejects_garbage() {
        let result: Result<Timestamp, _> = serde_json::from_str("\"yesterday\"");
        assert!(result.is_err());
    }
}
