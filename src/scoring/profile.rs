//! Remote user profile as returned by the users service.
//!
//! The document is loosely typed. Unknown fields are ignored and a ranking that
//! is missing, null, or not one of the known levels degrades to
//! [`Ranking::Beginner`] instead of failing the whole profile. Only a document
//! that is not valid JSON, or lacks the `profile` object, is rejected.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Skill level for a sport, lowest first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Ranking {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Ranking {
    /// Parses case-insensitively, falling back to the lowest rank.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.trim().parse().ok()).unwrap_or_default()
    }

    pub fn level(self) -> u8 {
        match self {
            Ranking::Beginner => 0,
            Ranking::Intermediate => 1,
            Ranking::Advanced => 2,
        }
    }

    pub fn distance(self, other: Ranking) -> u8 {
        self.level().abs_diff(other.level())
    }
}

impl<'de> Deserialize<'de> for Ranking {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(Ranking::parse_lenient(raw.as_ref().and_then(Value::as_str)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SportPreference {
    pub name: String,
    #[serde(default)]
    pub ranking: Ranking,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sports_of_preference: Vec<SportPreference>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<SportPreference>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<SportPreference>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
struct ProfileDocument {
    profile: UserProfile,
}

impl UserProfile {
    /// Parses a `{"profile": {"sportsOfPreference": [...]}}` document.
    pub fn from_json(raw: &str) -> ProfileResult<Self> {
        let document: ProfileDocument = serde_json::from_str(raw)?;
        Ok(document.profile)
    }

    pub fn preference(&self, sport: &str) -> Option<&SportPreference> {
        self.sports_of_preference
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(sport))
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type ProfileResult<T> = Result<T, ProfileError>;
