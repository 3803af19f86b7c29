use std::{collections::HashMap, fmt::Debug};

use serde::{Deserialize, Serialize};

use super::profile::{Ranking, UserProfile};

/// An event the user took part in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipatedEvent {
    pub event_id: String,
    pub sport: String,
    #[serde(default)]
    pub level: Ranking,
}

/// An event being considered for recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvent {
    pub event_id: String,
    pub sport: String,
    #[serde(default)]
    pub level: Ranking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEvent {
    pub event: CandidateEvent,
    pub score: f64,
}

/// Computes a recommendation score in `[0.0, 1.0]` for a candidate event.
pub trait ScoringStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn score(&self, candidate: &CandidateEvent) -> f64;

    /// Scores and sorts candidates, best first. Ties keep their input order.
    fn rank(&self, candidates: &[CandidateEvent]) -> Vec<ScoredEvent> {
        let mut scored: Vec<ScoredEvent> = candidates
            .iter()
            .map(|event| ScoredEvent {
                score: self.score(event),
                event: event.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }
}

const MAX_LEVEL_DISTANCE: f64 = 2.0;

fn level_proximity(a: f64, b: f64) -> f64 {
    1.0 - ((a - b).abs() / MAX_LEVEL_DISTANCE).min(1.0)
}

/// Scores from what the user actually did: how often they played the sport,
/// and how close the event's level is to their usual level.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBasedStrategy {
    sport_counts: HashMap<String, usize>,
    total: usize,
    average_level: f64,
}

impl HistoryBasedStrategy {
    const SPORT_WEIGHT: f64 = 0.7;
    const LEVEL_WEIGHT: f64 = 0.3;

    pub fn new(history: &[ParticipatedEvent]) -> Self {
        let mut sport_counts = HashMap::new();
        for event in history {
            *sport_counts.entry(event.sport.to_lowercase()).or_insert(0) += 1;
        }
        let total = history.len();
        let average_level = if total == 0 {
            0.0
        } else {
            history.iter().map(|e| f64::from(e.level.level())).sum::<f64>() / total as f64
        };
        Self {
            sport_counts,
            total,
            average_level,
        }
    }

    pub fn events_considered(&self) -> usize {
        self.total
    }
}

impl ScoringStrategy for HistoryBasedStrategy {
    fn name(&self) -> &'static str {
        "history"
    }

    fn score(&self, candidate: &CandidateEvent) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let played = self
            .sport_counts
            .get(&candidate.sport.to_lowercase())
            .copied()
            .unwrap_or(0);
        let affinity = played as f64 / self.total as f64;
        let proximity = level_proximity(self.average_level, f64::from(candidate.level.level()));
        Self::SPORT_WEIGHT * affinity + Self::LEVEL_WEIGHT * proximity
    }
}

/// Scores from declared preferences: sports the user does not list score zero,
/// listed sports score by how close the event level is to the user's ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileBasedStrategy {
    preferences: HashMap<String, Ranking>,
}

impl ProfileBasedStrategy {
    pub fn new(profile: &UserProfile) -> Self {
        Self {
            preferences: profile
                .sports_of_preference
                .iter()
                .map(|p| (p.name.to_lowercase(), p.ranking))
                .collect(),
        }
    }

    pub fn ranking_for(&self, sport: &str) -> Option<Ranking> {
        self.preferences.get(&sport.to_lowercase()).copied()
    }
}

impl ScoringStrategy for ProfileBasedStrategy {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn score(&self, candidate: &CandidateEvent) -> f64 {
        match self.ranking_for(&candidate.sport) {
            Some(ranking) => level_proximity(
                f64::from(ranking.level()),
                f64::from(candidate.level.level()),
            ),
            None => 0.0,
        }
    }
}

/// Strategy chosen by the selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    History(HistoryBasedStrategy),
    Profile(ProfileBasedStrategy),
}

impl ScoringStrategy for Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::History(s) => s.name(),
            Strategy::Profile(s) => s.name(),
        }
    }

    fn score(&self, candidate: &CandidateEvent) -> f64 {
        match self {
            Strategy::History(s) => s.score(candidate),
            Strategy::Profile(s) => s.score(candidate),
        }
    }
}
