//! Context resolution: one backend round trip per turn.
//!
//! The profile gateway returns a loosely structured bundle (user, profile
//! survey, dialog history, trigger flags). The resolver flattens it into a
//! `ResolvedContext` the rest of the turn can consume: history lines ready
//! for the prompt, the latest training snapshot, and telegram routing for
//! the client's club.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::ClubDirectory;
use crate::state::TriggerFlags;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClubRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default, rename = "firstName")]
    pub first_name: String,
    #[serde(default, rename = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub club: Option<ClubRef>,
}

impl UserInfo {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();
        if name.is_empty() {
            "Unknown".to_string()
        } else {
            name
        }
    }

    pub fn club_name(&self) -> &str {
        self.club.as_ref().map(|c| c.name.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartRateData {
    #[serde(default)]
    pub max_hr: Option<f64>,
    #[serde(default)]
    pub average_hr: Option<f64>,
    #[serde(default)]
    pub calories: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRating {
    #[serde(default, rename = "ratingByEvent")]
    pub rating_by_event: Option<f64>,
    #[serde(default, rename = "ratingByTrainer")]
    pub rating_by_trainer: Option<f64>,
    #[serde(default, rename = "commentByEvent")]
    pub comment_by_event: Option<String>,
}

/// Training snapshot attached to automated dialog messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingData {
    #[serde(default, rename = "eventName")]
    pub event_name: Option<String>,
    #[serde(default, rename = "hasCheckedIn")]
    pub has_checked_in: Option<bool>,
    #[serde(default, rename = "heartRateData")]
    pub heart_rate: Option<HeartRateData>,
    #[serde(default, rename = "eventRating")]
    pub event_rating: Option<EventRating>,
    #[serde(default, rename = "trainingCount")]
    pub training_count: Option<u32>,
    #[serde(default, rename = "totalCalories")]
    pub total_calories: Option<f64>,
    #[serde(default, rename = "avgRatingByEvent")]
    pub avg_rating_by_event: Option<f64>,
    #[serde(default, rename = "totalWeight")]
    pub total_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DialogEntry {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, rename = "trainingData")]
    pub training_data: Option<TrainingData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub dialog: Vec<DialogEntry>,
}

/// Raw per-client bundle as the profile gateway returns it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileBundle {
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user: UserInfo,
    #[serde(default, rename = "userProfile")]
    pub user_profile: serde_json::Value,
    #[serde(default)]
    pub queries: Vec<QueryEntry>,
    #[serde(default)]
    pub triggers: TriggerFlags,
}

/// Profile gateway seam. `None` means the client is unknown to the backend.
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn fetch(&self, sender_id: &str) -> Result<Option<ProfileBundle>>;
}

/// Flattened turn context.
#[derive(Debug, Clone, Default)]
pub struct ResolvedContext {
    pub user_id: Option<String>,
    pub query_id: Option<String>,
    pub user: UserInfo,
    pub profile: serde_json::Value,
    /// Dialog lines formatted `sender (timestamp): text`, oldest first.
    pub history: Vec<String>,
    /// Latest training snapshot from automated messages.
    pub training: TrainingData,
    pub flags: TriggerFlags,
    pub club_id: Option<String>,
    pub club_manager_tg: Option<i64>,
    pub club_tg_chat: Option<i64>,
}

pub struct ContextResolver {
    profile: Arc<dyn ProfileService>,
    clubs: ClubDirectory,
}

impl ContextResolver {
    pub fn new(profile: Arc<dyn ProfileService>, clubs: ClubDirectory) -> Self {
        Self { profile, clubs }
    }

    pub async fn resolve(&self, sender_id: &str) -> Result<Option<ResolvedContext>> {
        let bundle = match self.profile.fetch(sender_id).await? {
            Some(bundle) => bundle,
            None => return Ok(None),
        };
        Ok(Some(flatten(bundle, &self.clubs)))
    }
}

fn flatten(bundle: ProfileBundle, clubs: &ClubDirectory) -> ResolvedContext {
    let current_query = bundle.queries.last();

    let history = current_query
        .map(|q| {
            q.dialog
                .iter()
                .map(|m| format!("{} ({}): {}", m.sender, m.created_at, m.text))
                .collect()
        })
        .unwrap_or_default();

    // The most recent automated message carries the training snapshot.
    let training = current_query
        .and_then(|q| {
            q.dialog
                .iter()
                .rev()
                .find(|m| m.sender == "auto" && m.training_data.is_some())
        })
        .and_then(|m| m.training_data.clone())
        .unwrap_or_default();

    let club_id = bundle
        .user
        .club
        .as_ref()
        .map(|c| c.id.clone())
        .filter(|id| !id.is_empty());

    let club_entry = club_id.as_deref().and_then(|id| clubs.get(id));

    ResolvedContext {
        user_id: bundle.user_id,
        query_id: current_query.and_then(|q| q.id.clone()),
        user: bundle.user,
        profile: bundle.user_profile,
        history,
        training,
        flags: bundle.triggers,
        club_id,
        club_manager_tg: club_entry.and_then(|c| c.manager_tg),
        club_tg_chat: club_entry.and_then(|c| c.tg_chat),
    }
}
