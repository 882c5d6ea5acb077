//! Club schedule lookup tool.
//!
//! Fetches the current week of events for one club and filters them by
//! training type, period, weekday and time of day. All date math happens in
//! the studio's local time (Almaty, UTC+5); the backend speaks UTC. Output
//! is a grouped, Russian-formatted schedule ready to show the client.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Tool, ToolContext, ToolOutput};
use crate::config::ClubDirectory;

/// Almaty is UTC+5 year-round.
pub const LOCAL_UTC_OFFSET_HOURS: i64 = 5;

/// One scheduled training event, as the backend reports it.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub status: String,
}

/// Backend seam for the schedule query.
#[async_trait]
pub trait ScheduleService: Send + Sync {
    async fn events_between(
        &self,
        club_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScheduledEvent>>;
}

// Training type filter: key the model passes, program-name keywords, Russian label.
const TRAINING_TYPES: &[(&str, &[&str], &str)] = &[
    ("strength", &["RT"], "силовые"),
    ("bootcamp", &["Bootcamp"], "Bootcamp"),
    ("reshape", &["Reshape"], "Reshape"),
    ("assessment", &["Assessment"], "Assessment"),
    ("stretching", &["Stretching"], "растяжка"),
    ("upper", &["Upper"], "Upper"),
    ("legs", &["Legs"], "Legs"),
    ("glute", &["Glute"], "Glute"),
    ("pull", &["Pull"], "Pull"),
    ("push", &["Push"], "Push"),
    ("arm", &["Arm"], "Arm"),
];

const WEEKDAYS: &[(&str, u32, &str)] = &[
    ("monday", 0, "понедельник"),
    ("tuesday", 1, "вторник"),
    ("wednesday", 2, "среда"),
    ("thursday", 3, "четверг"),
    ("friday", 4, "пятница"),
    ("saturday", 5, "суббота"),
    ("sunday", 6, "воскресенье"),
];

// Time-of-day bands on the local start hour: [start, end).
const TIME_BANDS: &[(&str, u32, u32, &str)] = &[
    ("morning", 6, 12, "утро"),
    ("afternoon", 12, 18, "день"),
    ("evening", 18, 23, "вечер"),
];

const WEEKDAY_LABELS: [&str; 7] = [
    "понедельник",
    "вторник",
    "среда",
    "четверг",
    "пятница",
    "суббота",
    "воскресенье",
];

const MONTHS_RU: [&str; 12] = [
    "января",
    "февраля",
    "марта",
    "апреля",
    "мая",
    "июня",
    "июля",
    "августа",
    "сентября",
    "октября",
    "ноября",
    "декабря",
];

#[derive(Debug, Default, Deserialize)]
struct ScheduleParams {
    #[serde(default)]
    club_id: Option<String>,
    #[serde(default)]
    training_type: Option<String>,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    day_of_week: Option<String>,
    #[serde(default)]
    preferred_time: Option<String>,
}

pub struct ScheduleTool {
    service: Arc<dyn ScheduleService>,
    clubs: ClubDirectory,
}

impl ScheduleTool {
    pub fn new(service: Arc<dyn ScheduleService>, clubs: ClubDirectory) -> Self {
        Self { service, clubs }
    }
}

#[async_trait]
impl Tool for ScheduleTool {
    fn name(&self) -> &str {
        "get_schedule_by_club"
    }

    fn description(&self) -> &str {
        "Получает расписание тренировок студии с фильтрацией. \
         club_id принимает ID клуба или название (Colibri/Колибри, Promenade/Променад, \
         Villa/Вилла, Europe City/Европа Сити, Nurly Orda/Нурлы Орда, 4YOU/4Ю). \
         training_type: strength (все силовые RT), bootcamp, reshape, assessment, \
         stretching, upper/legs/glute/pull/push/arm. \
         period: today/tomorrow/week. day_of_week: monday-sunday (приоритет выше period). \
         preferred_time: morning/afternoon/evening."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "club_id": {
                    "type": "string",
                    "description": "ID клуба или его название"
                },
                "training_type": {
                    "type": "string",
                    "enum": ["strength", "bootcamp", "reshape", "assessment", "stretching",
                             "upper", "legs", "glute", "pull", "push", "arm"],
                    "description": "Тип тренировки"
                },
                "period": {
                    "type": "string",
                    "enum": ["today", "tomorrow", "week"],
                    "description": "Период"
                },
                "day_of_week": {
                    "type": "string",
                    "enum": ["monday", "tuesday", "wednesday", "thursday", "friday",
                             "saturday", "sunday"],
                    "description": "День недели"
                },
                "preferred_time": {
                    "type": "string",
                    "enum": ["morning", "afternoon", "evening"],
                    "description": "Время суток"
                }
            },
            "required": ["club_id"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let params: ScheduleParams = serde_json::from_value(params).unwrap_or_default();

        let club_key = params
            .club_id
            .clone()
            .or_else(|| ctx.club_id.clone())
            .unwrap_or_default();

        let club = match self.clubs.resolve(&club_key) {
            Some(club) => club.clone(),
            None => {
                return Ok(ToolOutput::Text(format!(
                    "❌ Укажите клуб. Доступные: {}",
                    self.clubs.available_names()
                )));
            }
        };

        let now_local = to_local(Utc::now());
        let (week_start, week_end) = week_range_utc(now_local);

        let events = match self
            .service
            .events_between(&club.id, week_start, week_end)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Schedule fetch failed for club {}: {}", club.id, e);
                return Ok(ToolOutput::Text(format!(
                    "⚠️ Ошибка получения расписания: {}",
                    e
                )));
            }
        };

        if events.is_empty() {
            return Ok(ToolOutput::Text(format!(
                "📅 В {} нет запланированных тренировок.",
                club.name
            )));
        }

        let selected = filter_events(&events, now_local, &params);

        if selected.is_empty() {
            return Ok(ToolOutput::Text(format!(
                "📅 В {} {} нет подходящих тренировок. Попробуйте изменить фильтры.",
                club.name,
                filter_description(&params)
            )));
        }

        Ok(ToolOutput::Text(format_schedule(
            &selected, &club.name, &club.id, &params,
        )))
    }
}

/// Convert a backend UTC timestamp to naive studio-local time.
fn to_local(ts: DateTime<Utc>) -> NaiveDateTime {
    (ts + Duration::hours(LOCAL_UTC_OFFSET_HOURS)).naive_utc()
}

/// Monday 00:00 through Sunday 23:59:59 of the current local week, in UTC.
fn week_range_utc(now_local: NaiveDateTime) -> (DateTime<Utc>, DateTime<Utc>) {
    let days_since_monday = now_local.weekday().num_days_from_monday() as i64;
    let monday = (now_local.date() - Duration::days(days_since_monday))
        .and_hms_opt(0, 0, 0)
        .unwrap_or(now_local);
    let sunday_end = monday + Duration::days(6) + Duration::hours(23) + Duration::minutes(59)
        + Duration::seconds(59);

    let offset = Duration::hours(LOCAL_UTC_OFFSET_HOURS);
    (
        DateTime::from_naive_utc_and_offset(monday - offset, Utc),
        DateTime::from_naive_utc_and_offset(sunday_end - offset, Utc),
    )
}

fn weekday_index(name: &str) -> Option<u32> {
    WEEKDAYS
        .iter()
        .find(|(key, _, _)| *key == name)
        .map(|(_, idx, _)| *idx)
}

fn training_keywords(key: &str) -> Option<&'static [&'static str]> {
    TRAINING_TYPES
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, keywords, _)| *keywords)
}

fn filter_events<'a>(
    events: &'a [ScheduledEvent],
    now_local: NaiveDateTime,
    params: &ScheduleParams,
) -> Vec<&'a ScheduledEvent> {
    let mut selected: Vec<&ScheduledEvent> = events
        .iter()
        .filter(|e| e.status != "finished" && !e.name.contains("[TEST]"))
        .collect();

    // day_of_week takes priority over period
    let day = params
        .day_of_week
        .as_deref()
        .map(str::to_lowercase)
        .and_then(|d| weekday_index(&d));

    if let Some(target_day) = day {
        selected.retain(|e| {
            to_local(e.start_time).weekday().num_days_from_monday() == target_day
        });
    } else if params.period.as_deref() == Some("today") {
        let today = now_local.date();
        selected.retain(|e| to_local(e.start_time).date() == today);
    } else if params.period.as_deref() == Some("tomorrow") {
        let tomorrow = now_local.date() + Duration::days(1);
        selected.retain(|e| to_local(e.start_time).date() == tomorrow);
    }

    if let Some(keywords) = params
        .training_type
        .as_deref()
        .and_then(training_keywords)
    {
        selected.retain(|e| keywords.iter().any(|kw| e.name.contains(kw)));
    }

    if let Some((_, start, end, _)) = params
        .preferred_time
        .as_deref()
        .and_then(|t| TIME_BANDS.iter().find(|(key, _, _, _)| *key == t))
    {
        selected.retain(|e| {
            let hour = to_local(e.start_time).hour();
            *start <= hour && hour < *end
        });
    }

    selected
}

fn filter_description(params: &ScheduleParams) -> String {
    let mut parts = Vec::new();

    let day_label = params
        .day_of_week
        .as_deref()
        .map(str::to_lowercase)
        .and_then(|d| WEEKDAYS.iter().find(|(key, _, _)| *key == d))
        .map(|(_, _, label)| *label);

    if let Some(label) = day_label {
        parts.push(format!("на {}", label));
    } else {
        match params.period.as_deref() {
            Some("today") => parts.push("на сегодня".to_string()),
            Some("tomorrow") => parts.push("на завтра".to_string()),
            _ => parts.push("на неделю".to_string()),
        }
    }

    if let Some((_, _, label)) = params
        .training_type
        .as_deref()
        .and_then(|t| TRAINING_TYPES.iter().find(|(key, _, _)| *key == t))
    {
        parts.push(format!("| {}", label));
    }

    if let Some((_, _, _, label)) = params
        .preferred_time
        .as_deref()
        .and_then(|t| TIME_BANDS.iter().find(|(key, _, _, _)| *key == t))
    {
        parts.push(format!("| {}", label));
    }

    parts.join(" ")
}

fn format_schedule(
    trainings: &[&ScheduledEvent],
    club_name: &str,
    club_id: &str,
    params: &ScheduleParams,
) -> String {
    // Group by local date; BTreeMap keeps dates sorted.
    let mut by_date: BTreeMap<NaiveDate, Vec<&ScheduledEvent>> = BTreeMap::new();
    for event in trainings {
        by_date
            .entry(to_local(event.start_time).date())
            .or_default()
            .push(event);
    }

    let mut lines = vec![format!(
        "📅 {} {}:\n",
        club_name,
        filter_description(params)
    )];

    for (date, mut day_events) in by_date {
        day_events.sort_by_key(|e| e.start_time);

        lines.push(format!("\n📆 {}", format_date_ru(date)));
        for event in day_events {
            let local = to_local(event.start_time);
            lines.push(format!(
                "  🕐 {:02}:{:02} | {} [id:{}]",
                local.hour(),
                local.minute(),
                event.name,
                event.id
            ));
        }
    }

    lines.push(format!(
        "\n📋 Для записи: используй eventId из [id:...] и clubId: {}",
        club_id
    ));

    lines.join("\n")
}

fn format_date_ru(date: NaiveDate) -> String {
    let weekday = WEEKDAY_LABELS[date.weekday().num_days_from_monday() as usize];
    let month = MONTHS_RU[date.month0() as usize];
    format!("{}, {} {}", weekday, date.day(), month)
}
