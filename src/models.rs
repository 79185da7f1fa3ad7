use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// Schedule models
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::schedules)]
pub struct Schedule {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::schedules)]
pub struct NewSchedule<'a> {
    pub owner_id: i32,
    pub name: &'a str,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::schedule_screens)]
pub struct NewScheduleScreen {
    pub schedule_id: i32,
    pub screen_id: i32,
}

// Playlist models
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::playlists)]
pub struct Playlist {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::playlists)]
pub struct NewPlaylist<'a> {
    pub owner_id: i32,
    pub name: &'a str,
}

// Screen models
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::screens)]
pub struct Screen {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub playlist_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::screens)]
pub struct NewScreen<'a> {
    pub owner_id: i32,
    pub name: &'a str,
    pub secret_key: &'a str,
}

/// How a window repeats. Stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }

    /// Exact distance between consecutive starts, for rules that have one.
    pub fn fixed_period(&self) -> Option<Duration> {
        match self {
            Recurrence::Daily => Some(Duration::days(1)),
            Recurrence::Weekly => Some(Duration::weeks(1)),
            Recurrence::None | Recurrence::Monthly => None,
        }
    }

    /// Shortest distance between consecutive starts. February bounds the monthly case.
    pub fn min_period(&self) -> Option<Duration> {
        match self {
            Recurrence::Monthly => Some(Duration::days(28)),
            other => other.fixed_period(),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Recurrence::None),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            other => Err(format!(
                "unknown recurrence '{}', expected one of none, daily, weekly, monthly",
                other
            )),
        }
    }
}

// Schedule Window models
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::schedule_windows)]
pub struct ScheduleWindowRow {
    pub id: i32,
    pub schedule_id: i32,
    pub playlist_id: i32,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub recurrence: String,
    pub recur_until: Option<NaiveDateTime>,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::schedule_windows)]
pub struct NewScheduleWindowRow {
    pub schedule_id: i32,
    pub playlist_id: i32,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub recurrence: &'static str,
    pub recur_until: Option<NaiveDateTime>,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::schedule_window_exceptions)]
pub struct NewWindowException {
    pub window_id: i32,
    pub occurrence_start: NaiveDateTime,
}

/// A (possibly recurring) time range bound to one playlist within a schedule.
///
/// `exceptions` holds the starts of suppressed occurrences; stores fill it
/// whenever they hand a window out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub id: i32,
    pub schedule_id: i32,
    pub playlist_id: i32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub recurrence: Recurrence,
    pub recur_until: Option<NaiveDateTime>,
    pub priority: i32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exceptions: BTreeSet<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl ScheduleWindow {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Fails with the parse message when the stored recurrence tag is unknown.
    pub fn from_row(
        row: ScheduleWindowRow,
        exceptions: BTreeSet<NaiveDateTime>,
    ) -> Result<Self, String> {
        let recurrence: Recurrence = row.recurrence.parse()?;
        Ok(ScheduleWindow {
            id: row.id,
            schedule_id: row.schedule_id,
            playlist_id: row.playlist_id,
            start: row.starts_at,
            end: row.ends_at,
            recurrence,
            recur_until: row.recur_until,
            priority: row.priority,
            enabled: row.enabled,
            exceptions,
            created_at: row.created_at,
        })
    }
}

/// Input for window creation, validated before it reaches a store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWindow {
    pub schedule_id: i32,
    pub playlist_id: i32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub recurrence: Recurrence,
    pub recur_until: Option<NaiveDateTime>,
    pub priority: i32,
    pub enabled: bool,
}

impl NewWindow {
    pub fn to_row(&self) -> NewScheduleWindowRow {
        NewScheduleWindowRow {
            schedule_id: self.schedule_id,
            playlist_id: self.playlist_id,
            starts_at: self.start,
            ends_at: self.end,
            recurrence: self.recurrence.as_str(),
            recur_until: self.recur_until,
            priority: self.priority,
            enabled: self.enabled,
        }
    }

    pub fn into_window(self, id: i32, created_at: NaiveDateTime) -> ScheduleWindow {
        ScheduleWindow {
            id,
            schedule_id: self.schedule_id,
            playlist_id: self.playlist_id,
            start: self.start,
            end: self.end,
            recurrence: self.recurrence,
            recur_until: self.recur_until,
            priority: self.priority,
            enabled: self.enabled,
            exceptions: BTreeSet::new(),
            created_at,
        }
    }
}

/// One concrete, dated instance of a window. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub window_id: i32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub playlist_id: i32,
    pub priority: i32,
    pub recurring: bool,
}

impl Occurrence {
    /// Half-open containment: `start <= at < end`.
    pub fn is_active_at(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at < self.end
    }
}
