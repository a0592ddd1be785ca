//! Calendar capabilities: `list_upcoming_events` and `create_calendar_event`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use marshal_core::error::ToolError;
use marshal_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::required_str;

const DEFAULT_LIMIT: usize = 10;

/// A calendar entry as the tools see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl CalendarEvent {
    fn listing_line(&self) -> String {
        format!(
            "ID: {} | {}: {}",
            self.id,
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.summary
        )
    }
}

/// Calendar storage behind the calendar tools.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Events starting from now, soonest first.
    async fn list_upcoming(&self, limit: usize) -> Result<Vec<CalendarEvent>, ToolError>;

    async fn create(
        &self,
        summary: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CalendarEvent, ToolError>;
}

/// Parse an ISO-8601 timestamp. Offsets are honoured; naive times are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

// --- Tools ---

pub struct ListUpcomingEventsTool {
    backend: Arc<dyn CalendarBackend>,
}

impl ListUpcomingEventsTool {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ListUpcomingEventsTool {
    fn name(&self) -> &str {
        "list_upcoming_events"
    }

    fn description(&self) -> &str {
        "Get the next events from the user's primary calendar. Returns IDs, start times and titles."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of events (default 10)",
                    "minimum": 1,
                    "maximum": 50
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let limit = arguments["limit"].as_u64().map_or(DEFAULT_LIMIT, |n| n as usize);
        let events = self.backend.list_upcoming(limit).await?;
        debug!(count = events.len(), "Listed upcoming events");

        if events.is_empty() {
            return Ok(ToolResult::ok("No upcoming events found."));
        }

        let output = events
            .iter()
            .map(CalendarEvent::listing_line)
            .collect::<Vec<_>>()
            .join("\n");
        let data = serde_json::to_value(&events).unwrap_or_default();
        Ok(ToolResult::with_data(output, data))
    }
}

pub struct CreateCalendarEventTool {
    backend: Arc<dyn CalendarBackend>,
}

impl CreateCalendarEventTool {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for CreateCalendarEventTool {
    fn name(&self) -> &str {
        "create_calendar_event"
    }

    fn description(&self) -> &str {
        "Create a new calendar event. Times are ISO-8601 (YYYY-MM-DDTHH:MM:SS), UTC unless an offset is given."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Title of the event",
                    "minLength": 1
                },
                "start_time": {
                    "type": "string",
                    "description": "Start time in ISO format"
                },
                "end_time": {
                    "type": "string",
                    "description": "End time in ISO format"
                }
            },
            "required": ["summary", "start_time", "end_time"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let summary = required_str(&arguments, "summary")?;
        let start_raw = required_str(&arguments, "start_time")?;
        let end_raw = required_str(&arguments, "end_time")?;

        let start = parse_timestamp(start_raw)
            .ok_or_else(|| ToolError::InvalidArguments(format!("start_time '{start_raw}' is not ISO-8601")))?;
        let end = parse_timestamp(end_raw)
            .ok_or_else(|| ToolError::InvalidArguments(format!("end_time '{end_raw}' is not ISO-8601")))?;

        if end <= start {
            return Err(ToolError::InvalidArguments(
                "end_time must be after start_time".into(),
            ));
        }

        let event = self.backend.create(summary, start, end).await?;
        info!(event_id = %event.id, summary, "Calendar event created");

        let reference = event.link.clone().unwrap_or_else(|| event.id.clone());
        let data = serde_json::to_value(&event).unwrap_or_default();
        Ok(ToolResult::with_data(format!("Event created: {reference}"), data))
    }
}

// --- Backends ---

/// An in-process calendar. Used when no Google credentials are configured
/// and by tests.
#[derive(Default)]
pub struct LocalCalendar {
    events: RwLock<Vec<CalendarEvent>>,
}

impl LocalCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    /// Every stored event, including past ones.
    pub async fn all(&self) -> Vec<CalendarEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl CalendarBackend for LocalCalendar {
    async fn list_upcoming(&self, limit: usize) -> Result<Vec<CalendarEvent>, ToolError> {
        let now = Utc::now();
        let mut upcoming: Vec<CalendarEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.end > now)
            .cloned()
            .collect();
        upcoming.sort_by_key(|e| e.start);
        upcoming.truncate(limit);
        Ok(upcoming)
    }

    async fn create(
        &self,
        summary: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CalendarEvent, ToolError> {
        let event = CalendarEvent {
            id: Uuid::new_v4().simple().to_string(),
            summary: summary.to_string(),
            start,
            end,
            link: None,
        };
        self.events.write().await.push(event.clone());
        Ok(event)
    }
}

/// Google Calendar v3, primary calendar, bearer-token auth.
pub struct GoogleCalendarBackend {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleCalendarBackend {
    pub fn new(access_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            access_token: access_token.into(),
            base_url: "https://www.googleapis.com/calendar/v3".into(),
            client,
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/primary/events", self.base_url)
    }

    fn failed(reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "calendar".into(),
            reason,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ToolError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::failed(format!("Calendar API returned {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| Self::failed(format!("Unreadable calendar response: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct GoogleEventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: GoogleEventTime,
    end: GoogleEventTime,
    #[serde(default)]
    html_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventTime {
    #[serde(default)]
    date_time: Option<String>,
    // All-day events carry only a date.
    #[serde(default)]
    date: Option<String>,
}

impl GoogleEventTime {
    fn resolve(&self) -> Option<DateTime<Utc>> {
        if let Some(dt) = self.date_time.as_deref().and_then(parse_timestamp) {
            return Some(dt);
        }
        self.date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

impl GoogleEvent {
    fn into_event(self) -> Option<CalendarEvent> {
        Some(CalendarEvent {
            start: self.start.resolve()?,
            end: self.end.resolve()?,
            id: self.id,
            summary: self.summary.unwrap_or_else(|| "(no title)".into()),
            link: self.html_link,
        })
    }
}

#[async_trait]
impl CalendarBackend for GoogleCalendarBackend {
    async fn list_upcoming(&self, limit: usize) -> Result<Vec<CalendarEvent>, ToolError> {
        let time_min = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = limit.to_string();
        let response = self
            .client
            .get(self.events_url())
            .bearer_auth(&self.access_token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("maxResults", max_results.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ])
            .send()
            .await
            .map_err(|e| Self::failed(format!("Calendar request failed: {e}")))?;

        let list: GoogleEventList = Self::read_json(response).await?;
        Ok(list.items.into_iter().filter_map(GoogleEvent::into_event).collect())
    }

    async fn create(
        &self,
        summary: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CalendarEvent, ToolError> {
        let body = serde_json::json!({
            "summary": summary,
            "start": { "dateTime": start.to_rfc3339_opts(SecondsFormat::Secs, true), "timeZone": "UTC" },
            "end": { "dateTime": end.to_rfc3339_opts(SecondsFormat::Secs, true), "timeZone": "UTC" },
        });

        let response = self
            .client
            .post(self.events_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::failed(format!("Calendar request failed: {e}")))?;

        let created: GoogleEvent = Self::read_json(response).await?;
        created
            .into_event()
            .ok_or_else(|| Self::failed("Created event has no usable start/end".into()))
    }
}
