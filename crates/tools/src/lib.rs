//! Leaf capabilities for Marshal.
//!
//! Each capability is a [`Tool`](marshal_core::Tool) over a small backend
//! trait, so the same tool runs against a real HTTP service or a local
//! in-process stand-in:
//!
//! | Tool | Backend trait | Backends |
//! |------|---------------|----------|
//! | `web_search` | [`SearchBackend`] | [`TavilySearch`] |
//! | `list_upcoming_events`, `create_calendar_event` | [`CalendarBackend`] | [`GoogleCalendarBackend`], [`LocalCalendar`] |
//! | `send_email`, `read_emails` | [`MailBackend`] | [`GmailBackend`], [`LocalMailbox`] |
//! | `knowledge_base_query` | [`KnowledgeStore`] | [`FileKnowledgeStore`] |

pub mod calendar;
pub mod knowledge;
pub mod messaging;
pub mod search;

use marshal_core::error::ToolError;

pub use calendar::{
    CalendarBackend, CalendarEvent, CreateCalendarEventTool, GoogleCalendarBackend,
    ListUpcomingEventsTool, LocalCalendar,
};
pub use knowledge::{Document, FileKnowledgeStore, KnowledgeBaseQueryTool, KnowledgeStore, Passage};
pub use messaging::{GmailBackend, LocalMailbox, MailBackend, MailSummary, OutgoingMail, ReadEmailsTool, SendEmailTool};
pub use search::{SearchBackend, SearchHit, TavilySearch, WebSearchTool};

/// A required string argument, or `InvalidArguments`.
pub(crate) fn required_str<'a>(arguments: &'a serde_json::Value, name: &str) -> Result<&'a str, ToolError> {
    arguments[name]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{name}' argument")))
}
