//! End-to-end tests for the Marshal coordinator.
//!
//! These run whole turns: coordinator loop → specialist delegation → leaf
//! capabilities → store. The completion service is a scripted provider that
//! decides its reply from the request it receives, standing in for a model
//! that follows its instructions.

use std::sync::{Arc, Mutex};

use marshal_agent::{build_coordinator, AgentFactory, AgentSettings, Backends, Coordinator, TurnError};
use marshal_config::AppConfig;
use marshal_core::error::{ProviderError, ToolError};
use marshal_core::message::{Message, MessageToolCall, Role, SessionId};
use marshal_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use marshal_core::store::ConversationStore;
use marshal_store::{InMemoryStore, SqliteStore};
use chrono::{Duration, Utc};
use marshal_tools::{CalendarEvent, LocalCalendar, LocalMailbox, SearchBackend, SearchHit};

// ── Scripted Provider ───────────────────────────────────────────────────

type Script = dyn Fn(&ProviderRequest) -> Result<ProviderResponse, ProviderError> + Send + Sync;

/// A provider whose reply is a function of the request. Records requests.
struct ScriptedProvider {
    script: Box<Script>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(
        script: impl Fn(&ProviderRequest) -> Result<ProviderResponse, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests made by the agent whose instruction starts with `prefix`.
    fn requests_from(&self, prefix: &str) -> Vec<ProviderRequest> {
        self.requests()
            .into_iter()
            .filter(|r| instruction(r).starts_with(prefix))
            .collect()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.script)(&request)
    }
}

fn instruction(request: &ProviderRequest) -> &str {
    request
        .messages
        .first()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

fn is_coordinator(request: &ProviderRequest) -> bool {
    instruction(request).starts_with("Current time:")
}

/// Content of the last message if it is a capability result.
fn last_result(request: &ProviderRequest) -> Option<&str> {
    request
        .messages
        .last()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
}

fn last_user(request: &ProviderRequest) -> &str {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

fn text(content: &str) -> Result<ProviderResponse, ProviderError> {
    Ok(ProviderResponse {
        message: Message::assistant(content),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "e2e-model".into(),
    })
}

fn call(name: &str, args: serde_json::Value) -> Result<ProviderResponse, ProviderError> {
    Ok(ProviderResponse {
        message: Message::assistant_with_calls(
            "",
            vec![MessageToolCall {
                id: format!("call_{name}"),
                name: name.to_string(),
                arguments: args.to_string(),
            }],
        ),
        usage: None,
        model: "e2e-model".into(),
    })
}

struct CannedSearch;

#[async_trait::async_trait]
impl SearchBackend for CannedSearch {
    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        if query.contains("Liverpool") {
            Ok(vec![SearchHit {
                title: "Liverpool fixtures".into(),
                url: "https://example.com/fixtures".into(),
                content: "Liverpool vs Arsenal, Anfield, 2030-03-02 15:00 UTC.".into(),
            }])
        } else {
            Ok(vec![])
        }
    }
}

fn coordinator_with(
    provider: Arc<ScriptedProvider>,
    backends: &Backends,
    store: Arc<dyn ConversationStore>,
) -> Coordinator {
    let factory = AgentFactory::new(provider, AgentSettings::default());
    build_coordinator(&factory, backends, &AppConfig::default(), store).unwrap()
}

// ── E2E: Calendar ───────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_calendar_event_is_created_through_specialist() {
    let calendar = Arc::new(LocalCalendar::new());
    let backends = Backends {
        calendar: Some(calendar.clone()),
        ..Backends::default()
    };

    let provider = Arc::new(ScriptedProvider::new(|request| {
        if is_coordinator(request) {
            return match last_result(request) {
                None => call(
                    "calendar_specialist",
                    serde_json::json!({
                        "query": "Create an event 'Dentist appointment' from 2030-01-02T10:00:00Z to 2030-01-02T11:00:00Z"
                    }),
                ),
                Some(result) => text(&format!("All set. {result}")),
            };
        }
        match last_result(request) {
            None => call(
                "create_calendar_event",
                serde_json::json!({
                    "summary": "Dentist appointment",
                    "start_time": "2030-01-02T10:00:00Z",
                    "end_time": "2030-01-02T11:00:00Z"
                }),
            ),
            Some(result) => text(result),
        }
    }));

    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator_with(provider.clone(), &backends, store.clone());
    let session = SessionId::from("calendar");

    let answer = coordinator
        .handle_turn(&session, "Book the dentist for 10am on 2 January 2030, one hour.")
        .await
        .unwrap();
    assert!(answer.starts_with("All set. Event created: "));

    let events = calendar.all().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "Dentist appointment");
    assert_eq!(events[0].start.to_rfc3339(), "2030-01-02T10:00:00+00:00");

    // The specialist saw its own instruction and the query, nothing else.
    let specialist = provider.requests_from("You are the Calendar Specialist.");
    assert_eq!(specialist.len(), 2);
    assert_eq!(specialist[0].messages.len(), 2);
    assert!(last_user(&specialist[0]).contains("Dentist appointment"));

    // Only the user message and the answer were persisted.
    let history = store.list(&session).await.unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn e2e_calendar_today_is_listed_through_specialist() {
    let soon = |id: &str, summary: &str, hours: i64| {
        let start = Utc::now() + Duration::hours(hours);
        CalendarEvent {
            id: id.into(),
            summary: summary.into(),
            start,
            end: start + Duration::minutes(30),
            link: None,
        }
    };
    let calendar = Arc::new(LocalCalendar::with_events(vec![
        soon("evt-standup", "Team standup", 3),
        soon("evt-dentist", "Dentist", 1),
    ]));
    let backends = Backends {
        calendar: Some(calendar),
        ..Backends::default()
    };

    let provider = Arc::new(ScriptedProvider::new(|request| {
        if is_coordinator(request) {
            return match last_result(request) {
                None => call(
                    "calendar_specialist",
                    serde_json::json!({"query": "List the user's upcoming calendar events for today."}),
                ),
                Some(result) => text(result),
            };
        }
        match last_result(request) {
            None => call("list_upcoming_events", serde_json::json!({"limit": 10})),
            Some(result) => text(&format!("Here is your schedule:\n{result}")),
        }
    }));

    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator_with(provider.clone(), &backends, store.clone());
    let session = SessionId::from("today");

    let answer = coordinator
        .handle_turn(&session, "What's on my calendar today?")
        .await
        .unwrap();

    let lines: Vec<&str> = answer.lines().collect();
    assert_eq!(lines[0], "Here is your schedule:");
    assert!(lines[1].starts_with("ID: evt-dentist | "));
    assert!(lines[1].ends_with(": Dentist"));
    assert!(lines[2].starts_with("ID: evt-standup | "));
    assert!(lines[2].ends_with(": Team standup"));

    // The specialist ran the listing capability on a standalone query.
    let specialist = provider.requests_from("You are the Calendar Specialist.");
    assert_eq!(specialist.len(), 2);
    assert_eq!(last_user(&specialist[0]), "List the user's upcoming calendar events for today.");
    let listing = specialist[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
        .unwrap();
    assert_eq!(listing.tool_calls[0].name, "list_upcoming_events");

    let history = store.list(&session).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, answer);
}

// ── E2E: Follow-up contextualization ────────────────────────────────────

#[tokio::test]
async fn e2e_when_was_that_names_the_match() {
    let backends = Backends {
        search: Some(Arc::new(CannedSearch)),
        ..Backends::default()
    };

    let provider = Arc::new(ScriptedProvider::new(|request| {
        if is_coordinator(request) {
            if let Some(result) = last_result(request) {
                return text(result);
            }
            let user = last_user(request);
            if user.contains("Liverpool") {
                return text("Yes, the Liverpool match against Arsenal was a great game.");
            }
            // Resolve "that" from the conversation before delegating.
            let established = request
                .messages
                .iter()
                .any(|m| m.role == Role::Assistant && m.content.contains("Liverpool match"));
            let query = if established {
                "When was the Liverpool match against Arsenal played?".to_string()
            } else {
                user.to_string()
            };
            return call("research_specialist", serde_json::json!({"query": query}));
        }
        match last_result(request) {
            None => call("web_search", serde_json::json!({"query": last_user(request)})),
            Some(result) => text(result),
        }
    }));

    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator_with(provider.clone(), &backends, store.clone());
    let session = SessionId::from("match");

    coordinator
        .handle_turn(&session, "Did you catch the Liverpool match against Arsenal?")
        .await
        .unwrap();
    assert!(provider.requests_from("You are the Research Specialist.").is_empty());

    let answer = coordinator.handle_turn(&session, "When was that?").await.unwrap();
    assert!(answer.contains("2030-03-02"));

    let research = provider.requests_from("You are the Research Specialist.");
    let query = last_user(&research[0]);
    assert!(query.contains("Liverpool match"));
    assert_ne!(query, "When was that?");
    assert_eq!(research[0].messages.len(), 2);
    assert_eq!(store.list(&session).await.unwrap().len(), 4);
}

#[tokio::test]
async fn e2e_follow_up_reaches_specialist_self_contained() {
    let calendar = Arc::new(LocalCalendar::new());
    let backends = Backends {
        search: Some(Arc::new(CannedSearch)),
        calendar: Some(calendar.clone()),
        ..Backends::default()
    };

    let provider = Arc::new(ScriptedProvider::new(|request| {
        if is_coordinator(request) {
            if let Some(result) = last_result(request) {
                return text(result);
            }
            let user = last_user(request);
            if user.contains("Liverpool") {
                return call(
                    "research_specialist",
                    serde_json::json!({"query": "When is Liverpool FC's next match?"}),
                );
            }
            // "that match": resolve it from the conversation, as instructed.
            let fixture = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && m.content.contains("Liverpool vs Arsenal"))
                .map(|_| "Liverpool vs Arsenal");
            return match fixture {
                Some(fixture) => call(
                    "calendar_specialist",
                    serde_json::json!({
                        "query": format!(
                            "Create an event '{fixture}' from 2030-03-02T15:00:00Z to 2030-03-02T17:00:00Z"
                        )
                    }),
                ),
                None => text("Which match do you mean?"),
            };
        }

        let own = instruction(request);
        match (last_result(request), own) {
            (None, i) if i.starts_with("You are the Research Specialist.") => {
                call("web_search", serde_json::json!({"query": last_user(request)}))
            }
            (None, _) => {
                let query = last_user(request);
                let summary = query.split('\'').nth(1).unwrap_or("Untitled");
                call(
                    "create_calendar_event",
                    serde_json::json!({
                        "summary": summary,
                        "start_time": "2030-03-02T15:00:00Z",
                        "end_time": "2030-03-02T17:00:00Z"
                    }),
                )
            }
            (Some(result), _) => text(result),
        }
    }));

    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator_with(provider.clone(), &backends, store.clone());
    let session = SessionId::from("football");

    let first = coordinator
        .handle_turn(&session, "When do Liverpool play next?")
        .await
        .unwrap();
    assert!(first.contains("Liverpool vs Arsenal"));

    coordinator
        .handle_turn(&session, "Put that match in my calendar.")
        .await
        .unwrap();

    // The coordinator was told to make delegated queries self-contained.
    let coordinator_requests: Vec<ProviderRequest> =
        provider.requests().into_iter().filter(is_coordinator).collect();
    assert!(instruction(&coordinator_requests[0]).contains("Replace pronouns"));

    // The follow-up turn ran over the stored history.
    let follow_up = coordinator_requests
        .iter()
        .find(|r| last_user(r) == "Put that match in my calendar.")
        .unwrap();
    assert!(follow_up.messages.iter().any(|m| m.content.contains("Liverpool vs Arsenal")));

    // The calendar specialist got a standalone query naming the fixture.
    let calendar_requests = provider.requests_from("You are the Calendar Specialist.");
    let query = last_user(&calendar_requests[0]);
    assert!(query.contains("Liverpool vs Arsenal"));
    assert!(!query.contains("that match"));
    assert_eq!(calendar_requests[0].messages.len(), 2);

    let events = calendar.all().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "Liverpool vs Arsenal");
    assert_eq!(store.list(&session).await.unwrap().len(), 4);
}

// ── E2E: Failure handling ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_specialist_failure_is_reported_not_raised() {
    let mailbox = Arc::new(LocalMailbox::new());
    let backends = Backends {
        mail: Some(mailbox.clone()),
        ..Backends::default()
    };

    let provider = Arc::new(ScriptedProvider::new(|request| {
        if !is_coordinator(request) {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: "specialist backend down".into(),
            });
        }
        match last_result(request) {
            None => call(
                "communication_specialist",
                serde_json::json!({"query": "Send ana@example.com an email saying the report is ready"}),
            ),
            Some(result) if result.starts_with("Error [capability_execution_error]") => {
                text("Sorry, I couldn't send that email right now.")
            }
            Some(result) => text(result),
        }
    }));

    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator_with(provider, &backends, store.clone());
    let session = SessionId::from("mail");

    let answer = coordinator.handle_turn(&session, "Tell Ana the report is ready").await.unwrap();
    assert_eq!(answer, "Sorry, I couldn't send that email right now.");
    assert!(mailbox.sent().await.is_empty());
    assert_eq!(store.list(&session).await.unwrap().len(), 2);
}

#[tokio::test]
async fn e2e_completion_failure_persists_nothing() {
    let provider = Arc::new(ScriptedProvider::new(|_| {
        Err(ProviderError::RateLimited { retry_after_secs: 30 })
    }));
    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator_with(provider, &Backends::default(), store.clone());
    let session = SessionId::from("limited");

    let err = coordinator.handle_turn(&session, "Hello?").await.unwrap_err();
    assert!(matches!(err, TurnError::Agent(_)));
    assert!(store.list(&session).await.unwrap().is_empty());
    assert!(store.list_sessions().await.unwrap().is_empty());
}

// ── E2E: Durable sessions ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_sessions_survive_restart_and_can_be_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db").to_string_lossy().into_owned();

    let provider = Arc::new(ScriptedProvider::new(|request| {
        text(&format!("You said: {}", last_user(request)))
    }));

    {
        let store = Arc::new(SqliteStore::new(&path).await.unwrap());
        let coordinator = coordinator_with(provider.clone(), &Backends::default(), store);
        coordinator.handle_turn(&SessionId::from("a"), "first session").await.unwrap();
        coordinator.handle_turn(&SessionId::from("b"), "second session").await.unwrap();
    }

    let store = Arc::new(SqliteStore::new(&path).await.unwrap());
    let coordinator = coordinator_with(provider, &Backends::default(), store);

    let sessions = coordinator.sessions().await.unwrap();
    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(sessions[0].title, "You said: second session");

    let history = coordinator.history(&SessionId::from("a")).await.unwrap();
    assert_eq!(history[0].content, "first session");
    assert_eq!(history[1].content, "You said: first session");

    assert!(coordinator.delete_session(&SessionId::from("a")).await.unwrap());
    assert!(coordinator.history(&SessionId::from("a")).await.unwrap().is_empty());
    assert_eq!(coordinator.sessions().await.unwrap().len(), 1);
}
