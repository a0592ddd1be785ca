//! Building agents, specialists and the coordinator from configuration.

use std::sync::Arc;
use std::time::Duration;

use marshal_config::AppConfig;
use marshal_core::error::ToolError;
use marshal_core::event::EventBus;
use marshal_core::provider::Provider;
use marshal_core::store::ConversationStore;
use marshal_core::tool::{Tool, ToolRegistry};
use marshal_tools::{
    CalendarBackend, CreateCalendarEventTool, FileKnowledgeStore, GmailBackend, GoogleCalendarBackend,
    KnowledgeBaseQueryTool, KnowledgeStore, ListUpcomingEventsTool, LocalCalendar, LocalMailbox, MailBackend,
    ReadEmailsTool, SearchBackend, SendEmailTool, TavilySearch, WebSearchTool,
};
use tracing::{info, warn};

use crate::agent::{Agent, AgentSettings};
use crate::coordinator::Coordinator;
use crate::specialist::SpecialistTool;

/// Makes agents that share one provider and one set of loop settings.
#[derive(Clone)]
pub struct AgentFactory {
    provider: Arc<dyn Provider>,
    settings: AgentSettings,
    specialist_settings: AgentSettings,
    delegation_timeout: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
}

impl AgentFactory {
    pub fn new(provider: Arc<dyn Provider>, settings: AgentSettings) -> Self {
        Self {
            provider,
            specialist_settings: settings.clone(),
            settings,
            delegation_timeout: None,
            event_bus: None,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let settings = AgentSettings {
            model: marshal_providers::default_model(config),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_iterations: config.agent.max_iterations,
            completion_timeout: Duration::from_secs(config.agent.completion_timeout_secs),
            capability_timeout: Duration::from_secs(config.agent.capability_timeout_secs),
        };
        let specialist_settings = AgentSettings {
            max_iterations: config.agent.specialist_max_iterations,
            ..settings.clone()
        };

        Self {
            provider,
            settings,
            specialist_settings,
            delegation_timeout: Some(Duration::from_secs(config.agent.delegation_timeout_secs)),
            event_bus: None,
        }
    }

    pub fn with_specialist_settings(mut self, settings: AgentSettings) -> Self {
        self.specialist_settings = settings;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// A specialist agent instructed as "You are the {Name}. {prompt}".
    pub fn create_agent(
        &self,
        name: &str,
        prompt: &str,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<Agent, ToolError> {
        let instruction = format!("You are the {}. {}", display_name(name), prompt.trim());
        let agent = Agent::new(name, instruction, self.provider.clone(), registry(tools)?)
            .with_settings(self.specialist_settings.clone());
        Ok(self.attach_bus(agent))
    }

    /// A specialist wrapped so another agent can call it like any capability.
    pub fn create_agent_as_tool(
        &self,
        name: &str,
        prompt: &str,
        tools: Vec<Arc<dyn Tool>>,
        description: &str,
    ) -> Result<SpecialistTool, ToolError> {
        let agent = self.create_agent(name, prompt, tools)?;
        let tool = SpecialistTool::new(Arc::new(agent), description);
        Ok(match self.delegation_timeout {
            Some(timeout) => tool.with_timeout(timeout),
            None => tool,
        })
    }

    /// The top-level agent: `persona` verbatim, the coordinator's own settings.
    pub fn create_coordinator_agent(
        &self,
        name: &str,
        persona: &str,
        specialists: Vec<Arc<dyn Tool>>,
    ) -> Result<Agent, ToolError> {
        let agent = Agent::new(name, persona, self.provider.clone(), registry(specialists)?)
            .with_settings(self.settings.clone());
        Ok(self.attach_bus(agent))
    }

    fn attach_bus(&self, agent: Agent) -> Agent {
        match &self.event_bus {
            Some(bus) => agent.with_event_bus(bus.clone()),
            None => agent,
        }
    }
}

fn registry(tools: Vec<Arc<dyn Tool>>) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool)?;
    }
    Ok(registry)
}

/// `calendar_specialist` → `Calendar Specialist`.
fn display_name(name: &str) -> String {
    name.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The capability backends available to this process. A missing backend
/// means the matching specialist is left out of the roster.
#[derive(Clone, Default)]
pub struct Backends {
    pub search: Option<Arc<dyn SearchBackend>>,
    pub calendar: Option<Arc<dyn CalendarBackend>>,
    pub mail: Option<Arc<dyn MailBackend>>,
    pub knowledge: Option<Arc<dyn KnowledgeStore>>,
}

impl Backends {
    pub fn from_config(config: &AppConfig) -> Self {
        let integrations = &config.integrations;

        let search = integrations
            .tavily_api_key
            .as_ref()
            .map(|key| Arc::new(TavilySearch::new(key.clone())) as Arc<dyn SearchBackend>);
        if search.is_none() {
            info!("No search API key configured, research specialist disabled");
        }

        let (calendar, mail) = match &integrations.google_access_token {
            Some(token) => (
                Some(Arc::new(GoogleCalendarBackend::new(token.clone())) as Arc<dyn CalendarBackend>),
                Some(Arc::new(GmailBackend::new(token.clone())) as Arc<dyn MailBackend>),
            ),
            None if integrations.local_fallback => {
                warn!("No Google access token, using local calendar and mailbox");
                (
                    Some(Arc::new(LocalCalendar::new()) as Arc<dyn CalendarBackend>),
                    Some(Arc::new(LocalMailbox::new()) as Arc<dyn MailBackend>),
                )
            }
            None => (None, None),
        };

        let knowledge = config.knowledge.enabled.then(|| {
            Arc::new(FileKnowledgeStore::open(config.knowledge.resolved_path())) as Arc<dyn KnowledgeStore>
        });

        Self {
            search,
            calendar,
            mail,
            knowledge,
        }
    }
}

/// Wire the specialists for `backends` under a coordinator.
pub fn build_coordinator(
    factory: &AgentFactory,
    backends: &Backends,
    config: &AppConfig,
    store: Arc<dyn ConversationStore>,
) -> Result<Coordinator, ToolError> {
    let mut specialists: Vec<Arc<dyn Tool>> = Vec::new();

    if let Some(search) = &backends.search {
        specialists.push(Arc::new(factory.create_agent_as_tool(
            "research_specialist",
            "Search the web and summarize the findings. Mention the sources you used.",
            vec![Arc::new(WebSearchTool::new(search.clone()))],
            "Search for news, facts, scores, or any other information on the web.",
        )?));
    }

    if let Some(calendar) = &backends.calendar {
        specialists.push(Arc::new(factory.create_agent_as_tool(
            "calendar_specialist",
            "Manage calendar events. Use ISO 8601 for every time you pass to a tool.",
            vec![
                Arc::new(ListUpcomingEventsTool::new(calendar.clone())),
                Arc::new(CreateCalendarEventTool::new(calendar.clone())),
            ],
            "Check the user's schedule or create calendar events. Give explicit dates and times.",
        )?));
    }

    if let Some(mail) = &backends.mail {
        specialists.push(Arc::new(factory.create_agent_as_tool(
            "communication_specialist",
            "Read unread emails or send new emails. Be concise.",
            vec![
                Arc::new(ReadEmailsTool::new(mail.clone())),
                Arc::new(SendEmailTool::new(mail.clone())),
            ],
            "Read the user's unread email or send an email. Give the full recipient address, subject and body.",
        )?));
    }

    if let Some(knowledge) = &backends.knowledge {
        specialists.push(Arc::new(factory.create_agent_as_tool(
            "knowledge_specialist",
            "Answer questions from the user's documents. Rely only on the passages you retrieve.",
            vec![Arc::new(KnowledgeBaseQueryTool::new(knowledge.clone()))],
            "Answer questions using the user's uploaded documents and notes.",
        )?));
    }

    let agent = factory.create_coordinator_agent(&config.coordinator.name, &config.coordinator.persona, specialists)?;
    let coordinator = Coordinator::new(Arc::new(agent), store)
        .with_timezone_offset(config.coordinator.timezone_offset_minutes);

    info!(roster = ?coordinator.roster(), "Coordinator ready");
    Ok(coordinator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use marshal_store::InMemoryStore;

    fn factory() -> AgentFactory {
        AgentFactory::new(Arc::new(SequentialMockProvider::new(vec![])), AgentSettings::default())
    }

    #[test]
    fn display_names() {
        assert_eq!(display_name("calendar_specialist"), "Calendar Specialist");
        assert_eq!(display_name("Research-Specialist"), "Research Specialist");
    }

    #[test]
    fn created_agent_carries_name_in_instruction() {
        let agent = factory()
            .create_agent("calendar_specialist", "Manage calendar events.", vec![])
            .unwrap();
        assert_eq!(agent.name(), "calendar_specialist");
        assert_eq!(agent.instruction(), "You are the Calendar Specialist. Manage calendar events.");
    }

    #[test]
    fn duplicate_capabilities_are_rejected() {
        let calendar: Arc<dyn CalendarBackend> = Arc::new(LocalCalendar::new());
        let err = factory()
            .create_agent(
                "calendar_specialist",
                "",
                vec![
                    Arc::new(ListUpcomingEventsTool::new(calendar.clone())),
                    Arc::new(ListUpcomingEventsTool::new(calendar)),
                ],
            )
            .err()
            .unwrap();
        assert!(matches!(err, ToolError::DuplicateName(_)));
    }

    #[test]
    fn config_sets_specialist_bounds() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 7;
        config.agent.specialist_max_iterations = 3;
        config.agent.delegation_timeout_secs = 90;

        let factory = AgentFactory::from_config(Arc::new(SequentialMockProvider::new(vec![])), &config);
        assert_eq!(factory.settings().max_iterations, 7);

        let tool = factory.create_agent_as_tool("x_specialist", "", vec![], "X").unwrap();
        assert_eq!(tool.agent().settings().max_iterations, 3);
        assert_eq!(tool.timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn roster_follows_available_backends() {
        let config = AppConfig::default();
        let backends = Backends {
            calendar: Some(Arc::new(LocalCalendar::new())),
            mail: Some(Arc::new(LocalMailbox::new())),
            ..Backends::default()
        };

        let coordinator = build_coordinator(&factory(), &backends, &config, Arc::new(InMemoryStore::new())).unwrap();
        assert_eq!(coordinator.roster(), vec!["calendar_specialist", "communication_specialist"]);
        assert!(coordinator.instruction().contains("- calendar_specialist:"));
        assert!(!coordinator.instruction().contains("research_specialist"));
    }

    #[test]
    fn backends_without_credentials_fall_back_locally() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.knowledge.path = Some(dir.path().join("kb.jsonl").to_string_lossy().into_owned());

        let backends = Backends::from_config(&config);
        assert!(backends.search.is_none());
        assert!(backends.calendar.is_some());
        assert!(backends.mail.is_some());
        assert!(backends.knowledge.is_some());

        config.integrations.local_fallback = false;
        config.knowledge.enabled = false;
        let backends = Backends::from_config(&config);
        assert!(backends.calendar.is_none() && backends.mail.is_none() && backends.knowledge.is_none());
    }
}
