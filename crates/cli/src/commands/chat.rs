//! `marshal chat`: interactive or single-message chat with the coordinator.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use marshal_agent::{build_coordinator, AgentError, AgentFactory, Backends, Coordinator, TurnContext, TurnError};
use marshal_config::AppConfig;
use marshal_core::event::{DomainEvent, EventBus};
use marshal_core::message::SessionId;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

pub async fn run(session: Option<String>, message: Option<String>) -> anyhow::Result<()> {
    let config = super::load_config()?;

    // Fail early without an API key
    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export OPENAI_API_KEY=sk-...");
        eprintln!("    export MARSHAL_API_KEY=...      (for any other provider)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        anyhow::bail!("No API key found. See above for setup instructions.");
    }

    let router = marshal_providers::build_from_config(&config);
    let provider = router.default().context("No default provider configured")?;

    let event_bus = Arc::new(EventBus::default());
    let factory = AgentFactory::from_config(provider, &config).with_event_bus(event_bus.clone());
    let backends = Backends::from_config(&config);
    let store = super::open_store(&config).await?;
    let coordinator = build_coordinator(&factory, &backends, &config, store)?;

    let session_id = session.map(SessionId::from).unwrap_or_default();

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = run_turn(&coordinator, &session_id, &msg).await;
        eprint!("\r              \r");
        match result {
            Ok(answer) => println!("{answer}"),
            Err(TurnError::Agent(AgentError::Cancelled)) => eprintln!("  Cancelled."),
            Err(e) => return Err(e.into()),
        }
        eprintln!("  session: {session_id}");
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Marshal — Interactive Mode");
    println!();
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", factory.settings().model);
    println!("  Specialists:  {}", coordinator.roster().join(", "));
    println!("  Session:      {session_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C cancels a running turn, or quits at the prompt. 'exit' also quits.");
    println!();

    let progress = tokio::spawn(report_delegations(event_bus, config.coordinator.name.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        match run_turn(&coordinator, &session_id, input).await {
            Ok(answer) => {
                println!();
                for line in answer.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Err(TurnError::Agent(AgentError::Cancelled)) => {
                eprintln!("\n  [Cancelled] Nothing was saved for this turn.\n");
            }
            Err(e) => {
                eprintln!("  [Error] {e}\n");
            }
        }
    }

    progress.abort();
    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Next line from the prompt, or `None` at end of input or when `interrupt` fires first.
async fn next_input<R: AsyncBufRead + Unpin>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> std::io::Result<Option<String>> {
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

/// Run one turn; Ctrl+C cancels it.
async fn run_turn(coordinator: &Coordinator, session_id: &SessionId, text: &str) -> Result<String, TurnError> {
    let token = CancellationToken::new();
    let ctx = TurnContext::with_token(token.clone());

    let turn = coordinator.handle_turn_with(&ctx, session_id, text);
    tokio::pin!(turn);

    tokio::select! {
        result = &mut turn => result,
        _ = tokio::signal::ctrl_c() => {
            token.cancel();
            turn.await
        }
    }
}

/// Print a line whenever the coordinator hears back from a specialist.
async fn report_delegations(event_bus: Arc<EventBus>, coordinator: String) {
    let mut rx = event_bus.subscribe();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        if let DomainEvent::ToolExecuted {
            agent,
            tool_name,
            success,
            duration_ms,
            ..
        } = event.as_ref()
        {
            if *agent == coordinator {
                let mark = if *success { "done" } else { "failed" };
                eprintln!("\r  [{tool_name}: {mark}, {:.1}s]", *duration_ms as f64 / 1000.0);
            }
        }
    }
}
