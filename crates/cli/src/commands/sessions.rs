//! `marshal sessions`, `marshal show`, `marshal delete`: stored history.

use marshal_core::message::{Role, SessionId};
use marshal_core::store::ConversationStore;

pub async fn list() -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("  No sessions yet. Start one with `marshal chat`.");
        return Ok(());
    }

    println!("  {:<36}  {:<16}  Title", "Session", "Updated");
    for session in sessions {
        println!(
            "  {:<36}  {:<16}  {}",
            session.id.as_str(),
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.title
        );
    }
    Ok(())
}

pub async fn show(id: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    let messages = store.list(&SessionId::from(id)).await?;
    if messages.is_empty() {
        anyhow::bail!("No session with id {id}");
    }

    for message in messages {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
            Role::System | Role::Tool => continue,
        };
        println!("  [{}] {speaker} >", message.timestamp.format("%Y-%m-%d %H:%M"));
        for line in message.content.lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}

pub async fn delete(id: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    if store.delete(&SessionId::from(id)).await? {
        println!("  Deleted session {id}");
    } else {
        println!("  No session with id {id}");
    }
    Ok(())
}
