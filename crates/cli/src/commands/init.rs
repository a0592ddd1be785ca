//! `marshal init`: write a default config file.

use marshal_config::AppConfig;

pub fn run(force: bool) -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Marshal — First-Time Setup");
    println!("==========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("  Created config directory: {}", config_dir.display());
    }

    if config_path.exists() && !force {
        println!("  Config already exists: {}", config_path.display());
        println!("  Run with --force to overwrite it.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Wrote {}", config_path.display());
    println!();
    println!("  Next steps:");
    println!("    1. Set an API key: export OPENAI_API_KEY=sk-...");
    println!("    2. Optional: TAVILY_API_KEY for web research,");
    println!("       GOOGLE_ACCESS_TOKEN for calendar and Gmail");
    println!("    3. Start chatting: marshal chat");

    Ok(())
}
