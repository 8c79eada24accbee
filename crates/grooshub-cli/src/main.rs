use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use grooshub_core::analyzer::{AnalysisRequest, AnalyzerConfig, ConversationAnalyzer};
use grooshub_core::config::{self, GroosHubConfig};
use grooshub_core::context::{build_chat_context, format_system_context, ChatContextRequest};
use grooshub_core::crypto::{self, Encryptor};
use grooshub_core::llm::LlmService;
use grooshub_core::model::{
    MemoryDelta, MemoryItem, MemoryItemKind, NewMessage, SoftContextCategory, SoftContextEntry,
};
use grooshub_core::project_memory::{self, ProjectMemoryStore};
use grooshub_core::storage::{append_chat_messages, create_backend, SqliteStorage, StorageBackend};
use grooshub_core::summaries::SummaryStore;
use grooshub_core::user_memory::{self, UserMemoryStore};

#[derive(Parser)]
#[command(
    name = "grooshub",
    about = "GroosHub chat memory: summaries, user memory and project memory",
    version
)]
enum Cli {
    /// Write a config template to .grooshub/config.toml in the current directory
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Generate a random encryption master key
    Keygen,
    /// Show configuration and database status
    Status,
    /// Append messages from a JSON file to a chat
    Import {
        /// JSON file with an array of {"role", "content", "created_at"?} objects
        path: String,
        /// Existing chat to append to (a new chat is created when omitted)
        #[arg(long)]
        chat: Option<String>,
    },
    /// Summarize a chat and update user/project memory (requires LLM)
    Analyze {
        /// Chat ID
        chat: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: Option<String>,
        /// Summarize everything outside the recent window and update memory
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the prompt context assembled for a chat
    Context {
        /// Chat ID
        chat: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Token budget (default from config)
        #[arg(long)]
        tokens: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// List a chat's summaries with compression stats
    Summaries {
        /// Chat ID
        chat: String,
        #[arg(long)]
        json: bool,
    },
    /// Inspect or edit a user's memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Inspect or edit a project's memory
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Show the memory as it is injected into prompts
    Show {
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the audit trail, newest first
    History {
        user: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Replace the free-text part of the memory
    Set {
        user: String,
        #[arg(long)]
        org: String,
        content: String,
    },
    /// Add or update a structured item
    Add {
        user: String,
        #[arg(long)]
        org: String,
        /// preference, expertise, context, pattern
        #[arg(long)]
        kind: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        #[arg(long, default_value = "1.0")]
        confidence: f32,
    },
    /// Remove structured items by key
    Forget {
        user: String,
        #[arg(long)]
        org: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Delete the memory (the audit trail is kept)
    Reset {
        user: String,
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    Show {
        project: String,
        #[arg(long)]
        json: bool,
    },
    /// Set a numeric hard value
    Set {
        project: String,
        #[arg(long)]
        org: String,
        name: String,
        value: f64,
    },
    /// Remove a hard value
    Unset { project: String, name: String },
    /// Add a soft-context note
    Note {
        project: String,
        #[arg(long)]
        org: String,
        /// preference, constraint, goal, decision, note
        #[arg(long, default_value = "note")]
        category: String,
        #[arg(long, default_value = "1.0")]
        confidence: f32,
        text: String,
    },
    /// Remove a soft-context note by ID
    Drop { project: String, id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let config = match GroosHubConfig::load(Some(&std::env::current_dir()?)) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            GroosHubConfig::default_config()
        }
    };

    run(cli, &config).await
}

async fn run(cli: Cli, config: &GroosHubConfig) -> Result<()> {
    match cli {
        Cli::Init { force } => cmd_init(&std::env::current_dir()?, force),
        Cli::Keygen => cmd_keygen(),
        Cli::Status => cmd_status(config).await,
        Cli::Import { path, chat } => {
            let storage = make_storage(config)?;
            cmd_import(&storage, &path, chat.as_deref()).await
        }
        Cli::Analyze {
            chat,
            user,
            org,
            project,
            force,
            json,
        } => {
            let storage = make_storage(config)?;
            let encryptor = make_encryptor(config)?;
            let request = AnalysisRequest {
                chat_id: parse_id(&chat)?,
                user_id: user,
                org_id: org,
                project_id: project,
                force,
            };
            cmd_analyze(&storage, &encryptor, config, request, json).await
        }
        Cli::Context {
            chat,
            user,
            project,
            tokens,
            json,
        } => {
            let storage = make_storage(config)?;
            let encryptor = make_encryptor(config)?;
            let request = ChatContextRequest {
                chat_id: parse_id(&chat)?,
                user_id: user,
                project_id: project,
                token_budget: tokens.unwrap_or(config.context.token_budget),
            };
            cmd_context(&storage, &encryptor, request, json).await
        }
        Cli::Summaries { chat, json } => {
            let storage = make_storage(config)?;
            let encryptor = make_encryptor(config)?;
            cmd_summaries(&storage, &encryptor, parse_id(&chat)?, json).await
        }
        Cli::Memory { action } => {
            let storage = make_storage(config)?;
            let encryptor = make_encryptor(config)?;
            let store = UserMemoryStore::new(&storage, &encryptor, &config.memory);
            cmd_memory(&store, action).await
        }
        Cli::Project { action } => {
            let storage = make_storage(config)?;
            let encryptor = make_encryptor(config)?;
            let store = ProjectMemoryStore::new(&storage, &encryptor, &config.memory);
            cmd_project(&store, action).await
        }
    }
}

fn make_storage(config: &GroosHubConfig) -> Result<SqliteStorage> {
    create_backend(config).context("failed to open storage")
}

fn make_encryptor(config: &GroosHubConfig) -> Result<Encryptor> {
    Encryptor::from_config(&config.encryption).context("failed to set up encryption")
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid chat ID: {raw}"))
}

// -- init / keygen / status --

fn cmd_init(dir: &Path, force: bool) -> Result<()> {
    let config_dir = dir.join(".grooshub");
    let path = config_dir.join("config.toml");
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("failed to create {}", config_dir.display()))?;
    let template = GroosHubConfig::template()?;
    std::fs::write(&path, template)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("{} {}", "Created".green(), path.display());
    println!(
        "  Put secrets in {} (keep it out of version control).",
        ".grooshub/config.local.toml".cyan()
    );
    Ok(())
}

fn cmd_keygen() -> Result<()> {
    let key = crypto::generate_master_key()?;
    println!("{key}");
    eprintln!(
        "{} store this as encryption.master_key or in GROOSHUB_ENCRYPTION_KEY; data sealed with it cannot be read without it",
        "note:".yellow()
    );
    Ok(())
}

async fn cmd_status(config: &GroosHubConfig) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    println!("{}", format!("GroosHub Status v{version}").bold());

    if let Some(path) = config::global_config_path() {
        let state = if path.exists() { "found" } else { "not found" };
        println!("  {}     {} ({state})", "Config:".dimmed(), path.display());
    }

    match make_storage(config) {
        Ok(storage) => println!(
            "  {}   {} ({})",
            "Database:".dimmed(),
            "ok".green(),
            storage.path().display()
        ),
        Err(e) => println!("  {}   {} ({e:#})", "Database:".dimmed(), "error".red()),
    }

    match make_encryptor(config) {
        Ok(enc) if enc.is_enabled() => {
            println!("  {} {}", "Encryption:".dimmed(), "enabled".green())
        }
        Ok(_) => println!(
            "  {} {}",
            "Encryption:".dimmed(),
            "disabled (no master key)".yellow()
        ),
        Err(e) => println!("  {} {} ({e:#})", "Encryption:".dimmed(), "error".red()),
    }

    if config.llm.enabled {
        println!(
            "  {}        {} / {}",
            "LLM:".dimmed(),
            config.llm.provider.cyan(),
            config.llm.model
        );
    } else {
        println!("  {}        {}", "LLM:".dimmed(), "disabled".yellow());
    }

    println!(
        "  {}    summarize every {} messages, keep {} recent, memory cap {} tokens",
        "Policy:".dimmed(),
        config.summarization.trigger_messages,
        config.summarization.keep_recent,
        config.memory.max_tokens
    );
    Ok(())
}

// -- import --

async fn cmd_import(storage: &SqliteStorage, path: &str, chat: Option<&str>) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let messages: Vec<NewMessage> =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {path}"))?;
    if messages.is_empty() {
        bail!("{path} contains no messages");
    }

    let chat_id = match chat {
        Some(id) => parse_id(id)?,
        None => Uuid::now_v7(),
    };
    let stored = append_chat_messages(storage, chat_id, messages)
        .await
        .context("failed to import messages")?;

    let first = stored.first().map_or(0, |m| m.index);
    let last = stored.last().map_or(0, |m| m.index);
    println!(
        "Imported {} messages into chat {} (positions {first}-{last})",
        stored.len().to_string().cyan(),
        chat_id.to_string().bold()
    );
    Ok(())
}

// -- analyze / context / summaries --

async fn cmd_analyze(
    storage: &SqliteStorage,
    encryptor: &Encryptor,
    config: &GroosHubConfig,
    request: AnalysisRequest,
    json: bool,
) -> Result<()> {
    if !config.llm.enabled {
        bail!("analysis requires an LLM; set llm.enabled = true in your config");
    }
    let llm = LlmService::with_retry_config(&config.llm, &config.retry)
        .context("failed to create LLM service")?;
    let analyzer =
        ConversationAnalyzer::new(storage, encryptor, &llm, AnalyzerConfig::from_config(config));

    let outcome = analyzer
        .analyze_chat(request)
        .await
        .context("analysis failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    if !outcome.did_anything() {
        println!("{}", "Nothing to do yet.".dimmed());
        return Ok(());
    }
    if let (Some((start, end)), Some(ratio)) = (outcome.summary_range, outcome.compression_ratio) {
        println!(
            "{} messages {start}-{end} ({ratio:.1}x compression)",
            "Summarized".green()
        );
    }
    if outcome.memory_updated {
        println!(
            "{} user memory: {} changes, {} tokens{}",
            "Updated".green(),
            outcome.memory_changes,
            outcome.memory_token_count.unwrap_or(0),
            if outcome.memory_trimmed {
                " (trimmed to fit)"
            } else {
                ""
            }
        );
    }
    if outcome.project_changes > 0 {
        println!(
            "{} project memory: {} changes",
            "Updated".green(),
            outcome.project_changes
        );
    }
    Ok(())
}

async fn cmd_context(
    storage: &SqliteStorage,
    encryptor: &Encryptor,
    request: ChatContextRequest,
    json: bool,
) -> Result<()> {
    let ctx = build_chat_context(storage, encryptor, request)
        .await
        .context("failed to build context")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ctx)?);
        return Ok(());
    }

    let system = format_system_context(&ctx);
    if !system.is_empty() {
        println!("{}", "# System".bold());
        println!("{system}\n");
    }
    println!("{}", "# Messages".bold());
    for message in &ctx.messages {
        println!("[{}] {}: {}", message.index, message.role.cyan(), message.content);
    }
    eprintln!(
        "{}",
        format!(
            "{} / {} tokens, dropped {} summaries and {} messages",
            ctx.total_tokens, ctx.budget, ctx.dropped_summaries, ctx.dropped_messages
        )
        .dimmed()
    );
    Ok(())
}

async fn cmd_summaries(
    storage: &SqliteStorage,
    encryptor: &Encryptor,
    chat_id: Uuid,
    json: bool,
) -> Result<()> {
    let store = SummaryStore::new(storage, encryptor);
    let summaries = store.list_summaries(chat_id).await?;
    let stats = store.stats(chat_id).await?;

    if json {
        let out = serde_json::json!({ "summaries": summaries, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if summaries.is_empty() {
        let total = storage.count_messages(chat_id).await?;
        println!("No summaries yet ({total} messages stored).");
        return Ok(());
    }
    for summary in &summaries {
        println!(
            "{} {:.1}x  {}",
            format!("[{}-{}]", summary.start_index, summary.end_index).cyan(),
            summary.compression_ratio,
            summary.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
        println!("  {}\n", summary.summary);
    }
    println!(
        "{} summaries covering {} messages, {} -> {} tokens ({:.1}x)",
        stats.summary_count,
        stats.messages_summarized,
        stats.original_tokens,
        stats.summary_tokens,
        stats.overall_ratio
    );
    Ok(())
}

// -- memory --

async fn cmd_memory<S: StorageBackend>(
    store: &UserMemoryStore<'_, S>,
    action: MemoryAction,
) -> Result<()> {
    match action {
        MemoryAction::Show { user, json } => {
            let Some(memory) = store.get(&user).await? else {
                println!("No memory for {user}.");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&memory)?);
            } else {
                print!("{}", user_memory::format_for_prompt(&memory));
                eprintln!(
                    "{}",
                    format!(
                        "{} tokens, {} items, org {}",
                        memory.token_count,
                        memory.items.len(),
                        memory.org_id
                    )
                    .dimmed()
                );
            }
        }
        MemoryAction::History { user, limit, json } => {
            let updates = store.history(&user, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&updates)?);
                return Ok(());
            }
            if updates.is_empty() {
                println!("No history for {user}.");
            }
            for update in &updates {
                let source = update
                    .source_chat_id
                    .map(|id| format!(" (chat {id})"))
                    .unwrap_or_default();
                println!(
                    "{}  {:<9} {}{}",
                    update.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    update.update_type.to_string().cyan(),
                    update.change_summary,
                    source.dimmed()
                );
            }
        }
        MemoryAction::Set { user, org, content } => {
            let write = store.set_content(&user, &org, &content).await?;
            print_memory_write(&user, write);
        }
        MemoryAction::Add {
            user,
            org,
            kind,
            key,
            value,
            confidence,
        } => {
            let kind: MemoryItemKind = kind.parse().map_err(anyhow::Error::msg)?;
            let delta = MemoryDelta {
                items: vec![MemoryItem::new(kind, key, value, confidence)],
                ..Default::default()
            };
            let write = store.apply_manual(&user, &org, delta).await?;
            print_memory_write(&user, write);
        }
        MemoryAction::Forget { user, org, keys } => {
            let delta = MemoryDelta {
                remove_keys: keys,
                ..Default::default()
            };
            let write = store.apply_manual(&user, &org, delta).await?;
            print_memory_write(&user, write);
        }
        MemoryAction::Reset { user, confirm } => {
            if !confirm {
                bail!("refusing to reset memory for {user} without --confirm");
            }
            if store.reset(&user).await? {
                println!("{} memory for {user}", "Reset".red());
            } else {
                println!("No memory for {user}.");
            }
        }
    }
    Ok(())
}

fn print_memory_write(user: &str, write: user_memory::MemoryWrite) {
    println!(
        "{} memory for {user}: {} ({} tokens)",
        "Updated".green(),
        write.merge,
        write.memory.token_count
    );
    if !write.trimmed.dropped_keys.is_empty() {
        println!(
            "  {} dropped to stay under the cap: {}",
            "note:".yellow(),
            write.trimmed.dropped_keys.join(", ")
        );
    }
}

// -- project --

async fn cmd_project<S: StorageBackend>(
    store: &ProjectMemoryStore<'_, S>,
    action: ProjectAction,
) -> Result<()> {
    match action {
        ProjectAction::Show { project, json } => {
            let Some(memory) = store.get(&project).await? else {
                println!("No memory for project {project}.");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&memory)?);
                return Ok(());
            }
            print!("{}", project_memory::format_for_prompt(&memory));
            for entry in &memory.soft_context {
                eprintln!(
                    "{}",
                    format!("{}  [{}] {:.2}", entry.id, entry.category, entry.confidence).dimmed()
                );
            }
        }
        ProjectAction::Set {
            project,
            org,
            name,
            value,
        } => {
            store.set_hard_value(&project, &org, &name, value).await?;
            println!("{} {name} = {value}", "Set".green());
        }
        ProjectAction::Unset { project, name } => {
            if store.remove_hard_value(&project, &name).await? {
                println!("{} {name}", "Removed".green());
            } else {
                println!("{name} is not set on {project}.");
            }
        }
        ProjectAction::Note {
            project,
            org,
            category,
            confidence,
            text,
        } => {
            let category: SoftContextCategory = category.parse().map_err(anyhow::Error::msg)?;
            let write = store
                .add_soft_context(&project, &org, SoftContextEntry::new(category, text, confidence))
                .await?;
            println!("{} project {project}: {}", "Updated".green(), write.merge);
        }
        ProjectAction::Drop { project, id } => {
            let entry_id =
                Uuid::parse_str(id.trim()).with_context(|| format!("invalid entry ID: {id}"))?;
            if store.remove_soft_context(&project, entry_id).await? {
                println!("{} {entry_id}", "Removed".green());
            } else {
                println!("No entry {entry_id} on {project}.");
            }
        }
    }
    Ok(())
}
