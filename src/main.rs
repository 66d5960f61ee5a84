use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use emalia::config::EngineConfig;
use emalia::dispatcher::Dispatcher;
use emalia::engine::{Engine, EngineState};
use emalia::error::ConfigError;
use emalia::llm::{LlmConfig, OpenAiClient};
use emalia::mail::{ImapMailbox, Mailbox, MailboxConfig};
use emalia::tasks::{CustomTaskStore, JsonTaskStore, default_registry, load_custom_tasks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();

    // ── Configuration ────────────────────────────────────────────────────
    let settings = std::env::var("EMALIA_SETTINGS").ok().map(PathBuf::from);
    let config = EngineConfig::load(settings.as_deref()).context("invalid engine configuration")?;

    let mailbox_config = MailboxConfig::from_env()
        .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))
        .context("mailbox is not configured; export the EMAIL_* variables")?;

    eprintln!("📬 Emalia v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Name: {}", config.instance_name);
    eprintln!(
        "   Mailbox: {} (IMAP {}:{}, SMTP {}:{})",
        mailbox_config.from_address,
        mailbox_config.imap_host,
        mailbox_config.imap_port,
        mailbox_config.smtp_host,
        mailbox_config.smtp_port,
    );
    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(mailbox_config));

    // ── Tasks ────────────────────────────────────────────────────────────
    let store: Arc<dyn CustomTaskStore> = Arc::new(JsonTaskStore::new(config.custom_tasks_path()));
    let registry = Arc::new(default_registry(&config).await);
    if let Err(e) = load_custom_tasks(&registry, store.as_ref()).await {
        tracing::warn!(error = %e, "Could not load custom tasks");
    }
    eprintln!("   Tasks: {} registered", registry.count().await);

    let state = Arc::new(EngineState::new(&config));
    let scan_interval = config.scan_interval();
    let timeout = config.handler_timeout();
    let mut dispatcher = Dispatcher::new(registry, state, Arc::new(config), store);

    // ── LLM ──────────────────────────────────────────────────────────────
    match LlmConfig::from_env() {
        Some(llm_config) => {
            eprintln!("   GPT: enabled (model {})", llm_config.model);
            let client = OpenAiClient::new(llm_config, timeout)?;
            dispatcher = dispatcher.with_llm(Arc::new(client));
        }
        None => eprintln!("   GPT: disabled (no GPT_API_KEY)"),
    }

    // ── Engine ───────────────────────────────────────────────────────────
    let engine = Arc::new(Engine::new(mailbox, Arc::new(dispatcher)));
    let mut handle = Arc::clone(&engine).spawn(scan_interval);
    eprintln!("   Commands: status, freeze, unfreeze, stop\n");

    // stdin may be closed when running as a service; the engine keeps going
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;
    loop {
        tokio::select! {
            joined = &mut handle => {
                let finished = joined.context("engine task panicked")??;
                eprintln!("Stopped at {finished}");
                return Ok(());
            }
            line = lines.next_line(), if console_open => match line? {
                Some(line) => console_command(&engine, line.trim()),
                None => console_open = false,
            },
        }
    }
}

fn console_command(engine: &Engine, command: &str) {
    let state = engine.state();
    match command.to_lowercase().as_str() {
        "" => {}
        "status" => println!("{}", state.snapshot()),
        "freeze" => {
            engine.freeze();
            println!("Frozen: all mail now goes to the management task.");
        }
        "unfreeze" => {
            state.unfreeze();
            println!("Unfrozen; send counter reset.");
        }
        "stop" | "quit" | "exit" => {
            engine.stop();
            println!("Stopping after the current cycle...");
        }
        other => println!("Unknown command: {other}"),
    }
}

/// Console logging, plus daily rolling files when `EMALIA_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match std::env::var("EMALIA_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "emalia.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}
