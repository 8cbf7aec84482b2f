use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use vendora::agent::TickRunner;
use vendora::api::{ApiState, api_routes};
use vendora::config::{AgentConfig, DeployConfig, EmailConfig};
use vendora::deploy::HttpDeployPlatform;
use vendora::email::{DisabledSender, EmailSender, SmtpEmailSender};
use vendora::llm::{IntentClassifier, LlmConfig, LlmProvider, create_provider};
use vendora::outreach::OutreachSequencer;
use vendora::reply::ReplyMatcher;
use vendora::sites::SiteGenerator;
use vendora::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing; VENDORA_LOG_DIR switches to daily rolling files.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = match std::env::var("VENDORA_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "vendora.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let port: u16 = std::env::var("VENDORA_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("🌮 Vendora v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{port}/api");
    eprintln!("   Webhook: http://0.0.0.0:{port}/webhooks/email");

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("VENDORA_DB_PATH").unwrap_or_else(|_| "./data/vendora.db".to_string());
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {db_path}");

    // ── LLM (optional) ───────────────────────────────────────────────────
    let llm: Option<Arc<dyn LlmProvider>> = match LlmConfig::from_env() {
        Some(config) => {
            eprintln!("   LLM: {}", config.model);
            Some(create_provider(&config)?)
        }
        None => {
            eprintln!("   LLM: disabled (no API key)");
            None
        }
    };

    // ── Email ────────────────────────────────────────────────────────────
    let mut agent_config = AgentConfig::from_env();
    let sender: Arc<dyn EmailSender> = match EmailConfig::from_env() {
        Some(config) => {
            eprintln!(
                "   Email: SMTP {}:{}{}",
                config.smtp_host,
                config.smtp_port,
                match &config.sandbox_redirect {
                    Some(redirect) => format!(" (sandboxed to {redirect})"),
                    None => String::new(),
                }
            );
            Arc::new(SmtpEmailSender::new(config))
        }
        None => {
            eprintln!("   Email: disabled (no SMTP host)");
            agent_config.email_enabled = false;
            Arc::new(DisabledSender)
        }
    };

    let sequencer = Arc::new(OutreachSequencer::new(
        db.clone(),
        sender,
        llm.clone(),
        agent_config.clone(),
    ));

    // ── Deployment platform (optional) ───────────────────────────────────
    let generator = match DeployConfig::from_env() {
        Some(config) => {
            eprintln!("   Deploys: {}", config.api_base);
            Some(Arc::new(SiteGenerator::new(
                db.clone(),
                Arc::new(HttpDeployPlatform::new(config)),
                Some(sequencer.clone()),
            )))
        }
        None => {
            eprintln!("   Deploys: disabled (no token)");
            None
        }
    };

    let classifier = llm.clone().map(IntentClassifier::new);
    let matcher = Arc::new(ReplyMatcher::new(
        db.clone(),
        classifier,
        generator.clone(),
    ));

    let runner = Arc::new(TickRunner::new(
        db.clone(),
        sequencer.clone(),
        generator.clone(),
        llm,
        agent_config.clone(),
    ));

    // ── HTTP server ──────────────────────────────────────────────────────
    let state = ApiState {
        db,
        runner: runner.clone(),
        sequencer,
        matcher,
        generator,
        webhook_secret: std::env::var("VENDORA_WEBHOOK_SECRET").ok(),
    };
    let app = api_routes(state);
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .expect("Failed to bind API port");
        tracing::info!(port, "API server started");
        axum::serve(listener, app).await.ok();
    });

    // ── Tick loop ────────────────────────────────────────────────────────
    // VENDORA_TICK_CRON takes precedence; otherwise a fixed interval.
    match std::env::var("VENDORA_TICK_CRON").ok() {
        Some(expr) => {
            let schedule = cron::Schedule::from_str(&expr)
                .with_context(|| format!("invalid VENDORA_TICK_CRON '{expr}'"))?;
            eprintln!("   Tick: cron '{expr}'\n");
            loop {
                let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                    eprintln!("Cron schedule has no upcoming fires, exiting");
                    break;
                };
                let wait = (next - chrono::Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(wait).await;
                run_tick(&runner).await;
            }
        }
        None => {
            let interval = std::time::Duration::from_secs(agent_config.tick_interval_secs);
            eprintln!("   Tick: every {}s\n", interval.as_secs());
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                run_tick(&runner).await;
            }
        }
    }

    Ok(())
}

async fn run_tick(runner: &Arc<TickRunner>) {
    if let Err(e) = runner.run_full_tick().await {
        tracing::error!(error = %e, "Tick failed");
    }
}
