use std::sync::Arc;
use std::time::Duration;

use ambient_mail::approval::registry::PendingApprovals;
use ambient_mail::approval::resolver::ApprovalResolver;
use ambient_mail::config::AppConfig;
use ambient_mail::inference::{GeminiClient, GeminiConfig, Inference};
use ambient_mail::pipeline::processor::TriagePipeline;
use ambient_mail::poller::{AmbientPoller, spawn_poll_task};
use ambient_mail::server::{AppState, approval_routes};
use ambient_mail::store::{LibSqlBackend, Storage};
use ambient_mail::transport::{GmailClient, GmailConfig, MailTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env()?;

    // Initialize tracing; optional daily-rolling file layer
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _file_guard = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ambient-mail.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
            None
        }
    };

    eprintln!("📬 Ambient Mail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   API: http://0.0.0.0:{}", config.port);
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Polling: every {}s on labels {}\n",
        config.poll_interval_secs,
        config.labels.join(", ")
    );

    let request_timeout = Duration::from_secs(config.request_timeout_secs);

    // ── Collaborators ───────────────────────────────────────────────
    let store: Arc<dyn Storage> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path)).await?,
    );

    let inference: Arc<dyn Inference> = Arc::new(GeminiClient::new(GeminiConfig {
        api_base: config.gemini_api_base.clone(),
        api_key: config.gemini_api_key.clone(),
        model: config.model.clone(),
        request_timeout,
        max_retries: 2,
    })?);

    let transport: Arc<dyn MailTransport> = Arc::new(GmailClient::new(GmailConfig {
        api_base: config.gmail_api_base.clone(),
        access_token: config.gmail_access_token.clone(),
        from_address: config.from_address.clone(),
        request_timeout,
    })?);

    // ── Core ────────────────────────────────────────────────────────
    let registry = PendingApprovals::new();
    let pipeline = Arc::new(TriagePipeline::new(
        Arc::clone(&inference),
        Arc::clone(&store),
        Arc::clone(&registry),
    ));
    let resolver = Arc::new(ApprovalResolver::new(
        Arc::clone(&registry),
        Arc::clone(&transport),
        Arc::clone(&store),
    ));

    // ── Ambient poll loop ───────────────────────────────────────────
    let poller = AmbientPoller::new(
        Arc::clone(&transport),
        Arc::clone(&pipeline),
        config.user_id.clone(),
        config.labels.clone(),
        config.fetch_batch,
    );
    let _poll_handle = spawn_poll_task(poller, Duration::from_secs(config.poll_interval_secs));

    // ── HTTP approval surface ───────────────────────────────────────
    let state = AppState {
        pipeline,
        registry,
        resolver,
        approval_secret: config.approval_secret.clone(),
    };
    let app = approval_routes(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Approval server started");
    axum::serve(listener, app).await?;

    Ok(())
}
