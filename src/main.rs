use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credgate::cli::{self, CredentialCommands, PolicyCommands};
use credgate::config::{self, Config};
use credgate::models::credential::{CreateCredentialRequest, IssueOutcome};
use credgate::policy::{PolicyEngine, PolicyRules};
use credgate::service::{parse_credential_id, CredentialService};
use credgate::store::{CredentialStore, MemoryStore, PgStore};
use credgate::{api, vault, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "credgate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "credgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Credential { command }) => {
            let database_url = cfg
                .database_url
                .clone()
                .context("DATABASE_URL must be set for credential commands")?;
            let db = PgStore::connect(&database_url).await?;
            db.migrate().await?;
            let service = build_service(&cfg, Arc::new(db))?;
            handle_credential_command(&service, command).await
        }
        Some(cli::Commands::Policy { command }) => handle_policy_command(&cfg, command),
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn load_policy(cfg: &Config) -> anyhow::Result<PolicyEngine> {
    let rules = match &cfg.policy_path {
        Some(path) => {
            let rules = PolicyRules::from_file(path)?;
            tracing::info!(path = %path.display(), "loaded policy ruleset");
            rules
        }
        None => PolicyRules::default(),
    };
    Ok(PolicyEngine::new(rules))
}

fn build_service(cfg: &Config, store: Arc<dyn CredentialStore>) -> anyhow::Result<CredentialService> {
    let cipher = vault::provision(cfg.master_key.as_deref(), cfg.production)
        .context("failed to provision secret cipher")?;
    let policy = load_policy(cfg)?;
    Ok(CredentialService::new(store, policy, Arc::new(cipher)).with_retry(cfg.retry_config()))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let store: Arc<dyn CredentialStore> = match &cfg.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url).await?;

            tracing::info!("Running migrations...");
            db.migrate().await?;
            Arc::new(db)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set: using the in-memory store, records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let service = build_service(&cfg, store)?;
    let state = Arc::new(AppState {
        service,
        config: cfg,
    });
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("credgate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_credential_command(
    service: &CredentialService,
    cmd: CredentialCommands,
) -> anyhow::Result<()> {
    match cmd {
        CredentialCommands::Create {
            principal,
            kind,
            scopes,
            ttl,
            length,
        } => {
            let request = CreateCredentialRequest {
                principal: Some(principal),
                kind,
                scopes: Some(scopes),
                ttl_seconds: ttl,
                length,
            };
            let outcome = service.create_credential(request).await?;
            print_outcome(&outcome);
        }

        CredentialCommands::List => {
            let creds = service.list().await?;

            if creds.is_empty() {
                println!("No credentials found.");
                return Ok(());
            }

            println!(
                "{:<38} {:<20} {:<10} {:<8} {:<20} SCOPES",
                "ID", "PRINCIPAL", "TYPE", "STATUS", "EXPIRES"
            );
            for c in creds {
                println!(
                    "{:<38} {:<20} {:<10} {:<8} {:<20} {}",
                    c.id,
                    c.principal,
                    c.kind,
                    c.status,
                    c.expires_at.format("%Y-%m-%d %H:%M:%S"),
                    c.scopes.join(",")
                );
            }
        }

        CredentialCommands::Approve { id } => {
            let id = parse_credential_id(&id)?;
            let outcome = service.approve(id).await?;
            print_outcome(&outcome);
        }

        CredentialCommands::Revoke { id } => {
            let id = parse_credential_id(&id)?;
            let summary = service.revoke(id).await?;
            println!("Credential {} revoked.", summary.id);
        }
    }
    Ok(())
}

fn handle_policy_command(cfg: &Config, cmd: PolicyCommands) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Show => {
            let engine = load_policy(cfg)?;
            print!("{}", engine.rules().to_yaml()?);
        }
    }
    Ok(())
}

fn print_outcome(outcome: &IssueOutcome) {
    match outcome {
        IssueOutcome::Issued {
            id,
            secret,
            expires_at,
        } => {
            println!("Credential issued.");
            println!("  ID:       {}", id);
            println!("  Expires:  {}", expires_at);
            println!("  Secret:   {}", secret.expose());
            println!("  (shown once; it cannot be retrieved later)");
        }
        IssueOutcome::Pending { id, reason } => {
            println!("Request pending approval.");
            println!("  Request:  {}", id);
            println!("  Reason:   {}", reason);
        }
    }
}
