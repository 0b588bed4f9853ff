mod cli;

use clap::Parser;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use casa_core::{AuthGate, Service};
use casa_gateway::{EventStreamHandle, GatewayClient, ReconnectConfig};
use casa_server::AppState;

use crate::cli::{Cli, Command, MintTokenArgs, ServeArgs};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn,casad=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match cli.global.config {
        Some(ref path) => casa_config::load_config_from(path)?,
        None => casa_config::load_config()?,
    };

    match cli.command {
        Some(Command::MintToken(args)) => mint_token(&config, &args),
        Some(Command::Serve(args)) => serve(config, args).await,
        None => serve(config, ServeArgs::default()).await,
    }
}

// ── Token minting ────────────────────────────────────────────────────

fn mint_token(
    config: &casa_config::Config,
    args: &MintTokenArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let secret = casa_config::resolve_auth_secret(config)?;
    let gate = AuthGate::new(secret);

    let ttl = chrono::Duration::minutes(
        args.ttl_minutes.unwrap_or(config.server.token_ttl_minutes),
    );
    println!("{}", gate.issue(&args.subject, ttl));
    Ok(())
}

// ── Server ───────────────────────────────────────────────────────────

async fn serve(
    config: casa_config::Config,
    args: ServeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let gateway_url = casa_config::validate_gateway_url(&config)?;
    let gateway_token = casa_config::resolve_gateway_token(&config)?;
    let auth_secret = casa_config::resolve_auth_secret(&config)?;

    let gateway = GatewayClient::new(gateway_url.as_str(), &gateway_token)?;
    let service = Service::new(gateway);
    let auth = AuthGate::new(auth_secret);

    // Gateway change-event stream → invalidation bridge
    let cancel = CancellationToken::new();
    let events = EventStreamHandle::connect(
        gateway_ws_url(&gateway_url)?,
        ReconnectConfig::default(),
        cancel.clone(),
        Some(expose(&gateway_token)),
    );
    let bridge = service.spawn_event_bridge(events.subscribe(), cancel.clone());

    let hub = std::sync::Arc::clone(service.hub());
    let state = AppState { service, auth };
    let app = casa_server::app(state);

    let bind = args.bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "casad listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            info!("shutdown requested");
            // Terminate open viewer connections, not just new accepts.
            hub.shutdown();
            shutdown_cancel.cancel();
        })
        .await?;

    events.shutdown();
    if let Err(e) = bridge.await {
        warn!(error = %e, "event bridge task join failed");
    }

    info!("casad stopped");
    Ok(())
}

/// Derive the gateway's WebSocket endpoint from its HTTP base URL.
fn gateway_ws_url(base: &url::Url) -> Result<url::Url, Box<dyn std::error::Error>> {
    let mut ws_url = base.clone();
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    ws_url
        .set_scheme(scheme)
        .map_err(|()| format!("cannot derive ws scheme from {base}"))?;
    let path = ws_url.path().trim_end_matches('/').to_owned();
    ws_url.set_path(&format!("{path}/v1"));
    Ok(ws_url)
}

fn expose(secret: &SecretString) -> String {
    use secrecy::ExposeSecret;
    secret.expose_secret().to_owned()
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
