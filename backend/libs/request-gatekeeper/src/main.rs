use anyhow::{bail, Context};
use request_gatekeeper::{
    CredentialStore, FileStorage, Gatekeeper, GatekeeperConfig, GatekeeperError, MemoryStorage,
    PendingRequest, RequestContext, SessionStorage,
};
use reqwest::Method;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "usage: gatekeeper-probe <METHOD> <URL> [ROUTE]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(method), Some(url)) = (args.next(), args.next()) else {
        bail!(USAGE);
    };
    let route = args.next();

    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method {method:?}"))?;

    let config = GatekeeperConfig::from_env().context("Failed to load gatekeeper config")?;
    config.validate().context("Invalid gatekeeper config")?;

    let storage: Arc<dyn SessionStorage> = match &config.session_file {
        Some(path) => Arc::new(FileStorage::new(path)),
        None => Arc::new(MemoryStorage::new()),
    };
    let store = Arc::new(CredentialStore::restore(storage).await?);

    if store.take_forced_logout_marker().await? {
        warn!("Previous session was force-terminated");
    }
    info!(
        authenticated = store.is_authenticated(),
        base = %config.api_base_url,
        "Session restored"
    );

    let gatekeeper = Gatekeeper::new(config, store)?;
    let ctx = RequestContext { route };

    match gatekeeper.send(PendingRequest::new(method, url), &ctx).await {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            println!("{status}");
            if !body.is_empty() {
                println!("{body}");
            }
        }
        Err(GatekeeperError::ForcedLogout { cause, redirect }) => {
            println!("forced logout ({cause:?}): {}", redirect.reason);
            println!("redirect: {}", redirect.location());
        }
        Err(e) => {
            println!("failed ({}): {e}", e.status_code());
        }
    }

    Ok(())
}
