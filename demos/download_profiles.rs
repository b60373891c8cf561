use std::path::PathBuf;

use anyhow::{Context, Result};
use pritunl_api::{Client, EntityRef};
use tracing_subscriber::EnvFilter;

// Usage: cargo run --example download_profiles -- [ORG NAME] [DEST DIR]
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let org_name = args.next().unwrap_or_else(|| pritunl_api::DEFAULT_ORGANIZATION.to_string());
    let dest = PathBuf::from(args.next().unwrap_or_else(|| "profiles".to_string()));
    std::fs::create_dir_all(&dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;

    // Configure access via env vars or a `.pritunlrc` file.
    let client = Client::from_env()?.with_progress(true);

    let org = client
        .organizations()
        .find_by_name(&org_name)
        .await?
        .with_context(|| format!("organization {:?} not found", org_name))?;

    let users: Vec<EntityRef> = client
        .users()
        .list(&org.id)
        .await?
        .iter()
        .filter(|u| u.kind.as_deref() != Some("server"))
        .map(EntityRef::from)
        .collect();

    let results = client
        .keys()
        .download_users_client_configs(&org.id, users, &dest)
        .await;

    let failed: Vec<_> = results.iter().filter(|r| !r.outcome.is_success()).collect();
    for r in &failed {
        if let Some(err) = r.outcome.failure() {
            eprintln!("{}: {}", r.item, err);
        }
    }
    eprintln!(
        "{} profile(s) written to {}, {} failed",
        results.len() - failed.len(),
        dest.display(),
        failed.len()
    );
    Ok(())
}
