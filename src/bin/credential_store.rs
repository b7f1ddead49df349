use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use credential_provisioner::config::{StoreConfig, DEFAULT_STORAGE_ENDPOINT};
use credential_provisioner::store::{user_object_key, GcsStore, UploadOptions, VersionedStore};
use credential_provisioner::telemetry::init_tracing;
use credential_provisioner::{IndexUpdater, ProvisionerResult, UpdateOutcome};

/// One-shot storage operations on the credential bucket.
#[derive(Debug, Parser)]
#[command(name = "credential-store", version)]
struct CliArgs {
    /// Bucket holding per-user credential files and CRLs.
    #[arg(long, env = "BUCKET")]
    bucket: String,

    #[arg(long, env = "STORAGE_ENDPOINT", default_value = DEFAULT_STORAGE_ENDPOINT)]
    endpoint: String,

    /// Pre-obtained bearer token.
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Length of one backoff unit in milliseconds.
    #[arg(long, env = "BACKOFF_UNIT_MS", default_value_t = 1000)]
    backoff_unit_ms: u64,

    /// Give up after this many units of accumulated backoff.
    #[arg(long, env = "BACKOFF_CEILING_UNITS", default_value_t = 32)]
    backoff_ceiling_units: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace the lines containing a marker in a user's index file.
    UpdateIndex {
        user: String,
        line_to_remove: String,
        replacement_line: String,
        index_file: String,
    },
    /// Upload a local file as `<user>/<file>` and let the user read it.
    Upload {
        user: String,
        source: PathBuf,
        file: String,
    },
    /// Print `<user>/<file>` to stdout.
    Download { user: String, file: String },
    /// Delete `<user>/<file>`.
    Delete { user: String, file: String },
    /// Upload a CRL to an exact object path.
    UploadCrl { source: PathBuf, dest: String },
}

impl TryFrom<&CliArgs> for StoreConfig {
    type Error = anyhow::Error;

    fn try_from(args: &CliArgs) -> Result<Self, Self::Error> {
        if args.bucket.trim().is_empty() {
            bail!("BUCKET must not be empty");
        }
        if args.backoff_unit_ms == 0 {
            bail!("BACKOFF_UNIT_MS must be positive");
        }
        Ok(StoreConfig {
            bucket: args.bucket.trim().to_string(),
            endpoint: args.endpoint.clone(),
            access_token: args.token.clone().filter(|token| !token.trim().is_empty()),
            backoff_unit: Duration::from_millis(args.backoff_unit_ms),
            backoff_ceiling_units: args.backoff_ceiling_units,
        })
    }
}

fn open_store(config: &StoreConfig) -> ProvisionerResult<Arc<dyn VersionedStore>> {
    let store = GcsStore::new(&config.endpoint, config.bucket.clone(), config.access_token.clone())?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();
    init_tracing().context("failed to install tracing subscriber")?;

    let config = StoreConfig::try_from(&args)?;
    let store = open_store(&config).context("failed to build storage client")?;

    match args.command {
        Command::UpdateIndex {
            user,
            line_to_remove,
            replacement_line,
            index_file,
        } => {
            let updater = IndexUpdater::from_config(store, &config);
            let outcome = updater
                .update_user_index(&user, &index_file, &line_to_remove, &replacement_line)
                .await
                .with_context(|| format!("failed to update {index_file} for {user}"))?;
            if let UpdateOutcome::Exhausted { attempts, waited } = outcome {
                bail!(
                    "gave up on {index_file} for {user} after {attempts} conflicting writes ({}s of backoff)",
                    waited.as_secs()
                );
            }
        }
        Command::Upload { user, source, file } => {
            let content = tokio::fs::read(&source)
                .await
                .with_context(|| format!("couldn't read content file {}", source.display()))?;
            let key = user_object_key(&user, &file);
            let generation = store
                .upload(&key, Bytes::from(content), &UploadOptions::default())
                .await
                .with_context(|| format!("couldn't upload {key}"))?;
            store
                .grant_reader(&key, &user)
                .await
                .with_context(|| format!("couldn't grant {user} read access to {key}"))?;
            tracing::info!(%key, %generation, "created object");
        }
        Command::Download { user, file } => {
            let key = user_object_key(&user, &file);
            let content = store
                .download(&key)
                .await
                .with_context(|| format!("couldn't download {key}"))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
        Command::Delete { user, file } => {
            let key = user_object_key(&user, &file);
            store
                .delete(&key)
                .await
                .with_context(|| format!("couldn't delete {key}"))?;
            tracing::info!(%key, "deleted object");
        }
        Command::UploadCrl { source, dest } => {
            let content = tokio::fs::read(&source)
                .await
                .with_context(|| format!("couldn't read CRL file {}", source.display()))?;
            let generation = store
                .upload(&dest, Bytes::from(content), &UploadOptions::crl())
                .await
                .with_context(|| format!("couldn't upload CRL to {dest}"))?;
            tracing::info!(key = %dest, %generation, "uploaded CRL");
        }
    }
    Ok(())
}
