pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use crate::presentation::cli::{Cli, Commands, GlobalArgs};
use shelf_core::connectivity::{ConnectivityMonitor, TcpProbe};
use shelf_core::{Backend, OfflineCache};
use shelf_core::crypto::aead::AeadKey;
use shelf_core::crypto::hex::parse_hex_array;
use shelf_core::crypto::kdf::key_from_passphrase;
use shelf_core::error::Result;
use shelf_core::policy::Policy;
use shelf_core::repo::OpenParams;

pub fn open_params(g: &GlobalArgs) -> Result<OpenParams> {
    let aead_key = match (&g.key_hex, &g.passphrase) {
        (Some(hex), _) => Some(AeadKey(parse_hex_array::<32>(hex)?)),
        (None, Some(pw)) => Some(key_from_passphrase(&g.root, pw)?),
        (None, None) => None,
    };
    let mut policy = Policy::load(&g.root)?;
    if let Some(q) = g.quota {
        policy.quota_bytes = Some(q);
    }
    if let Some(c) = &g.codec {
        policy.codec = c.parse()?;
    }
    Ok(OpenParams {
        root: g.root.clone(),
        aead_key,
        policy,
        precache: !g.no_precache && !g.memory,
        backend: if g.memory { Backend::Memory } else { Backend::Fs },
    })
}

/// Seed the online flag from a real reachability check of `--reach`.
pub async fn detect_connectivity(g: &GlobalArgs) -> (Arc<TcpProbe>, ConnectivityMonitor) {
    let probe = Arc::new(TcpProbe::new(
        g.reach.clone(),
        Duration::from_millis(g.reach_timeout_ms),
    ));
    let monitor = ConnectivityMonitor::detect(probe.as_ref()).await;
    (probe, monitor)
}

pub async fn run(cli: Cli) -> Result<()> {
    let params = open_params(&cli.global)?;
    tracing::debug!(
        root = %params.root.display(),
        sealed = params.aead_key.is_some(),
        codec = ?params.policy.codec,
        backend = ?params.backend,
        "opening cache"
    );
    let (reach, connectivity) = detect_connectivity(&cli.global).await;
    let cache = OfflineCache::open(&params, connectivity)?;
    match cli.command {
        Commands::Probe => handlers::handle_probe(&cache),
        Commands::Download {
            chapter_id,
            novel_id,
            novel_title,
            chapter_number,
            title,
            file,
        } => {
            handlers::handle_download(
                &cache,
                chapter_id,
                novel_id,
                novel_title,
                chapter_number,
                title,
                file,
            )
            .await
        }
        Commands::Cat { chapter_id } => handlers::handle_cat(&cache, &chapter_id).await,
        Commands::Ls { novel, long } => handlers::handle_ls(&cache, novel, long).await,
        Commands::Rm { chapter_ids } => handlers::handle_rm(&cache, &chapter_ids).await,
        Commands::Usage => handlers::handle_usage(&cache).await,
        Commands::Stats => handlers::handle_stats(&cache).await,
        Commands::Compact => handlers::handle_compact(&cache).await,
        Commands::Selftest => handlers::handle_selftest(&cache).await,
        Commands::Precache { manifest, dist } => {
            handlers::handle_precache(&cache, manifest, dist).await
        }
        Commands::Online { watch, interval } => {
            handlers::handle_online(&cache, reach, watch, interval).await
        }
    }
}
