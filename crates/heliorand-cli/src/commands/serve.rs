use std::path::PathBuf;
use std::sync::Arc;

use heliorand_core::{
    Config, DirArchive, EntropyPool, FetchDriver, FrameArchive, FrameSource, MemoryStore,
    RefillDriver, SdoFrameSource, shutdown_channel,
};

pub async fn run(
    host: Option<String>,
    port: Option<u16>,
    archive_dir: Option<PathBuf>,
    exhaust_frames: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = Config::from_env();
    if let Some(host) = host {
        cfg.api_host = host;
    }
    if let Some(port) = port {
        cfg.api_port = port;
    }
    if exhaust_frames {
        cfg.exhaust_frames = true;
    }

    let store = Arc::new(MemoryStore::new());
    let pool = Arc::new(EntropyPool::new(
        store,
        cfg.entropy_ttl(),
        cfg.max_bytes_per_request,
    ));
    let frames: Arc<dyn FrameSource> = Arc::new(SdoFrameSource::new(&cfg)?);
    let archive: Option<Arc<dyn FrameArchive>> = archive_dir
        .map(|dir| Arc::new(DirArchive::new(dir, cfg.max_stored_frames)) as Arc<dyn FrameArchive>);

    let base = format!("http://{}:{}", cfg.api_host, cfg.api_port);
    println!("☀ heliorand v{}", heliorand_core::VERSION);
    println!("   {base}");
    println!();
    println!("   Endpoints:");
    println!("     GET /api/v1/random/{{n}}   Take n random bytes (1-{})", cfg.max_bytes_per_request);
    println!("     GET /api/v1/random        Take 256 random bytes");
    println!("     GET /api/v1/stats         Pool statistics");
    println!("     GET /api/v1/health        Health check");
    println!();
    println!("   Examples:");
    println!("     curl {base}/api/v1/random/512");
    println!("     curl {base}/api/v1/stats");
    println!();
    println!(
        "   Fetching {} image(s) every {}s; refill check every {}s",
        cfg.sdo_images.len(),
        cfg.fetch_interval_secs,
        cfg.refill_interval_secs
    );

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let fetch = FetchDriver::new(frames.clone(), archive, &cfg);
    let refill = RefillDriver::new(pool.clone(), frames, cfg.clone());
    tokio::spawn(fetch.run(shutdown_rx.clone()));
    tokio::spawn(refill.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    heliorand_server::run_server(pool, &cfg.api_host, cfg.api_port, shutdown_rx).await?;
    println!("✓ shutdown complete");
    Ok(())
}
