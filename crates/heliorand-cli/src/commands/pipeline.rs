use std::path::PathBuf;
use std::sync::Arc;

use heliorand_core::{
    Conditioner, Config, EntropyPool, EntropyValidator, Frame, FrameSource, MemoryStore,
    NoiseExtractor, SdoFrameSource,
};

use super::hex_sample;

/// Run frame → extract → condition → validate → pool → take once and report
/// every stage, against a local in-memory pool.
pub async fn run(image: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_env();

    println!("{}", "=".repeat(60));
    println!("heliorand pipeline report");
    println!("{}", "=".repeat(60));

    // 1. Obtain a frame.
    let frame = match image {
        Some(path) => {
            let bytes = std::fs::read(&path)?;
            println!("1. Local frame: {} ({} bytes)", path.display(), bytes.len());
            Frame::new(bytes, format!("file/{}", path.display()))
        }
        None => {
            let source = SdoFrameSource::new(&cfg)?;
            let mut frames = source.fetch_latest().await?;
            let frame = frames.remove(0);
            println!(
                "1. Fetched frame: {} ({} bytes)",
                frame.source_tag,
                frame.bytes.len()
            );
            frame
        }
    };

    // 2. Extract raw noise.
    let extractor = NoiseExtractor::from_config(&cfg);
    let raw = extractor.extract(&frame)?;
    println!("2. Extracted {} bytes of raw noise", raw.len());

    // 3. Condition into blocks.
    let mut conditioner = Conditioner::new(cfg.block_size);
    let blocks = conditioner.process(&raw)?;
    println!("3. Conditioned into {} block(s) of {}", blocks.len(), cfg.block_size);

    // 4. Validate.
    let validator = EntropyValidator::new(cfg.min_shannon, cfg.min_quality);
    let (kept, verdicts) = validator.batch_validate(blocks);
    let avg_shannon: f64 =
        verdicts.iter().map(|v| v.shannon_entropy).sum::<f64>() / verdicts.len().max(1) as f64;
    let avg_quality: f64 =
        verdicts.iter().map(|v| v.quality_score).sum::<f64>() / verdicts.len().max(1) as f64;
    println!(
        "4. Validation: {}/{} passed (avg shannon {avg_shannon:.3}, avg quality {avg_quality:.3})",
        kept.len(),
        verdicts.len()
    );

    // 5. Pool round trip.
    let pool = EntropyPool::new(
        Arc::new(MemoryStore::new()),
        cfg.entropy_ttl(),
        cfg.max_bytes_per_request,
    );
    for block in &kept {
        let verdict = validator.validate(block);
        pool.add(
            block,
            verdict.quality_score,
            serde_json::json!({"source": frame.source_tag}),
        )
        .await?;
    }
    let stats = pool.stats().await?;
    println!(
        "5. Pool: {} block(s), {} bytes, avg quality {:.3}",
        stats.available_blocks, stats.available_bytes, stats.average_quality
    );

    // 6. Dispense samples.
    println!("6. Dispensing:");
    for size in [256usize, 1024, 4096] {
        match pool.take(size).await {
            Ok(bytes) => println!("   {size:>5} bytes  sample {}", hex_sample(&bytes, 16)),
            Err(err) => println!("   {size:>5} bytes  failed: {err}"),
        }
    }

    let stats = pool.stats().await?;
    println!(
        "   served {} bytes over {} request(s)",
        stats.bytes_served, stats.requests_served
    );

    Ok(())
}
