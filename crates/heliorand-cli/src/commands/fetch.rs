use std::path::PathBuf;

use heliorand_core::{Config, DirArchive, FrameArchive, FrameSource, SdoFrameSource};

pub async fn run(archive_dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_env();
    let source = SdoFrameSource::new(&cfg)?;

    println!("Fetching {} image(s) from {} ...", cfg.sdo_images.len(), cfg.sdo_base_url);
    let frames = source.fetch_latest().await?;

    println!("Fetched {} frame(s):", frames.len());
    for frame in &frames {
        println!(
            "  {:<40} {:>9} bytes  {}",
            frame.source_tag,
            frame.bytes.len(),
            frame.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    if let Some(dir) = archive_dir {
        let archive = DirArchive::new(dir, cfg.max_stored_frames);
        for frame in &frames {
            let location = archive.store(frame).await?;
            println!("  archived → {location}");
        }
    }

    Ok(())
}
