use std::path::PathBuf;

use heliorand_core::EntropyValidator;

pub fn run(
    file: Option<PathBuf>,
    os_random: usize,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (label, data) = match file {
        Some(path) => {
            let data = std::fs::read(&path)?;
            (path.display().to_string(), data)
        }
        None => {
            let mut data = vec![0u8; os_random];
            getrandom::fill(&mut data)?;
            (format!("os_random({os_random})"), data)
        }
    };

    let verdict = EntropyValidator::default().validate_detailed(&data);

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }

    println!("Validating {label} ({} bytes)", data.len());
    println!("{}", "-".repeat(60));
    println!("  passed:           {}", if verdict.passed { "✓ yes" } else { "✗ no" });
    println!("  shannon entropy:  {:.4} bits/byte", verdict.shannon_entropy);
    println!("  quality score:    {:.4}", verdict.quality_score);
    if let Some(detail) = &verdict.detail {
        println!("  chi-square:       {:.4} (p = {:.4})", detail.chi_square_score, detail.chi_square_p);
        println!("  runs:             {:.4}", detail.runs_score);
        println!("  autocorrelation:  {:.4}", detail.autocorrelation_score);
        println!("  bit balance:      {:.4}", detail.bit_balance_score);
        println!("  compression:      {:.4}", detail.compression_ratio);
        println!("  required shannon: {:.1}", detail.min_required_shannon);
    }

    if !verdict.passed {
        std::process::exit(2);
    }
    Ok(())
}
