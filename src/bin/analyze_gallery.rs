use std::error::Error;

use rusty_palm::gallery::GalleryEntry;
use rusty_palm::matcher::{identity_score, DEFAULT_MIN_CONFIDENCE};
use rusty_palm::similarity::cosine_similarity;
use rusty_palm::store::GalleryStore;

// Mean similarity between every pair of samples inside one entry.
fn self_consistency(entry: &GalleryEntry) -> Option<f64> {
    let samples = entry.embeddings();
    let mut total = 0.0;
    let mut pairs = 0;
    for i in 0..samples.len() {
        for j in i + 1..samples.len() {
            total += cosine_similarity(&samples[i], &samples[j]);
            pairs += 1;
        }
    }
    (pairs > 0).then(|| total / pairs as f64)
}

// Mean of a's samples scored against b, the same figure the matcher uses.
fn cross_score(a: &GalleryEntry, b: &GalleryEntry) -> f64 {
    let scores: Vec<f64> = a
        .embeddings()
        .iter()
        .filter_map(|e| identity_score(e, b))
        .collect();
    scores.iter().sum::<f64>() / scores.len().max(1) as f64
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: analyze_gallery <data_dir> [threshold]");
        return Ok(());
    }
    let threshold = match args.get(2) {
        Some(t) => t.parse::<f64>()?,
        None => DEFAULT_MIN_CONFIDENCE,
    };

    let gallery = GalleryStore::open(&args[1])?.load()?;
    let entries = gallery.snapshot();
    println!("Identities: {}", entries.len());
    println!("Threshold:  {:.3}", threshold);

    println!("\n{:<24} | {:<7} | {:<11}", "Identity", "Samples", "Consistency");
    println!("{}", "-".repeat(48));
    for entry in &entries {
        let consistency = self_consistency(entry)
            .map(|c| format!("{:.4}", c))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} | {:<7} | {:<11}",
            entry.identity().to_string(),
            entry.embeddings().len(),
            consistency
        );
    }

    if entries.len() < 2 {
        return Ok(());
    }

    // Pairs that would confuse the matcher show up above the threshold.
    let mut pairs = Vec::new();
    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            let score = cross_score(a, b).max(cross_score(b, a));
            pairs.push((a.identity().clone(), b.identity().clone(), score));
        }
    }
    pairs.sort_by(|x, y| y.2.total_cmp(&x.2));

    println!("\nClosest identity pairs:");
    for (a, b, score) in pairs.iter().take(10) {
        let flag = if *score >= threshold { "  <-- collides" } else { "" };
        println!("  {:<20} {:<20} {:.4}{}", a.to_string(), b.to_string(), score, flag);
    }

    let colliding = pairs.iter().filter(|p| p.2 >= threshold).count();
    println!("\nPairs at or above threshold: {}/{}", colliding, pairs.len());
    Ok(())
}
