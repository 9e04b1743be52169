use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod args;

use args::{Args, Command, SourceArgs};
use rusty_palm::config::AppConfig;
use rusty_palm::evaluation::{evaluate, Probe};
use rusty_palm::features::extract_landmarks;
use rusty_palm::gallery::UserId;
use rusty_palm::scanner::{CancelHandle, CancelSignal, ScanOutcome};
use rusty_palm::service::{BiometricService, EnrollOutcome, VerifyOutcome, VerifyRequest};
use rusty_palm::source::{LandmarkSource, ReplaySource, SimulatedSource, SourceError};
use rusty_palm::stability::ScanStatus;
use rusty_palm::synthetic::HandShape;

fn open_source(args: &SourceArgs) -> Result<Box<dyn LandmarkSource>> {
    match (&args.replay, args.simulate) {
        (Some(path), _) => {
            let source = ReplaySource::open(path)
                .with_context(|| format!("opening recording {}", path.display()))?;
            Ok(Box::new(source.stop_when_exhausted(true)))
        }
        (None, Some(curl)) => Ok(Box::new(SimulatedSource::new(HandShape::curled(curl)))),
        (None, None) => bail!("no landmark source: pass --replay <file> or --simulate <curl>"),
    }
}

/// Cancel on Ctrl-C and echo status changes until the scan side hangs up.
fn start_scan_io() -> (CancelSignal, watch::Sender<ScanStatus>, tokio::task::JoinHandle<()>) {
    let (cancel, signal) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling scan");
            cancel.cancel();
        }
    });

    let (tx, mut rx) = watch::channel(ScanStatus::Starting);
    let printer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            let line = status.to_string();
            match status {
                ScanStatus::Captured => println!("{}", line.green()),
                ScanStatus::TimedOut | ScanStatus::Cancelled => println!("{}", line.red()),
                ScanStatus::MultipleHands | ScanStatus::TrackerGlitch => println!("{}", line.yellow()),
                _ => println!("{}", line),
            }
        }
    });
    (signal, tx, printer)
}

async fn finish_scan_io(tx: watch::Sender<ScanStatus>, printer: tokio::task::JoinHandle<()>) {
    drop(tx);
    let _ = printer.await;
}

async fn run_enroll(service: &BiometricService, identity: UserId, source: &SourceArgs) -> Result<()> {
    let mut source = open_source(source)?;
    println!("Enrolling {} from {} ({} rounds)", identity.to_string().bold(), source.name(), service.rounds());
    let (mut signal, tx, printer) = start_scan_io();
    let outcome = service.enroll(&identity, &mut source, &mut signal, &tx).await;
    finish_scan_io(tx, printer).await;

    match outcome? {
        EnrollOutcome::Enrolled(entry) => {
            println!(
                "{}",
                format!("Enrolled {} with {} samples", entry.identity(), entry.embeddings().len()).green()
            );
            Ok(())
        }
        EnrollOutcome::TimedOut { round } => bail!("round {} timed out, nothing was stored", round),
        EnrollOutcome::Cancelled { round } => bail!("round {} cancelled, nothing was stored", round),
    }
}

async fn run_verify(service: &BiometricService, identity: UserId, source: &SourceArgs) -> Result<()> {
    if service.gallery().get(&identity).is_none() {
        bail!("{} is not enrolled", identity);
    }
    let mut source = open_source(source)?;
    let (mut signal, tx, printer) = start_scan_io();
    let outcome = service.scan(&mut source, &mut signal, &tx).await;
    finish_scan_io(tx, printer).await;

    let embedding = match outcome {
        ScanOutcome::Stable(embedding) => embedding,
        ScanOutcome::TimedOut => bail!("scan timed out"),
        ScanOutcome::Cancelled => bail!("scan cancelled"),
    };
    let response = service.verify_claimed(
        &identity,
        &VerifyRequest {
            embedding: embedding.as_slice().to_vec(),
        },
    )?;
    if response.matched {
        println!("{}", format!("Verified {} (confidence {:.3})", identity, response.confidence).green());
    } else {
        println!("{}", format!("Rejected {} (confidence {:.3})", identity, response.confidence).red());
    }
    Ok(())
}

async fn run_identify(service: &BiometricService, source: &SourceArgs) -> Result<()> {
    let mut source = open_source(source)?;
    let (mut signal, tx, printer) = start_scan_io();
    let outcome = service.scan_and_verify(&mut source, &mut signal, &tx).await;
    finish_scan_io(tx, printer).await;

    match outcome {
        VerifyOutcome::Decided(result) => match result.identity {
            Some(identity) if result.matched => {
                println!("{}", format!("Matched {} (confidence {:.3})", identity, result.confidence).green());
            }
            _ => {
                println!(
                    "{}",
                    format!("No matching biometric found (best {:.3})", result.confidence).yellow()
                );
            }
        },
        VerifyOutcome::TimedOut => bail!("scan timed out"),
        VerifyOutcome::Cancelled => bail!("scan cancelled"),
    }
    Ok(())
}

fn run_list(service: &BiometricService) {
    let entries = service.gallery().snapshot();
    if entries.is_empty() {
        println!("Gallery is empty.");
        return;
    }
    println!("{:<24} | {:<7} | {:<20}", "Identity", "Samples", "Enrolled");
    println!("{}", "-".repeat(58));
    for entry in entries {
        println!(
            "{:<24} | {:<7} | {:<20}",
            entry.identity().to_string(),
            entry.embeddings().len(),
            entry.enrolled_at().format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn run_embed(input: &Path) -> Result<()> {
    let mut source = ReplaySource::open(input)?.stop_when_exhausted(true);
    let mut frame = 0usize;
    loop {
        frame += 1;
        let hands = match source.detect() {
            Ok(hands) => hands,
            Err(SourceError::Stopped) => break,
            Err(SourceError::Transient(reason)) => {
                eprintln!("{}", format!("frame {}: {}", frame, reason).yellow());
                continue;
            }
        };
        let Some(first) = hands.first() else {
            eprintln!("frame {}: no hand", frame);
            continue;
        };
        match extract_landmarks(first) {
            Ok(embedding) => println!("{}", serde_json::to_string(&embedding)?),
            Err(e) => eprintln!("{}", format!("frame {}: {}", frame, e).red()),
        }
    }
    Ok(())
}

fn read_probes(path: &Path) -> Result<Vec<Probe>> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?);
    let mut probes = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let probe: Probe = serde_json::from_str(&line)
            .with_context(|| format!("{} line {}", path.display(), i + 1))?;
        probes.push(probe);
    }
    Ok(probes)
}

fn run_evaluate(service: &BiometricService, probes: &Path, threshold: f64) -> Result<()> {
    let probes = read_probes(probes)?;
    let snapshot = service.gallery().snapshot();
    let gallery: Vec<_> = snapshot.iter().map(|e| e.as_ref()).collect();
    let report = evaluate(&gallery, &probes, threshold);

    println!("Threshold:  {:.3}", report.threshold);
    println!("FRR:        {:.2}% ({}/{})", report.frr * 100.0, report.false_rejects, report.genuine_attempts);
    println!("FAR:        {:.2}% ({}/{})", report.far * 100.0, report.false_accepts, report.impostor_attempts);
    if report.misidentified > 0 {
        println!("{}", format!("Misidentified: {}", report.misidentified).red());
    }
    println!(
        "Genuine:    mean {:.3} min {:.3} max {:.3}",
        report.genuine_scores.mean, report.genuine_scores.min, report.genuine_scores.max
    );
    println!(
        "Impostor:   mean {:.3} min {:.3} max {:.3}",
        report.impostor_scores.mean, report.impostor_scores.min, report.impostor_scores.max
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = AppConfig::load_from(&args.config)?;
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }

    if let Command::Embed { input } = &args.command {
        return run_embed(input);
    }

    let service = BiometricService::from_config(&config)
        .with_context(|| format!("opening gallery in {}", config.storage.data_dir.display()))?;
    info!(identities = service.gallery().len(), "gallery ready");

    match args.command {
        Command::Enroll { identity, source } => run_enroll(&service, identity.into(), &source).await?,
        Command::Verify { identity, source } => run_verify(&service, identity.into(), &source).await?,
        Command::Identify { source } => run_identify(&service, &source).await?,
        Command::List => run_list(&service),
        Command::Remove { identity } => {
            let identity = UserId::from(identity);
            service.remove(&identity)?;
            println!("{}", format!("Removed {}", identity).green());
        }
        Command::Evaluate { probes, threshold } => {
            run_evaluate(&service, &probes, threshold.unwrap_or(config.matcher.min_confidence))?
        }
        Command::Embed { .. } => {}
    }

    let stats = service.monitor().overall();
    if stats.count > 0 {
        info!(avg_ms = stats.avg_ms, max_ms = stats.max_ms, samples = stats.count, "latency");
    }
    Ok(())
}
