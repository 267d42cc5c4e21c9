//! CLI tool for running a hierarchical DRC on a library file
//!
//! Usage:
//!   cargo run --release --bin drc_check -- <library.json> --cell <name> [options]
//!
//! Options:
//!   --config <file>          Session configuration (JSON)
//!   --threads <n>            Layer-task worker threads (0/1 = sequential)
//!   --no-area                Run the node size pass instead of area checks
//!   --bounds <x1,y1,x2,y2>   Only report geometry touching this box
//!   --flat                   Flatten the cell before checking
//!   --json                   Print summary and violations as JSON

use anyhow::{bail, Context};
use std::env;
use std::sync::Arc;

use hier_drc::drc::CollectingSink;
use hier_drc::layout::{CellId, Library, Rect};
use hier_drc::session::{DrcConfig, DrcSession, JobMode};

fn usage(program: &str) {
    eprintln!("Usage: {} <library.json> --cell <name> [options]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <file>          Session configuration (JSON)");
    eprintln!("  --threads <n>            Layer-task worker threads (0/1 = sequential)");
    eprintln!("  --no-area                Run the node size pass instead of area checks");
    eprintln!("  --bounds <x1,y1,x2,y2>   Only report geometry touching this box");
    eprintln!("  --flat                   Flatten the cell before checking");
    eprintln!("  --json                   Print summary and violations as JSON");
}

fn parse_bounds(text: &str) -> anyhow::Result<Rect> {
    let parts: Vec<f64> = text
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("Invalid bounds `{}`", text))?;
    if parts.len() != 4 {
        bail!("Bounds need four values x1,y1,x2,y2, got `{}`", text);
    }
    Ok(Rect::new(parts[0], parts[1], parts[2], parts[3]))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage(&args[0]);
        return Ok(());
    }

    let library_path = &args[1];
    let mut cell: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut threads: Option<usize> = None;
    let mut no_area = false;
    let mut bounds: Option<Rect> = None;
    let mut flat = false;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--cell" => {
                i += 1;
                cell = args.get(i).cloned();
            }
            "--config" => {
                i += 1;
                config_path = args.get(i).cloned();
            }
            "--threads" => {
                i += 1;
                let value = args.get(i).context("--threads needs a value")?;
                threads = Some(value.parse().with_context(|| format!("Invalid thread count `{}`", value))?);
            }
            "--bounds" => {
                i += 1;
                bounds = Some(parse_bounds(args.get(i).context("--bounds needs a value")?)?);
            }
            "--no-area" => no_area = true,
            "--flat" => flat = true,
            "--json" => json = true,
            other => {
                usage(&args[0]);
                bail!("Unknown option `{}`", other);
            }
        }
        i += 1;
    }

    let Some(cell) = cell.map(|c| CellId::from(c.as_str())) else {
        usage(&args[0]);
        bail!("--cell is required");
    };

    let mut config = match &config_path {
        Some(path) => DrcConfig::from_file(path)?,
        None => DrcConfig::default(),
    };
    config.job_mode = JobMode::Inline;
    if let Some(n) = threads {
        config.num_threads = n;
    }
    if no_area {
        config.area_checking = false;
    }

    let mut library = Library::from_file(library_path)?;
    if flat {
        let flattened = library
            .flatten(&cell)
            .with_context(|| format!("Failed to flatten {}", cell))?;
        library.cells.insert(cell.clone(), flattened);
    }

    let sink = Arc::new(CollectingSink::new());
    let session = DrcSession::new(library, config, sink.clone())?;
    let summary = session
        .check_hierarchically(&cell, bounds)
        .with_context(|| format!("DRC of {} failed", cell))?;
    let violations = sink.take();

    if json {
        let report = serde_json::json!({
            "summary": summary,
            "violations": violations,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for v in &violations {
            let layer = v.layer.as_ref().map(|l| l.as_str()).unwrap_or("-");
            let detail = v.detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default();
            println!(
                "{:?} {:?}{} in {} on {}: {} vs {} [{}] at ({:.3}, {:.3})",
                v.severity,
                v.kind,
                detail,
                v.cell,
                layer,
                v.measured,
                v.required,
                v.rule_name,
                v.bounds.min.x,
                v.bounds.min.y
            );
        }
        println!(
            "{}: {} errors, {} warnings; {}/{} layers checked, {} empty{}{} in {:.2}ms",
            cell,
            summary.errors,
            summary.warnings,
            summary.layers_checked,
            summary.layers_total,
            summary.empty_layers.len(),
            if summary.skipped_valid { ", skipped (valid)" } else { "" },
            if summary.aborted { ", aborted" } else { "" },
            summary.elapsed_ms
        );
    }

    if summary.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
