use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use serde::Serialize;
use std::thread;
use std::time::Duration;

use profview::cli::Args;
use profview::config;
use profview::core::{downcast_event, NodeChangedEvent, Profiler, RowInsertedEvent, RowRemovedEvent};
use profview::entities::{ColumnId, MetricsSnapshot, Severity};
use profview::paths::PathConfig;
use profview::sim;

const NAME_WIDTH: usize = 36;
const CELL_WIDTH: usize = 14;

fn init_logging(args: &Args, paths: &PathConfig) -> Result<()> {
    let log_level = args.log_level();

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| paths.log_file());
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn severity_mark(severity: Severity) -> &'static str {
    match severity {
        Severity::Normal => " ",
        Severity::Elevated => "~",
        Severity::High => "!",
        Severity::Critical => "#",
    }
}

/// Indented table of the current projection, visible columns only
fn render_table(profiler: &Profiler) -> String {
    let registry = profiler.columns();
    let columns = profiler.visible_columns();
    let name_col = registry.index_of(ColumnId::Name);
    let ctx = profiler.value_context();
    let mut out = String::new();

    for &col in &columns {
        let Some(spec) = registry.get(col) else { continue };
        if Some(col) == name_col {
            out.push_str(&format!("{:<width$}", spec.label, width = NAME_WIDTH));
        } else {
            out.push_str(&format!("{:>width$}", spec.label, width = CELL_WIDTH));
        }
    }
    out.push('\n');

    let projection = profiler.projection();
    profiler.with_tree(|tree| {
        for row in projection.flatten() {
            let Some(node) = tree.get(row.node) else { continue };
            for &col in &columns {
                let Some(spec) = registry.get(col) else { continue };
                let text = spec.value(node, &ctx).display();
                if Some(col) == name_col {
                    let indented = format!("{}{}", "  ".repeat(row.depth), text);
                    out.push_str(&format!("{:<width$}", indented, width = NAME_WIDTH));
                } else {
                    let cell = format!("{}{}", text, severity_mark(spec.severity(node, &ctx)));
                    out.push_str(&format!("{:>width$}", cell, width = CELL_WIDTH));
                }
            }
            out.push('\n');
        }
    });
    out
}

#[derive(Serialize)]
struct ReportRow {
    depth: usize,
    name: String,
    type_label: String,
    active: bool,
    rendered: bool,
    enabled: bool,
    descendants: usize,
    metrics: MetricsSnapshot,
}

fn render_json(profiler: &Profiler) -> Result<String> {
    let projection = profiler.projection();
    let rows: Vec<ReportRow> = profiler.with_tree(|tree| {
        projection
            .flatten()
            .into_iter()
            .filter_map(|row| {
                let node = tree.get(row.node)?;
                let flags = node.flags();
                Some(ReportRow {
                    depth: row.depth,
                    name: node.name().to_string(),
                    type_label: node.type_label().to_string(),
                    active: flags.active,
                    rendered: flags.rendered,
                    enabled: flags.enabled,
                    descendants: node.descendants(),
                    metrics: *node.metrics(),
                })
            })
            .collect()
    });
    serde_json::to_string_pretty(&rows).context("Failed to serialize report")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let paths = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths.ensure_dirs() {
        eprintln!("Warning: {:#}", e);
    }
    init_logging(&args, &paths)?;

    info!("profview {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let settings_path = paths.settings_file();
    info!("Settings path: {}", settings_path.display());
    let mut settings = config::load(&settings_path);
    args.apply(&mut settings);

    let engine = sim::demo_engine();
    let mut profiler = Profiler::new(engine.clone(), &settings);

    if let Some(pattern) = &args.filter {
        profiler.set_filter_text(pattern);
    }
    if let Some(column) = args.sort {
        match profiler.columns().index_of(column) {
            Some(index) => {
                profiler.toggle_sort(index);
                if args.reverse {
                    profiler.toggle_sort(index);
                }
            }
            None => warn!("Column {} is not available on this platform", column.as_str()),
        }
    }

    profiler.start()?;
    let interval = Duration::from_millis(profiler.refresh_interval());

    for pass in 1..=u64::from(args.passes) {
        sim::perturb(&engine, pass);
        // Let the sampler run at least once before reading
        thread::sleep(interval + Duration::from_millis(50));

        let events = profiler.process_events();
        let changed = events.iter().filter(|e| downcast_event::<NodeChangedEvent>(e).is_some()).count();
        let structural = events
            .iter()
            .filter(|e| downcast_event::<RowInsertedEvent>(e).is_some() || downcast_event::<RowRemovedEvent>(e).is_some())
            .count();
        debug!("Pass {}: {} changed, {} structural", pass, changed, structural);

        if args.json {
            if pass == u64::from(args.passes) {
                println!("{}", render_json(&profiler)?);
            }
            continue;
        }
        println!(
            "--- pass {} | mode {} | {} rows changed ---",
            pass,
            profiler.view_mode(),
            changed
        );
        print!("{}", render_table(&profiler));
    }

    profiler.stop();
    if !args.no_save {
        if let Err(e) = config::save(&settings_path, &profiler.settings()) {
            warn!("{:#}", e);
        }
    }
    Ok(())
}
