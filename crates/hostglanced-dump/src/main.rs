//! Inspects hour-rotated hostglance `.prom` log chunks: how many scrapes
//! a file holds, the timestamp range they cover, and (with `--blocks`)
//! a per-metric sample count.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Parser;

const SCRAPE_HEADER_PREFIX: &str = "# hostglance_scrape_timestamp_ms ";

#[derive(Parser)]
#[command(name = "hostglanced-dump", about = "Inspect hostglance .prom log chunks")]
struct Cli {
    /// Path to a `.prom` file or a directory of them.
    path: Option<PathBuf>,

    /// Show per-metric sample counts (requires scanning every scrape).
    #[arg(long)]
    blocks: bool,

    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

struct Scrape {
    timestamp_ms: i64,
    body: String,
}

fn parse_chunk(contents: &str) -> Vec<Scrape> {
    let mut scrapes = Vec::new();
    let mut current_ts: Option<i64> = None;
    let mut current_body = String::new();

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix(SCRAPE_HEADER_PREFIX) {
            if let Some(ts) = current_ts.take() {
                scrapes.push(Scrape { timestamp_ms: ts, body: std::mem::take(&mut current_body) });
            }
            current_ts = rest.trim().parse::<i64>().ok();
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if let Some(ts) = current_ts {
        scrapes.push(Scrape { timestamp_ms: ts, body: current_body });
    }
    scrapes
}

fn metric_name(sample_line: &str) -> Option<&str> {
    if sample_line.starts_with('#') || sample_line.trim().is_empty() {
        return None;
    }
    let end = sample_line.find(['{', ' ']).unwrap_or(sample_line.len());
    Some(&sample_line[..end])
}

fn fmt_ts(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()).unwrap_or_else(|| ms.to_string())
}

fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn dump_file(path: &Path, cli: &Cli) {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    let size = contents.len() as u64;
    let scrapes = parse_chunk(&contents);

    if cli.json {
        print!("{{\"file\":\"{}\",\"size_bytes\":{},\"scrape_count\":{}", path.display(), size, scrapes.len());
        if let (Some(first), Some(last)) = (scrapes.first(), scrapes.last()) {
            print!(",\"first_ts_ms\":{},\"last_ts_ms\":{}", first.timestamp_ms, last.timestamp_ms);
        }
        println!("}}");
        return;
    }

    println!("{}: {} scrapes, {}", path.display(), scrapes.len(), human_bytes(size));
    if let (Some(first), Some(last)) = (scrapes.first(), scrapes.last()) {
        println!("  range: {} .. {}", fmt_ts(first.timestamp_ms), fmt_ts(last.timestamp_ms));
    }

    if cli.blocks {
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for scrape in &scrapes {
            for line in scrape.body.lines() {
                if let Some(name) = metric_name(line) {
                    *counts.entry(name).or_default() += 1;
                }
            }
        }
        for (name, count) in counts {
            println!("    {name}: {count}");
        }
    }
}

fn dump_directory(dir: &Path, cli: &Cli) {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.extension().is_some_and(|e| e == "prom")).collect(),
        Err(e) => {
            eprintln!("{}: {}", dir.display(), e);
            std::process::exit(1);
        }
    };
    entries.sort();
    if entries.is_empty() {
        println!("no .prom chunks found in {}", dir.display());
        return;
    }
    for path in entries {
        dump_file(&path, cli);
    }
}

fn main() {
    let cli = Cli::parse();
    let path = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));

    if path.is_dir() {
        dump_directory(&path, &cli);
    } else if path.is_file() {
        dump_file(&path, &cli);
    } else {
        eprintln!("not found: {}", path.display());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_scrapes_from_one_chunk() {
        let contents = "# hostglance_scrape_timestamp_ms 1000\n# HELP hostglance_cpu_total_usage_percent x\n# TYPE hostglance_cpu_total_usage_percent gauge\nhostglance_cpu_total_usage_percent 12.5\n# hostglance_scrape_timestamp_ms 2000\nhostglance_cpu_total_usage_percent 13.5\n";
        let scrapes = parse_chunk(contents);
        assert_eq!(scrapes.len(), 2);
        assert_eq!(scrapes[0].timestamp_ms, 1000);
        assert_eq!(scrapes[1].timestamp_ms, 2000);
    }

    #[test]
    fn metric_name_strips_labels() {
        assert_eq!(metric_name("hostglance_process_cpu_percent{pid=\"1\"} 5"), Some("hostglance_process_cpu_percent"));
        assert_eq!(metric_name("# HELP x"), None);
    }
}
