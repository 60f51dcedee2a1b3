//! hostglance — minimal read-only TUI demonstrating the snapshot reader
//! contract: runs its own producer in-process and redraws from whatever
//! the seqlock retry hands back on each tick. No history mode, no
//! interaction beyond quitting.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::event::{self, Event as CEvent, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table};
use ratatui::Terminal;

use hostglance_core::alerts::{AlertEngine, AlertThresholds};
use hostglance_core::buffers::SnapshotBuffers;
use hostglance_core::churn::ChurnCounter;
use hostglance_core::collectors::process::{CollectParams, ProcessCollector};
use hostglance_core::fs::RealFs;
use hostglance_core::model::Snapshot;
use hostglance_core::producer::Producer;

/// Read-only system telemetry viewer.
#[derive(Parser)]
#[command(name = "hostglance", about = "Read-only system telemetry viewer")]
struct Args {
    /// Redraw interval in milliseconds.
    #[arg(long, default_value = "500")]
    tick_ms: u64,
}

fn render(frame: &mut ratatui::Frame, snapshot: &Snapshot) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio((snapshot.cpu.total_pct / 100.0).clamp(0.0, 1.0));
    frame.render_widget(cpu_gauge, chunks[0]);

    let mem_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio((snapshot.memory.used_pct / 100.0).clamp(0.0, 1.0));
    frame.render_widget(mem_gauge, chunks[1]);

    let rows: Vec<Row> = snapshot
        .processes
        .rows
        .iter()
        .take(chunks[2].height.saturating_sub(2) as usize)
        .map(|row| {
            Row::new(vec![
                Cell::from(row.pid.to_string()),
                Cell::from(row.user_name.clone()),
                Cell::from(format!("{:.1}", row.cpu_pct)),
                Cell::from(format!("{}", row.rss_kb / 1024)),
                Cell::from(row.cmd.clone()),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [Constraint::Length(7), Constraint::Length(10), Constraint::Length(6), Constraint::Length(8), Constraint::Min(10)],
    )
    .header(Row::new(vec!["PID", "USER", "CPU%", "MB", "CMD"]))
    .block(Block::default().borders(Borders::ALL).title(format!("Processes ({})", snapshot.collector_name)));
    frame.render_widget(table, chunks[2]);

    let alert_text: Vec<Line> = if snapshot.alerts.is_empty() {
        vec![Line::from("no active alerts")]
    } else {
        snapshot.alerts.iter().map(|a| Line::from(Span::raw(format!("{:?}: {}", a.severity, a.message)))).collect()
    };
    frame.render_widget(Paragraph::new(alert_text).block(Block::default().borders(Borders::ALL).title("Alerts")), chunks[3]);
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let fs = RealFs::new();
    let churn = Arc::new(ChurnCounter::new());
    let buffers = Arc::new(SnapshotBuffers::new());
    let alerts = AlertEngine::new(AlertThresholds::default());
    let processes = ProcessCollector::procfs();
    let params = CollectParams::default();

    let stop = Arc::new(AtomicBool::new(false));
    let producer_buffers = buffers.clone();
    let producer_stop = stop.clone();
    let producer_handle = std::thread::spawn(move || {
        let mut producer = Producer::new(fs, churn, producer_buffers, processes, params, alerts);
        producer.run(producer_stop);
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let tick_rate = Duration::from_millis(args.tick_ms);
    let run_result = (|| -> io::Result<()> {
        loop {
            let snapshot = buffers.read();
            terminal.draw(|frame| render(frame, &snapshot))?;

            if event::poll(tick_rate)? {
                if let CEvent::Key(key) = event::read()? {
                    if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                        break;
                    }
                }
            }
        }
        Ok(())
    })();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    stop.store(true, Ordering::SeqCst);
    producer_handle.join().expect("producer thread panicked");

    run_result
}
