// src/display/terminal.rs
//! Terminal-based display implementation

use crate::{
    error::Result,
    tracking::{format_elapsed, format_pace, Notice, NoticeReceiver, SessionSnapshot},
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::{
    collections::VecDeque,
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, time::sleep};

const MAX_NOTICES: usize = 5;
const BAR_WIDTH: usize = 40;

pub struct TerminalDisplay {
    title: String,
    notices: VecDeque<String>,
}

impl TerminalDisplay {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            notices: VecDeque::new(),
        }
    }

    /// Redraw once a second until `running` is cleared
    pub async fn run(
        &mut self,
        snapshots: watch::Receiver<SessionSnapshot>,
        mut notices: Option<&mut NoticeReceiver>,
        running: Arc<AtomicBool>,
    ) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Hide, DisableLineWrap)?;

        while running.load(Ordering::Relaxed) {
            if let Some(rx) = notices.as_deref_mut() {
                while let Ok(notice) = rx.try_recv() {
                    self.push_notice(&notice);
                }
            }

            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
            let snapshot = snapshots.borrow().clone();
            self.render_display(&mut stdout, &snapshot)?;
            stdout.flush()?;

            sleep(Duration::from_secs(1)).await;
        }

        execute!(stdout, Show, EnableLineWrap)?;
        Ok(())
    }

    fn push_notice(&mut self, notice: &Notice) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice.to_string());
    }

    /// Render one frame
    fn render_display(&self, stdout: &mut impl Write, snapshot: &SessionSnapshot) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\n"),
            Print(&self.title),
            Print("\n"),
            Print("=".repeat(60)),
            Print("\n"),
            ResetColor
        )?;

        execute!(stdout, Print(format!("Status: {}\n\n", snapshot.state)))?;

        self.render_distance_section(stdout, snapshot)?;
        self.render_time_section(stdout, snapshot)?;
        self.render_position_section(stdout, snapshot)?;

        if !self.notices.is_empty() {
            self.render_notice_section(stdout)?;
        }

        execute!(
            stdout,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\n"),
            Print("Press Ctrl+C to finish the run"),
            Print("\n"),
            ResetColor
        )?;

        Ok(())
    }

    fn render_distance_section(&self, stdout: &mut impl Write, snapshot: &SessionSnapshot) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Yellow),
            Print("DISTANCE:\n"),
            ResetColor
        )?;

        execute!(
            stdout,
            Print(format!("  Covered:   {:>8.2} km\n", snapshot.distance_km)),
            Print(format!("  Target:    {:>8.2} km\n", snapshot.target_km)),
            Print(format!("  Remaining: {:>8.2} km\n", snapshot.metrics.remaining_km)),
        )?;

        let color = if snapshot.target_reached {
            Color::Green
        } else {
            Color::Cyan
        };
        execute!(
            stdout,
            Print("  "),
            SetForegroundColor(color),
            Print(progress_bar(snapshot.metrics.progress, BAR_WIDTH)),
            ResetColor,
            Print(format!(" {:>3}%\n\n", snapshot.metrics.progress_percent()))
        )?;

        Ok(())
    }

    fn render_time_section(&self, stdout: &mut impl Write, snapshot: &SessionSnapshot) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Cyan),
            Print("TIME:\n"),
            ResetColor
        )?;

        execute!(
            stdout,
            Print(format!("  Elapsed:   {:>8}\n", format_elapsed(snapshot.elapsed_seconds))),
            Print(format!(
                "  Pace:      {:>8} min/km\n\n",
                format_pace(snapshot.metrics.pace_min_per_km)
            ))
        )?;

        Ok(())
    }

    fn render_position_section(&self, stdout: &mut impl Write, snapshot: &SessionSnapshot) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Magenta),
            Print("POSITION:\n"),
            ResetColor
        )?;

        match &snapshot.last_fix {
            Some(fix) => execute!(
                stdout,
                Print(format!("  Latitude:  {:>12.6}°\n", fix.latitude)),
                Print(format!("  Longitude: {:>12.6}°\n", fix.longitude)),
                Print(format!(
                    "  Fix time:  {}\n",
                    fix.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                ))
            )?,
            None => execute!(stdout, Print("  Waiting for fix\n"))?,
        }

        execute!(
            stdout,
            Print(format!("  Route:     {} points\n\n", snapshot.route_points))
        )?;

        Ok(())
    }

    fn render_notice_section(&self, stdout: &mut impl Write) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Blue),
            Print("NOTICES:\n"),
            ResetColor
        )?;

        for notice in &self.notices {
            execute!(stdout, Print(format!("  {}\n", notice)))?;
        }
        execute!(stdout, Print("\n"))?;

        Ok(())
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self::new("Run Tracker")
    }
}

fn progress_bar(progress: f64, width: usize) -> String {
    let filled = ((progress.clamp(0.0, 1.0)) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
