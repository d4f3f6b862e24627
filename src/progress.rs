// src/progress.rs - download and chunk progress on the terminal

use std::io::{self, Write};

use crossterm::terminal;

use crate::chunklist::ChunkObserver;

const TERMINAL_MARGIN: usize = 2;
const MIB: f64 = 1024.0 * 1024.0;

/// Receives byte counts while a body streams to disk.
pub trait DownloadProgress {
    /// `total` is the announced content length, if any.
    fn begin(&mut self, total: Option<u64>);
    /// `written` is cumulative.
    fn advance(&mut self, written: u64);
    fn finish(&mut self);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl DownloadProgress for Silent {
    fn begin(&mut self, _: Option<u64>) {}
    fn advance(&mut self, _: u64) {}
    fn finish(&mut self) {}
}

impl ChunkObserver for Silent {
    fn chunk(&mut self, _: usize, _: usize, _: u32) {}
}

/// Carriage-return progress lines on stderr.
#[derive(Debug, Default)]
pub struct TerminalProgress {
    total: Option<u64>,
    width: usize,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn redraw(&mut self, line: &str) {
        let width = terminal_width();
        let mut err = io::stderr().lock();
        if width != self.width {
            let _ = write!(err, "\r{:width$}", "");
            self.width = width;
        }
        let _ = write!(err, "\r{line}");
        let _ = err.flush();
    }
}

impl DownloadProgress for TerminalProgress {
    fn begin(&mut self, total: Option<u64>) {
        self.total = total.filter(|t| *t > 0);
        self.width = 0;
    }

    fn advance(&mut self, written: u64) {
        let line = render_download(written, self.total, terminal_width());
        self.redraw(&line);
    }

    fn finish(&mut self) {
        eprintln!("\nDownload complete!");
    }
}

impl ChunkObserver for TerminalProgress {
    fn chunk(&mut self, index: usize, _total: usize, size: u32) {
        let width = terminal_width();
        let line = format!("{:<width$}", format!("Chunk {index} ({size} bytes)"));
        self.redraw(&line);
    }

    fn done(&mut self) {
        eprintln!("\nImage verification complete!");
    }
}

/// Current terminal width minus a small margin.
fn terminal_width() -> usize {
    fit_width(terminal::size().ok().map(|(columns, _)| columns))
}

/// 80 columns when the size is unknown or reported as zero.
fn fit_width(columns: Option<u16>) -> usize {
    usize::from(columns.filter(|c| *c > 0).unwrap_or(80)).saturating_sub(TERMINAL_MARGIN)
}

/// One progress line. The bar is drawn only on terminals wider than 55.
pub fn render_download(written: u64, total: Option<u64>, width: usize) -> String {
    let done_mb = written as f64 / MIB;
    let Some(total) = total else {
        return format!("{done_mb:.1} MB downloaded...");
    };

    let fraction = (written as f64 / total as f64).min(1.0);
    let mut line = format!("{done_mb:.1}/{:.1} MB ", total as f64 / MIB);
    if width > 55 {
        let bar = width / 3;
        let filled = ((bar as f64) * fraction) as usize;
        line.push('|');
        line.push_str(&"=".repeat(filled));
        line.push_str(&" ".repeat(bar - filled));
        line.push('|');
    }
    line.push_str(&format!(" {:.1}% downloaded", fraction * 100.0));
    line
}
