//! Aggregated transfer progress
//!
//! One [`ProgressTracker`] per top-level transfer, shared by every file task
//! of that transfer. Bytes are counted atomically and mirrored into an
//! indicatif bar.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWrite;

const BAR_TEMPLATE: &str =
    "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Snapshot of a tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressState {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Bytes per second since the tracker was created
    pub rate: f64,
    pub eta: Option<Duration>,
}

impl ProgressState {
    /// Completion percentage (0-100). An empty transfer counts as complete.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Thread-safe byte counter for one transfer
pub struct ProgressTracker {
    bar: ProgressBar,
    total: u64,
    transferred: AtomicU64,
    started: Instant,
    done: AtomicBool,
}

impl ProgressTracker {
    /// Tracker with a visible bar labelled `label`
    pub fn new(label: &str, total: u64, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(total);
            let style = ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-");
            bar.set_style(style);
            bar.set_prefix(label.to_string());
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            bar,
            total,
            transferred: AtomicU64::new(0),
            started: Instant::now(),
            done: AtomicBool::new(false),
        }
    }

    /// Tracker that never draws
    pub fn hidden(total: u64) -> Self {
        Self::new("", total, false)
    }

    /// Count `n` more bytes, never going past the total
    pub fn add(&self, n: u64) {
        let previous = self
            .transferred
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_add(n).min(self.total))
            })
            .unwrap_or_else(|cur| cur);
        self.bar
            .set_position(previous.saturating_add(n).min(self.total));
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percent(&self) -> f64 {
        self.state().percent()
    }

    /// Average bytes per second so far
    pub fn rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transferred() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Time left at the current average rate, `None` before any bytes moved
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.total.saturating_sub(self.transferred());
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let rate = self.rate();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub fn state(&self) -> ProgressState {
        ProgressState {
            total_bytes: self.total,
            transferred_bytes: self.transferred(),
            rate: self.rate(),
            eta: self.eta(),
        }
    }

    /// Finalize the bar after a successful transfer
    pub fn finish(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.bar.finish();
        }
    }

    /// Finalize the bar where it stands after a failure
    pub fn abandon(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.bar.abandon();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Writer that reports every successful write to a tracker
pub struct ProgressWriter<W> {
    inner: W,
    tracker: Arc<ProgressTracker>,
    written: u64,
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            inner,
            tracker,
            written: 0,
        }
    }

    /// Bytes written through this writer
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.written += *n as u64;
            this.tracker.add(*n as u64);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
