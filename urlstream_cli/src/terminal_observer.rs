use indicatif::{ProgressBar, ProgressStyle};

use urlstream_core::stream::{Completion, StreamObserver};
use urlstream_core::types::types::{DownloadState, TransportError};

/// Renders a download stream as an indicatif bar.
///
/// The bar starts as a spinner and switches to a sized bar once the
/// transport reports the expected length.
pub struct TerminalProgressObserver {
    bar: ProgressBar,
    sized: bool,
}

impl TerminalProgressObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_message("waiting");
        Self { bar, sized: false }
    }

    fn ensure_sized(&mut self, total: u64) {
        if self.sized {
            return;
        }
        let style = ProgressStyle::with_template(
            "[{bar:30.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta} — {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
        self.bar.set_style(style);
        self.bar.set_length(total);
        self.sized = true;
    }
}

impl StreamObserver<DownloadState, TransportError> for TerminalProgressObserver {
    fn on_value(&mut self, value: &DownloadState) {
        match value {
            DownloadState::Uninitiated => self.bar.set_message("uninitiated"),
            DownloadState::WaitingForResponse => self.bar.set_message("waiting for response"),
            DownloadState::Downloading(progress) => {
                if !progress.is_indeterminate() {
                    self.ensure_sized(progress.total_units as u64);
                }
                self.bar.set_message("downloading");
                self.bar.set_position(progress.completed_units.max(0) as u64);
            }
            DownloadState::Completed(_) => {
                let total = format_bytes(self.bar.position());
                self.bar.finish_with_message(format!("complete — {}", total));
            }
        }
    }

    fn on_terminal(&mut self, completion: &Completion<TransportError>) {
        if let Completion::Failed(err) = completion {
            self.bar.abandon_with_message(format!("failed: {}", err));
        }
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}
