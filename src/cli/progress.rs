//! Fetch progress for the command-line interface

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar counting fetched tiles
pub fn create_progress_bar(total_tiles: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_tiles);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} tiles ({percent}%) ETA: {eta}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Owns the bar and turns fetcher callbacks into updates
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_tiles: u64, message: &str) -> Self {
        eprintln!("{message}");
        Self {
            pb: create_progress_bar(total_tiles),
        }
    }

    /// Callback for the fetcher: (tiles finished, tiles requested).
    pub fn callback(&self) -> ahn_dl::ProgressCallback {
        let pb = self.pb.clone();
        std::sync::Arc::new(move |done, total| {
            if pb.length().unwrap_or(0) != total {
                pb.set_length(total);
            }
            pb.set_position(done);
            if done >= total {
                pb.finish_with_message("Fetch completed");
            }
        })
    }
}
