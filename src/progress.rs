//! Run progress: one bar counting finished input files.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static GLOBAL_MP: OnceLock<Arc<MultiProgress>> = OnceLock::new();

/// Draw run bars inside `mp` instead of straight to the terminal. Only the
/// first call takes effect.
pub fn set_global_multiprogress(mp: Arc<MultiProgress>) {
    let _ = GLOBAL_MP.set(mp);
}

const FILES_TEMPLATE: &str =
    "{spinner:.green} {prefix} {pos}/{len} files [{bar:.cyan/blue}] {percent:>3}%  {msg}  elapsed: {elapsed_precise}";

fn files_bar(total: u64, label: String) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let bar = match GLOBAL_MP.get() {
        Some(mp) => mp.add(bar),
        None => bar,
    };
    let style = ProgressStyle::with_template(FILES_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
    bar.set_style(style);
    bar.set_prefix(label);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Finished files out of discovered files. A disabled scope does nothing.
pub struct ProgressScope {
    pb: Option<ProgressBar>,
}

impl ProgressScope {
    pub fn files<T: Into<String>>(label: T, total: u64, enabled: bool) -> Self {
        Self { pb: enabled.then(|| files_bar(total, label.into())) }
    }

    /// Count one more file as done and show its name.
    pub fn file_done(&self, name: &str) {
        if let Some(pb) = &self.pb {
            pb.set_message(name.to_string());
            pb.inc(1);
        }
    }

    pub fn finish<T: Into<String>>(&self, msg: T) {
        if let Some(pb) = &self.pb {
            pb.finish_with_message(msg.into());
        }
    }
}
