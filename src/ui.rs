//! Terminal output: spinners and colored summaries.
//!
//! Uses `indicatif` for the detection spinner and `console` for styling.

use std::path::Path;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{DetectorKind, SignConfig};
use crate::detect::DetectedTarget;
use crate::state_machine::UnlockMethod;
use crate::storage::LevelRecord;
use crate::tasks::PostTask;

/// Spinner shown while the detector works on an image.
pub struct DetectProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl DetectProgress {
    pub fn start(image: &Path) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Detecting targets in {}", image.display()));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Clears the spinner and prints the ordered targets.
    pub fn finish(&self, targets: &[DetectedTarget]) {
        self.pb.finish_and_clear();
        if targets.is_empty() {
            println!("  {} No targets detected", self.red.apply_to("✗"));
            return;
        }
        println!(
            "  {} {} targets, tap order:",
            self.green.apply_to("✓"),
            targets.len()
        );
        for (index, target) in targets.iter().enumerate() {
            println!("    {}", target_line(index, target));
        }
    }

    pub fn fail(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} Detection failed: {message}", self.red.apply_to("✗"));
    }
}

fn target_line(index: usize, target: &DetectedTarget) -> String {
    format!(
        "{:>2}. {:<12} offset ({:.0}, {:.0})  confidence {:.2}",
        index + 1,
        target.label,
        target.offset_x,
        target.offset_y,
        target.confidence
    )
}

/// Prints what a run with `config` would do.
pub fn print_check(config: &SignConfig, method: &UnlockMethod) {
    let heading = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!("{}", heading.apply_to("─── Configuration ───"));
    println!("  app:          {}", config.app_id);
    println!("  unlock:       {method} ({} attempts)", config.unlock.attempts);
    println!("  detector:     {}", detector_line(config));
    println!(
        "  challenge:    {} attempts, capture to {}",
        config.retry_times,
        config.capture_path.display()
    );
    println!("  runtime:      {} s budget", config.total_runtime_secs);
    println!("  tasks:        {}", task_line(config));
    println!(
        "  {}",
        dim.apply_to(format!("level history in {}", config.record_path.display()))
    );
}

fn detector_line(config: &SignConfig) -> String {
    let detector = &config.detector;
    match detector.kind {
        DetectorKind::Command => {
            let mut line = detector.program.clone();
            for arg in &detector.args {
                line.push(' ');
                line.push_str(arg);
            }
            line
        }
        DetectorKind::Http => format!("POST {}", detector.url),
    }
}

fn task_line(config: &SignConfig) -> String {
    let flags = &config.tasks;
    let mut names = Vec::new();
    if flags.browse_posts {
        names.push(PostTask::BrowsePosts.name().to_string());
    }
    names.extend(
        PostTask::after_sign_in(flags)
            .iter()
            .map(|task| match task {
                PostTask::WatchVideo { minutes } => format!("watch_video ({minutes} min)"),
                other => other.name().to_string(),
            }),
    );
    if flags.record_level {
        names.push(PostTask::RecordLevel.name().to_string());
    }
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

pub fn print_history(records: &[LevelRecord]) {
    if records.is_empty() {
        println!("  No level records yet");
        return;
    }
    let green = Style::new().green();
    println!("{}", Style::new().cyan().bold().apply_to("─── Growth history ───"));
    for record in records {
        println!(
            "  {}  {:>6}  total {}",
            record.date,
            green.apply_to(format!("+{}", record.gained)),
            record.total
        );
    }
}
