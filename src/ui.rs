//! Console surface: progress stages for slow CLI steps and the operator
//! prompt for unknown plates.

use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::access::{DecisionProvider, Verdict};
use crate::Direction;

/// Unanswerable prompts give up after this many invalid lines.
const MAX_PROMPT_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let use_pretty = self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            };

        if use_pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

// -------------------- Operator prompt --------------------

/// Asks the operator on stdin whether an unknown vehicle may pass.
///
/// Sessions prompt from their own flow threads; the lock keeps two questions
/// from interleaving on the terminal. End of input, read errors and repeated
/// nonsense all count as deny.
pub struct ConsolePrompt {
    lock: Mutex<()>,
    interactive: bool,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            interactive: std::io::stdin().is_terminal(),
        }
    }
}

impl Default for ConsolePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionProvider for ConsolePrompt {
    fn confirm(&self, plate: &str, direction: Direction) -> Verdict {
        let Ok(_guard) = self.lock.lock() else {
            log::error!("console prompt lock poisoned; denying {}", plate);
            return Verdict::Deny;
        };
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        match ask(&mut input, &mut output, plate, direction) {
            Ok(verdict) => verdict,
            Err(err) => {
                log::error!("operator prompt failed for {}: {}; denying", plate, err);
                Verdict::Deny
            }
        }
    }

    fn notify(&self, message: &str) {
        log::warn!("operator notice: {}", message);
        println!("!! {}", message);
    }

    fn notify_blocking(&self, message: &str) {
        log::warn!("operator notice: {}", message);
        let Ok(_guard) = self.lock.lock() else {
            return;
        };
        println!("!! {}", message);
        if self.interactive {
            print!("Press Enter to continue...");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
        }
    }
}

fn ask<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    plate: &str,
    direction: Direction,
) -> Result<Verdict> {
    for _ in 0..MAX_PROMPT_ATTEMPTS {
        write!(
            output,
            "Vehicle {} ({}) is not registered. Let it through? [y/N] ",
            plate, direction
        )?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(anyhow!("end of input"));
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(Verdict::Allow),
            "" | "n" | "no" => return Ok(Verdict::Deny),
            _ => writeln!(output, "Please answer y or n.")?,
        }
    }
    Ok(Verdict::Deny)
}
