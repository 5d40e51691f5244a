use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// ── Terminal helpers ──────────────────────────────────────────────────────────

fn term_width() -> usize {
    Term::stdout().size().1.max(60) as usize
}

fn rule() -> String {
    style("─".repeat(term_width().min(52))).dim().to_string()
}

// ── Banner ────────────────────────────────────────────────────────────────────

pub fn print_banner() {
    println!();
    println!("{}", style("   ❄  nixos-infect").cyan().bold());
    println!(
        "{}",
        style("   Replace this Linux install with NixOS, in place  ·  v0.1.0")
            .dim()
            .italic()
    );
    println!();
    println!("{}", rule());
    println!();
}

// ── Step header ───────────────────────────────────────────────────────────────

/// Prints a visually distinct numbered step header.
pub fn print_step(step: u8, total: u8, title: &str) {
    println!();
    let tag = style(format!(" {}/{} ", step, total)).black().on_cyan().bold();
    let heading = style(format!("  {}", title)).white().bold();
    println!("{}{}", tag, heading);
    println!("{}", rule());
}

// ── Feedback messages ─────────────────────────────────────────────────────────

/// Green tick for a finished operation.
pub fn print_success(msg: &str) {
    println!("  {}  {}", style("✓").green().bold(), style(msg).green());
}

/// Neutral progress note.
pub fn print_info(msg: &str) {
    println!("  {}  {}", style("→").blue().bold(), msg);
}

/// Something the user should know about, but not fatal.
pub fn print_warning(msg: &str) {
    println!("  {}  {}", style("⚠").yellow().bold(), style(msg).yellow());
}

/// Fatal error, on stderr.
pub fn print_error(msg: &str) {
    eprintln!("  {}  {}", style("✗").red().bold(), style(msg).red());
}

// ── Info box ──────────────────────────────────────────────────────────────────

/// Renders a bordered key→value box in the terminal.
///
/// ```text
/// ┌─ Network ─────────────────────────────┐
/// │  Interface    ens3
/// │  Gateway      172.31.1.1
/// └────────────────────────────────────────┘
/// ```
pub fn print_kv_box(title: &str, rows: &[(&str, &str)]) {
    const BOX_INNER: usize = 38;

    let dashes = "─".repeat(BOX_INNER.saturating_sub(title.chars().count() + 2));
    println!(
        "  ┌─ {} {}┐",
        style(title).white().bold(),
        style(&dashes).dim()
    );

    for (key, val) in rows {
        let val: &str = if val.is_empty() { "—" } else { val };
        println!("  │  {:<13}{}", style(*key).dim(), style(val).white().bold());
    }

    println!("  └{}┘", style("─".repeat(BOX_INNER + 2)).dim());
}

/// Dumps a generated file under a dim header (dry-run output).
pub fn print_file(name: &str, contents: &str) {
    println!();
    println!("  {}", style(format!("── {} ──", name)).cyan().bold());
    print!("{}", contents);
}

// ── Spinner ───────────────────────────────────────────────────────────────────

/// Returns a running braille spinner.
/// Call `pb.finish_and_clear()` (or the `done_spinner` helper) when done.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let spin_style = ProgressStyle::with_template("  {spinner:.cyan.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);

    let pb = ProgressBar::new_spinner();
    pb.set_style(spin_style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Clears the spinner and prints a success message in its place.
pub fn done_spinner(pb: ProgressBar, msg: &str) {
    pb.finish_and_clear();
    print_success(msg);
}
