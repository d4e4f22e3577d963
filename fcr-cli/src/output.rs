//! Terminal output formatting.

use colored::Colorize;
use fcr_core::{unix_now, SubCidOffer};

/// Print a success message.
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg.red());
}

/// Print an info message.
pub fn info(msg: &str) {
    println!("{} {}", "→".cyan(), msg);
}

/// Print a warning message.
pub fn warn(msg: &str) {
    println!("{} {}", "!".yellow().bold(), msg.yellow());
}

/// Print a header.
pub fn header(msg: &str) {
    println!("\n{}", msg.white().bold());
    println!("{}", "─".repeat(msg.len()).dimmed());
}

/// Print a key-value pair.
pub fn kv(key: &str, value: &str) {
    println!("  {} {}", format!("{}:", key).dimmed(), value);
}

/// Print a helpful hint.
pub fn hint(msg: &str) {
    println!("{} {}", "💡".dimmed(), msg.dimmed());
}

/// Print one offer per line.
pub fn offers(offers: &[SubCidOffer]) {
    let now = unix_now();
    for (i, offer) in offers.iter().enumerate() {
        let remaining = offer.expiry.saturating_sub(now);
        println!(
            "  {} provider {} price {} qos {} expires in {}m",
            format!("[{}]", i + 1).dimmed(),
            offer.provider.to_string().cyan(),
            offer.price.to_string().yellow(),
            offer.qos,
            remaining / 60
        );
    }
}
