use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(icon: &str, text: &str) {
    println!("{} {}", icon, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!("{} {}: {}", Icons::INFO.style(theme().info.clone()), label.style(theme().dim.clone()), value);
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

pub fn empty(label: &str) {
    println!("{} {}", Icons::EMPTY, label.style(theme().dim.clone()));
}

pub fn file_deleted(path: &str) {
    println!("{} {}", Icons::DEL.style(theme().error.clone()), path);
}

pub fn timing(elapsed: &str) {
    println!("{} {}", Icons::CLOCK.style(theme().dim.clone()), dim(elapsed));
}

/// Print the diagnostic trail, highlighting error lines
pub fn diagnostics(log: &str) {
    if log.is_empty() {
        return;
    }
    println!();
    header(Icons::LOG, "Diagnostics");
    for line in log.lines() {
        if line.starts_with("Error:") {
            println!("  {}", line.style(theme().error.clone()));
        } else {
            println!("  {}", dim(line));
        }
    }
}
