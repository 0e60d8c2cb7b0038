use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{}: {}", label.cyan(), value);
}

/// Render `rows` under `header` as a rounded table.
pub fn print_table(header: &[&str], rows: &[Vec<String>]) {
    let mut builder = Builder::default();
    builder.push_record(header.iter().copied());
    for row in rows {
        builder.push_record(row.iter().map(String::as_str));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");
}
