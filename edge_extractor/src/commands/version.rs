//! `edge_extractor version`: print build metadata.

use colored::Colorize;

pub fn execute() {
    println!("{} {}", "edge_extractor".bold(), env!("CARGO_PKG_VERSION"));
    println!("target: {}", std::env::consts::OS);
}
