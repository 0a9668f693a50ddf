use guru_pdf::{DetectingExtractor, DocumentExtractor, Extraction};

use std::path::PathBuf;

fn main() {
    let path = std::env::args_os().nth(1).map(PathBuf::from);

    let Some(path) = path else {
        eprintln!("Usage: cargo run -p guru-pdf --example extract_text -- <file>");
        std::process::exit(2);
    };

    let data = std::fs::read(&path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {e}", path.display());
        std::process::exit(1);
    });

    match DetectingExtractor::new().extract(&data) {
        Extraction::Text(text) => println!("{text}"),
        Extraction::Failed { reason } => {
            eprintln!("Failed to extract {}: {reason}", path.display());
            std::process::exit(1);
        }
    }
}
