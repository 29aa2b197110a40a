//! Example: Generate a diff between two configuration documents
//!
//! Prints the diff, with a digest of the new version, to stdout.
//!
//! Usage: cargo run --example diff <old.xml> <new.xml>

use std::env;

use xml_cib::{diff_with_digest, dump_formatted, parse_file};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() != 3 {
        eprintln!("Usage: {} <old.xml> <new.xml>", args[0]);
        std::process::exit(1);
    }

    eprintln!("Parsing old: {}", args[1]);
    let old = parse_file(&args[1])?;

    eprintln!("Parsing new: {}", args[2]);
    let new = parse_file(&args[2])?;

    eprintln!("Generating diff...");
    match diff_with_digest(&old, &new, true) {
        Some(diff) => {
            println!("{}", dump_formatted(diff.as_element()));
            eprintln!("\nDiff generated successfully!");
        }
        None => eprintln!("Documents are equivalent, nothing to send."),
    }

    Ok(())
}
