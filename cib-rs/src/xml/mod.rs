//! XML parsing and output.
//!
//! Documents are read into owned [`Element`](crate::node::Element) trees and
//! written back in either the canonical single-line form used for digests or
//! an indented form used on disk.

mod file;
mod parser;
mod printer;

pub use file::{is_compressed_path, parse_file, write_file, BZIP2_SUFFIX};
pub use parser::{parse_bytes, parse_reader, parse_str, XmlParser};
pub use printer::{dump_formatted, dump_unformatted, XmlPrinter, XmlPrinterOptions};
