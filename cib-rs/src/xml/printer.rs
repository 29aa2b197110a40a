//! Serializer for element trees.
//!
//! The unformatted form is the canonical single-line text that digests are
//! computed over, so its byte layout must not change: empty elements are
//! closed as `<tag/>`, attributes keep insertion order and values use the
//! same character references libxml2 emits.

use crate::node::Element;

/// Options for XML printing.
#[derive(Debug, Clone, Default)]
pub struct XmlPrinterOptions {
    /// Whether to pretty-print with indentation.
    pub pretty_print: bool,
}

/// Serializes an element tree into a string buffer.
pub struct XmlPrinter {
    out: String,
    options: XmlPrinterOptions,
}

impl XmlPrinter {
    /// Creates a printer producing the canonical unformatted form.
    pub fn new() -> Self {
        Self::with_options(XmlPrinterOptions::default())
    }

    /// Creates a printer with the given options.
    pub fn with_options(options: XmlPrinterOptions) -> Self {
        XmlPrinter {
            out: String::new(),
            options,
        }
    }

    /// Prints `root` and returns the accumulated text.
    pub fn print(mut self, root: &Element) -> String {
        self.print_element(root, 0);
        self.out
    }

    fn print_element(&mut self, element: &Element, depth: usize) {
        if self.options.pretty_print {
            self.out.push_str(&indent_str(depth));
        }

        self.out.push('<');
        self.out.push_str(element.name());
        for (name, value) in element.attributes() {
            self.out.push(' ');
            self.out.push_str(name);
            self.out.push_str("=\"");
            self.out.push_str(&to_entities(value));
            self.out.push('"');
        }

        if !element.has_children() {
            self.out.push_str("/>");
            self.newline();
            return;
        }

        self.out.push('>');
        self.newline();
        for child in element.children() {
            self.print_element(child, depth + 1);
        }

        if self.options.pretty_print {
            self.out.push_str(&indent_str(depth));
        }
        self.out.push_str("</");
        self.out.push_str(element.name());
        self.out.push('>');
        self.newline();
    }

    fn newline(&mut self) {
        if self.options.pretty_print {
            self.out.push('\n');
        }
    }
}

impl Default for XmlPrinter {
    fn default() -> Self {
        Self::new()
    }
}

fn indent_str(level: usize) -> String {
    "  ".repeat(level)
}

/// Converts special characters in attribute values to entities.
fn to_entities(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\n' => result.push_str("&#10;"),
            '\r' => result.push_str("&#13;"),
            '\t' => result.push_str("&#9;"),
            _ => result.push(c),
        }
    }
    result
}

/// Serializes `root` to the canonical single-line form.
pub fn dump_unformatted(root: &Element) -> String {
    XmlPrinter::new().print(root)
}

/// Serializes `root` with two-space indentation, one element per line.
pub fn dump_formatted(root: &Element) -> String {
    XmlPrinter::with_options(XmlPrinterOptions { pretty_print: true }).print(root)
}
