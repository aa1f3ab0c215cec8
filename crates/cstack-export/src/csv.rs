//! Minimal RFC 4180 CSV formatting
//!
//! Fields containing commas, quotes or line breaks are quoted, with
//! embedded quotes doubled. Rows end in CRLF.

/// Quote a single field if it needs quoting
pub fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Format one row
pub fn format_row(fields: &[String]) -> String {
    let mut out = fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str("\r\n");
    out
}

/// Format a header row plus data rows into one CSV document
pub fn format_document(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = format_row(headers);
    for row in rows {
        out.push_str(&format_row(row));
    }
    out
}
