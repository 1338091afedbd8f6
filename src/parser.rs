//! XML Parser Module
//!
//! This module decodes DMARC aggregate report XML into a [`Report`] and validates it.
//! Before the document is handed to the deserializer it is scanned once with a plain
//! event reader: that pass enforces a nesting depth limit and rejects any DOCTYPE that
//! declares entities, which shuts out external entity (XXE) and Billion Laughs style
//! documents. Real aggregate reports never declare entities.

use crate::error::{ReportError, Result};
use crate::models::Report;
use crate::validate::validate_report;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// Nesting limit for the structural scan. A well-formed report nests about six deep.
const MAX_DEPTH: u32 = 20;

/// Root element name used when encoding.
const ROOT: &str = "feedback";

/// Parses and validates one DMARC aggregate report.
///
/// # Errors
///
/// Returns a parse-class [`ReportError`] if the bytes are not UTF-8, are not
/// well-formed XML, exceed the nesting limit, declare entities, or do not decode into
/// the report shape. Returns [`ReportError::Validation`] with the first rule the
/// decoded report breaks.
pub fn parse_report(bytes: &[u8]) -> Result<Report> {
    let report = decode_report(bytes)?;
    validate_report(&report)?;
    Ok(report)
}

/// Decodes a report without running semantic validation.
pub fn decode_report(bytes: &[u8]) -> Result<Report> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    check_structure(text)?;
    let report = quick_xml::de::from_str(text)?;
    Ok(report)
}

/// Serializes a report back into aggregate report XML.
pub fn encode_report(report: &Report) -> Result<String> {
    quick_xml::se::to_string_with_root(ROOT, report).map_err(|e| ReportError::Encode(e.to_string()))
}

/// Walks the whole document once, failing on syntax errors, excessive nesting and
/// entity declarations.
fn check_structure(xml: &str) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    let mut depth: u32 = 0;
    loop {
        match reader.read_event()? {
            Event::Start(_) => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(ReportError::Rejected(format!(
                        "nesting deeper than {} elements",
                        MAX_DEPTH
                    )));
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::DocType(doctype) => {
                let body = String::from_utf8_lossy(&doctype);
                if body.contains("<!ENTITY") {
                    return Err(ReportError::Rejected(
                        "DOCTYPE entity declarations are not allowed".into(),
                    ));
                }
            }
            Event::Eof if depth > 0 => {
                return Err(ReportError::Rejected("document ends inside an open element".into()))
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}
