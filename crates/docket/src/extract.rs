//! Multi-format text extraction for uploaded documents.
//!
//! Callers supply raw bytes plus the declared filename; this module
//! returns plain UTF-8 text. An unknown extension is the only hard
//! failure. A supported format whose decoder fails degrades to an
//! error-tagged text payload instead, so ingestion can still record
//! that the document exists even when its content is unusable.

use std::io::Read;

use tracing::warn;

use docket_core::error::ExtractError;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets processed in a spreadsheet.
const XLSX_MAX_SHEETS: usize = 100;

/// Extracted text plus a warning when the decoder failed and the text
/// is an error-tagged placeholder.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub warning: Option<String>,
}

/// Extract plain text from `bytes` according to the filename extension.
pub fn extract(bytes: &[u8], filename: &str) -> Result<Extraction, ExtractError> {
    let extension = extension_of(filename);
    let decoded = match extension.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" | "doc" => extract_docx(bytes),
        "xlsx" | "xls" => extract_xlsx(bytes),
        "csv" => Ok(render_delimited(bytes, ',')),
        "tsv" => Ok(render_delimited(bytes, '\t')),
        "txt" | "md" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => return Err(ExtractError::UnsupportedFormat { extension }),
    };

    Ok(match decoded {
        Ok(text) => Extraction {
            text,
            warning: None,
        },
        Err(reason) => {
            warn!(filename, %reason, "text extraction failed, recording placeholder");
            Extraction {
                text: format!("Error processing file: {reason}"),
                warning: Some(reason),
            }
        }
    })
}

fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}

/// Word documents: the text runs of `word/document.xml`, one line per
/// paragraph.
fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(quick_xml::events::Event::Text(text)) = reader.read_event_into(&mut buf) {
                    out.push_str(text.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) if e.local_name().as_ref() == b"p" => {
                if !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Spreadsheets: shared-string cells of every worksheet, joined with
/// spaces.
fn extract_xlsx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;

    let shared = read_shared_strings(&mut archive)?;

    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut cells: Vec<String> = Vec::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry(&mut archive, &name)?;
        collect_sheet_cells(&xml, &shared, &mut cells)?;
    }
    Ok(cells.join(" "))
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, String> {
    let xml = read_zip_entry(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_item = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => in_item = true,
                b"t" if in_item => {
                    if let Ok(quick_xml::events::Event::Text(text)) =
                        reader.read_event_into(&mut buf)
                    {
                        strings.push(text.unescape().unwrap_or_default().into_owned());
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::End(e)) if e.local_name().as_ref() == b"si" => {
                in_item = false;
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn collect_sheet_cells(
    xml: &[u8],
    shared: &[String],
    out: &mut Vec<String>,
) -> Result<(), String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().any(|a| {
                        a.map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(text)) if in_value => {
                if shared_cell {
                    if let Ok(index) = text.unescape().unwrap_or_default().trim().parse::<usize>() {
                        if let Some(s) = shared.get(index) {
                            out.push(s.clone());
                        }
                    }
                }
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => shared_cell = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!("ZIP entry {name} exceeds size limit"));
    }
    Ok(out)
}

/// Render a delimited file as plain rows, cells separated by two spaces.
fn render_delimited(bytes: &[u8], delimiter: char) -> String {
    let raw = String::from_utf8_lossy(bytes);
    let mut out = String::new();
    for line in raw.lines() {
        let cells: Vec<&str> = line
            .split(delimiter)
            .map(|c| c.trim().trim_matches('"'))
            .collect();
        out.push_str(&cells.join("  "));
        out.push('\n');
    }
    out
}
