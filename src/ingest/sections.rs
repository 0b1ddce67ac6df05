use lazy_static::lazy_static;
use log::{ info, warn };
use regex::Regex;
use serde_json::{ Map, Value };
use std::path::{ Path, PathBuf };
use walkdir::WalkDir;

use super::tables::METHODS_TEXT_FILE;
use super::{ ensure_dir, read_text, write_json, IngestError };

pub const FUNDAMENTALS_TEXT_FILE: &str = "FundamentalsofCooking10.txt";
pub const SECTIONS_FILE: &str = "foc_sections.json";
pub const GLOSSARY_KEY: &str = "Glossary";

lazy_static! {
    static ref PAGE_HEADER: Regex = Regex::new(r"(?m)^\d+FUNDAMENTALS OF COOKING\s*$").unwrap();
    static ref GLOSSARY_HEADING: Regex = Regex::new(r"(?i)\bGlossary\b").unwrap();
    static ref SECTION_HEADING: Regex = Regex::new(r"(\d+(?:\.\d+)+)([^\n]+)").unwrap();
    static ref STOP_KEYWORD: Regex =
        Regex::new(r"(?i)\b(Exercise|Activity|Teacher's guide|Glossary)\b").unwrap();
    static ref MULTI_SPACE: Regex = Regex::new(r" {2,}").unwrap();
    static ref GLOSSARY_ENTRY: Regex = Regex::new(r"([A-Z][A-Za-z\s]+?)\s*[-–]\s*").unwrap();
    static ref GLOSSARY_TERM_START: Regex = Regex::new(r"[A-Z][a-z]+\s*[-–]").unwrap();
}

fn normalize_whitespace(text: &str) -> String {
    MULTI_SPACE.replace_all(&text.trim().replace('\n', " "), " ").into_owned()
}

/// Pulls numbered sections (`2.1 Title ...`) and the trailing glossary out of
/// the textbook's plain-text export.
pub fn extract_sections(text: &str) -> Map<String, Value> {
    let text = PAGE_HEADER.replace_all(text, "");
    let text = text.as_ref();
    let mut sections = Map::new();

    let headings: Vec<_> = SECTION_HEADING.captures_iter(text).collect();
    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(title)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        let start = whole.end();
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let mut body = &text[start..end];
        if let Some(stop) = STOP_KEYWORD.find(body) {
            body = &body[..stop.start()];
        }

        let body = normalize_whitespace(body);
        if !body.is_empty() {
            sections.insert(title.as_str().trim().to_string(), Value::String(body));
        }
    }

    if let Some(heading) = GLOSSARY_HEADING.find(text) {
        let glossary = extract_glossary(text[heading.end()..].trim());
        if !glossary.is_empty() {
            sections.insert(GLOSSARY_KEY.to_string(), Value::Object(glossary));
        }
    }

    sections
}

/// Parses `Term - definition` entries. A definition runs until the next
/// capitalised word followed by a dash.
pub fn extract_glossary(text: &str) -> Map<String, Value> {
    let mut glossary = Map::new();
    let mut pos = 0;

    while let Some(caps) = GLOSSARY_ENTRY.captures_at(text, pos) {
        let (Some(whole), Some(term)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let def_start = whole.end();
        let def_end = GLOSSARY_TERM_START
            .find_at(text, def_start)
            .map(|m| m.start())
            .unwrap_or(text.len());

        let definition = normalize_whitespace(&text[def_start..def_end]);
        if !definition.is_empty() {
            glossary.insert(term.as_str().trim().to_string(), Value::String(definition));
        }
        pos = def_end;
    }

    glossary
}

fn find_text_export(raw_dir: &Path) -> Option<PathBuf> {
    let preferred = raw_dir.join(FUNDAMENTALS_TEXT_FILE);
    if preferred.exists() {
        return Some(preferred);
    }
    let mut candidates: Vec<PathBuf> = WalkDir::new(raw_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "txt"))
        .filter(|p| p.file_name().map_or(true, |n| n != METHODS_TEXT_FILE))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Extracts sections from the textbook export in `raw_dir` into
/// `foc_sections.json`. Returns the output path, or `None` without an export.
pub fn process_text_sections(raw_dir: &Path, output_dir: &Path) -> Result<Option<PathBuf>, IngestError> {
    let Some(source) = find_text_export(raw_dir) else {
        warn!("x No textbook text export (*.txt) found in {}.", raw_dir.display());
        return Ok(None);
    };
    ensure_dir(output_dir)?;

    let sections = extract_sections(&read_text(&source)?);
    let out = output_dir.join(SECTIONS_FILE);
    write_json(&out, &sections)?;
    info!("✓ Processed {} ({} sections)", source.display(), sections.len());
    Ok(Some(out))
}
