//! Replays the query cases under `samples/` against their documents.
//!
//! Usage: `dev-test-runner [NAME_REGEX]`; only cases whose name matches the
//! pattern run.
use std::path::{Path, PathBuf};

use regex::Regex;
use saje::field::Operator;
use saje::parsing::{self, ParsedFile};
use saje::prefs::Preferences;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseFile {
    document: PathBuf,
    cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Case {
    name: String,
    #[serde(default)]
    operator: Operator,
    criteria: Map<String, Value>,
    #[serde(default)]
    expect: Vec<String>,
    #[serde(default)]
    error: bool,
}

fn samples_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("samples")
}

fn case_files() -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(samples_dir()) {
        Ok(entries) => entries,
        Err(error) => panic!("failed to read the samples directory: {error}"),
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.to_string_lossy().ends_with(".cases.json"))
        .collect();
    paths.sort();
    paths
}

fn load_document(path: &Path) -> Result<ParsedFile, String> {
    let source = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let doc = saje::path_de::from_str_with_path::<Value>(&source).map_err(|e| e.to_string())?;
    let fallback = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    parsing::parse_file(&doc, &fallback).map_err(|e| e.to_string())
}

/// `Ok` with a short note, or `Err` with what went wrong.
fn run_case(doc: &ParsedFile, case: &Case, prefs: &Preferences) -> Result<String, String> {
    let outcome = doc
        .decode_query(&case.criteria, prefs)
        .and_then(|criteria| doc.search(&criteria, case.operator));
    match (outcome, case.error) {
        (Err(error), true) => Ok(format!("rejected: {error}")),
        (Err(error), false) => Err(format!("unexpected error: {error}")),
        (Ok(hits), true) => Err(format!("expected an error, got {} matches", hits.len())),
        (Ok(hits), false) => {
            let rendered: Vec<String> = doc.render_all(&hits).into_iter().map(|s| s.into_owned()).collect();
            if rendered == case.expect {
                Ok(format!("{} matches", rendered.len()))
            } else {
                Err(format!("expected {:#?}\ngot {:#?}", case.expect, rendered))
            }
        }
    }
}

fn main() {
    let filter = std::env::args().nth(1).map(|pattern| match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(error) => panic!("invalid name filter: {error}"),
    });
    let prefs = Preferences::default();
    let mut failed = 0usize;
    let mut passed = 0usize;

    for case_path in case_files() {
        eprintln!("—— {} ——", case_path.display());
        let source = match std::fs::read_to_string(&case_path) {
            Ok(x) => x,
            Err(error) => panic!("failed to read case file: {error}"),
        };
        let case_file = match saje::path_de::from_str_with_path::<CaseFile>(&source) {
            Ok(x) => x,
            Err(error) => panic!("invalid case file ({}): {error}", case_path.display()),
        };
        let doc = match load_document(&samples_dir().join(&case_file.document)) {
            Ok(doc) => doc,
            Err(error) => {
                eprintln!("❌ failed to load {}: {error}", case_file.document.display());
                failed += case_file.cases.len();
                continue;
            }
        };
        for case in &case_file.cases {
            if filter.as_ref().is_some_and(|re| !re.is_match(&case.name)) {
                continue;
            }
            match run_case(&doc, case, &prefs) {
                Ok(note) => {
                    passed += 1;
                    eprintln!("✅ {} ({note})", case.name);
                }
                Err(error) => {
                    failed += 1;
                    eprintln!("❌ {}: {error}", case.name);
                }
            }
        }
    }

    eprintln!("{passed} passed, {failed} failed");
    if failed > 0 {
        std::process::exit(1);
    }
}
