//! Command line front end: inspect documents, or search them.
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indexmap::IndexSet;
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::field::Operator;
use crate::parsing::{self, Layout, ParsedFile};
use crate::prefs::{DEFAULT_PREFERENCES_FILE, Preferences};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// search arbitrary JSON documents through the typed fields they declare
#[derive(Parser, Debug)]
#[command(name = "saje", version)]
pub struct CommandLineInterface {
    /// log debug messages (RUST_LOG still applies otherwise)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// preference file, created with the defaults if missing
    #[arg(long, global = true, default_value = DEFAULT_PREFERENCES_FILE)]
    prefs: PathBuf,

    /// ignore the preference file and use the defaults
    #[arg(long, global = true, default_value_t = false)]
    no_prefs: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print the fields, layout and modes each document declares
    Inspect(InspectCmd),
    /// run a query against each document and print the matching records
    Search(SearchCmd),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// JSON Pointer to the SAJE document inside each file (e.g. /payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct InspectCmd {
    #[command(flatten)]
    input_settings: InputSettings,

    /// only list fields visible under these modes (comma separated)
    #[arg(long, value_delimiter = ',')]
    modes: Vec<String>,

    /// print a json description instead of text
    #[arg(long)]
    json: bool,
}

#[derive(clap::Parser, Debug)]
struct SearchCmd {
    #[command(flatten)]
    input_settings: InputSettings,

    /// query file: {"operator": "and" | "or", "criteria": {field name: criteria}}
    #[arg(long, short, conflicts_with = "criteria")]
    query: Option<PathBuf>,

    /// inline criteria object: {field name: criteria}
    #[arg(long, short)]
    criteria: Option<String>,

    /// how per-field outcomes combine; overrides the query file and preferences
    #[arg(long)]
    operator: Option<Operator>,

    /// restrict the query to fields visible under these modes (comma separated)
    #[arg(long, value_delimiter = ',')]
    modes: Vec<String>,

    /// print matching records as json instead of their display strings
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryFile {
    #[serde(default)]
    operator: Option<Operator>,
    #[serde(default)]
    criteria: Map<String, Value>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    /// Resolve, read and parse every input, in parallel.
    fn load_documents(&self) -> anyhow::Result<Vec<ParsedFile>> {
        let source_paths = resolve_file_path_patterns(&self.input)?;
        source_paths
            .par_iter()
            .map(|source_path| {
                self.load_document(source_path)
                    .with_context(|| format!("failed to load {}", source_path.display()))
            })
            .collect()
    }

    fn load_document(&self, source_path: &Path) -> anyhow::Result<ParsedFile> {
        let source = std::fs::read_to_string(source_path)?;
        let json_value = crate::path_de::from_str_with_path::<Value>(&source)?;
        let json_value = match self.json_pointer.as_deref() {
            None => json_value,
            Some(pointer) => match json_value.pointer(pointer) {
                Some(value) => value.clone(),
                None => bail!("JSON pointer {pointer} matches nothing"),
            },
        };
        let fallback_name = source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.display().to_string());
        Ok(parsing::parse_file(&json_value, &fallback_name)?)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn init_logging(&self) {
        let env = env_logger::Env::default().default_filter_or("warn");
        let mut builder = env_logger::Builder::from_env(env);
        if self.verbose {
            builder.filter_level(log::LevelFilter::Debug);
        }
        builder.init();
    }

    fn preferences(&self) -> Preferences {
        if self.no_prefs {
            Preferences::default()
        } else {
            Preferences::load_or_create(&self.prefs)
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let prefs = self.preferences();
        match &self.cmd {
            Command::Inspect(target) => {
                let documents = target.input_settings.load_documents()?;
                let selected: IndexSet<String> = target.modes.iter().cloned().collect();
                if target.json {
                    let out: Vec<Value> = documents.iter().map(|doc| describe_json(doc, &selected)).collect();
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    for doc in &documents {
                        print!("{}", describe_text(doc, &selected));
                    }
                }
            }
            Command::Search(target) => {
                let query = target.load_query()?;
                let operator = target.operator.or(query.operator).unwrap_or(prefs.operator);
                let selected: IndexSet<String> = target.modes.iter().cloned().collect();
                let documents = target.input_settings.load_documents()?;
                let mut json_out = Vec::new();
                for doc in &documents {
                    let mut criteria = query.criteria.clone();
                    if !selected.is_empty() {
                        let visible = doc.visible_fields(&selected);
                        criteria.retain(|name, _| {
                            let keep = visible.contains(&name.as_str());
                            if !keep {
                                log::warn!("`{}`: criteria on `{name}` ignored, field hidden by the selected modes", doc.name);
                            }
                            keep
                        });
                    }
                    let criteria = doc
                        .decode_query(&criteria, &prefs)
                        .with_context(|| format!("invalid query for `{}`", doc.name))?;
                    let hits = doc
                        .search(&criteria, operator)
                        .with_context(|| format!("search failed in `{}`", doc.name))?;
                    log::debug!("`{}`: {} of {} records match", doc.name, hits.len(), doc.database.len());
                    if target.json {
                        let records: Vec<Value> =
                            hits.iter().filter_map(|&i| doc.database.record(i)).cloned().collect();
                        json_out.push(json!({"name": doc.name, "matches": records}));
                    } else {
                        eprintln!("{} {}", doc.name.bold(), format!("({} matches)", hits.len()).dimmed());
                        let rendered = doc.render_all(&hits);
                        if !rendered.is_empty() {
                            println!("{}", rendered.join(prefs.separator.as_str()));
                        }
                    }
                }
                if target.json {
                    println!("{}", serde_json::to_string_pretty(&json_out)?);
                }
            }
        }
        Ok(())
    }
}

impl SearchCmd {
    fn load_query(&self) -> anyhow::Result<QueryFile> {
        if let Some(path) = self.query.as_ref() {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read query file {}", path.display()))?;
            let query = crate::path_de::from_str_with_path::<QueryFile>(&source)
                .with_context(|| format!("invalid query file {}", path.display()))?;
            return Ok(query);
        }
        let criteria = match self.criteria.as_deref() {
            Some(source) => crate::path_de::from_str_with_path::<Map<String, Value>>(source)
                .context("--criteria must be a json object")?,
            None => Map::new(),
        };
        Ok(QueryFile { operator: None, criteria })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn describe_text(doc: &ParsedFile, selected: &IndexSet<String>) -> String {
    let mut out = format!(
        "{} {} records, format {}\n",
        doc.name.bold(),
        doc.database.len(),
        doc.version
    );
    if !doc.modes.is_empty() {
        let modes: Vec<&str> = doc.modes.iter().map(String::as_str).collect();
        out.push_str(&format!("  modes: {}\n", modes.join(", ")));
    }
    let visible = (!selected.is_empty()).then(|| doc.visible_fields(selected));
    describe_layout(doc, &doc.layout, 1, visible.as_deref(), &mut out);
    out
}

fn describe_layout(doc: &ParsedFile, layout: &[Layout], depth: usize, visible: Option<&[&str]>, out: &mut String) {
    let indent = "  ".repeat(depth);
    for item in layout {
        match item {
            Layout::Group(items) => {
                out.push_str(&format!("{indent}{}\n", "group".dimmed()));
                describe_layout(doc, items, depth + 1, visible, out);
            }
            Layout::Field(name) => {
                if visible.is_some_and(|names| !names.contains(&name.as_str())) {
                    continue;
                }
                let Some(field) = doc.database.field(name) else { continue };
                let required = if field.optional { "" } else { " (required)" };
                out.push_str(&format!(
                    "{indent}{} {} at {}{required}\n",
                    name.green(),
                    field.kind.type_name().cyan(),
                    field.key,
                ));
            }
        }
    }
}

fn describe_json(doc: &ParsedFile, selected: &IndexSet<String>) -> Value {
    let visible = (!selected.is_empty()).then(|| doc.visible_fields(selected));
    let fields: Map<String, Value> = doc
        .database
        .fields()
        .iter()
        .filter(|(name, _)| visible.as_ref().is_none_or(|names| names.contains(&name.as_str())))
        .map(|(name, field)| (name.clone(), field.to_json()))
        .collect();
    json!({
        "name": doc.name,
        "version": doc.version.to_string(),
        "records": doc.database.len(),
        "fields": fields,
        "layout": doc.layout,
        "modes": doc.modes,
        "display_string": doc.display.to_json(),
    })
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_arguments() {
        let cli = CommandLineInterface::try_parse_from([
            "saje", "search", "-i", "a.json", "b.json", "--operator", "any", "--modes", "fiction,essay", "--no-prefs",
        ])
        .unwrap();
        assert!(cli.no_prefs);
        let Command::Search(search) = cli.cmd else { panic!("expected the search command") };
        assert_eq!(search.input_settings.input, ["a.json", "b.json"]);
        assert_eq!(search.operator, Some(Operator::Or));
        assert_eq!(search.modes, ["fiction", "essay"]);
    }

    #[test]
    fn query_and_criteria_conflict() {
        let parsed = CommandLineInterface::try_parse_from([
            "saje", "search", "-i", "a.json", "--query", "q.json", "--criteria", "{}",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn glob_patterns_resolve() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.json", "b.json", "c.txt"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        let pattern = format!("{}/*.json", dir.path().display());
        assert_eq!(resolve_file_path_patterns([pattern]).unwrap().len(), 2);

        let nothing = format!("{}/*.yaml", dir.path().display());
        assert!(resolve_file_path_patterns([nothing]).is_err());
        assert_eq!(resolve_file_path_patterns(["literal.json"]).unwrap(), [PathBuf::from("literal.json")]);
    }

    #[test]
    fn inline_criteria_must_be_an_object() {
        let cli = CommandLineInterface::try_parse_from(["saje", "search", "-i", "a.json", "--criteria", "[1]"]).unwrap();
        let Command::Search(search) = cli.cmd else { panic!("expected the search command") };
        assert!(search.load_query().is_err());
    }
}
