use clap::{Parser, Subcommand, ValueEnum};
use docbind::{
    parse_declarations, Catalog, Document, Filter, Model, Registry, SqliteClient, ID_FIELD,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// docbind CLI: inspect and edit documents of declared model types
#[derive(Parser)]
#[command(name = "docbind", version, about)]
struct Cli {
    /// Model declaration file
    #[arg(long, default_value = "models.yaml")]
    config: PathBuf,

    /// Directory holding the SQLite store files
    #[arg(long, default_value = ".docbind")]
    data_dir: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List registered models with their bindings and backward references
    Models,

    /// Get a single document by ID
    Get {
        /// Model name
        model: String,
        /// Document ID
        id: String,
    },

    /// List documents of a model
    Find {
        /// Model name
        model: String,
        /// Equality filters (e.g. --filter status=published)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Save a document, generating an ID if none is given
    Save {
        /// Model name
        model: String,
        /// Document ID
        #[arg(long)]
        id: Option<String>,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Set fields on an existing document
    Update {
        /// Model name
        model: String,
        /// Document ID
        id: String,
        /// Field values to set (e.g. --field status=published)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a document, applying the on-delete policies of references to it
    Delete {
        /// Model name
        model: String,
        /// Document ID
        id: String,
        /// Show what the removal would touch without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the reference value of a document
    Ref {
        /// Model name
        model: String,
        /// Document ID
        id: String,
        /// Leave the database name out of the reference
        #[arg(long)]
        no_database: bool,
    },

    /// List the indexes of a model's collection
    Indexes {
        /// Model name
        model: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn open_catalog(cli: &Cli) -> Result<Catalog, Box<dyn std::error::Error>> {
    let mut file = parse_declarations(&cli.config)
        .map_err(|e| format!("Failed to load '{}': {e}", cli.config.display()))?;
    file.defaults.apply_env()?;

    let client = Arc::new(SqliteClient::open_dir(&cli.data_dir));
    let catalog = Registry::from_file(client, file)?.finalize()?;
    log::debug!("Loaded {} model(s) from {}", catalog.len(), cli.config.display());
    Ok(catalog)
}

fn fetch(model: &Model, id: &str) -> Result<Document, Box<dyn std::error::Error>> {
    let mut doc = model.new_document();
    doc.set(ID_FIELD, parse_value(id))?;
    model.load(&mut doc, None)?;
    Ok(doc)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = open_catalog(&cli)?;

    match &cli.command {
        Command::Models => {
            let status = serde_json::to_value(catalog.status())?;
            print_output(&status, &cli.format)?;
        }

        Command::Get { model, id } => {
            let model = catalog.model(model)?;
            let doc = fetch(&model, id)?;
            print_output(&serde_json::to_value(doc.fields())?, &cli.format)?;
        }

        Command::Find { model, filters } => {
            let model = catalog.model(model)?;
            let filter: Filter = fields_to_map(filters);
            let docs = model
                .find(&filter)?
                .into_iter()
                .map(|d| Value::Object(d.into_fields().into_map()))
                .collect();
            print_output(&Value::Array(docs), &cli.format)?;
        }

        Command::Save { model, id, fields } => {
            let model = catalog.model(model)?;
            let mut doc = model.new_document();
            if let Some(id) = id {
                doc.set(ID_FIELD, parse_value(id))?;
            }
            doc.merge(fields_to_map(fields))?;
            model.save(&mut doc)?;
            print_output(&json!({ "ok": true, "id": doc.id() }), &cli.format)?;
        }

        Command::Update { model, id, fields } => {
            let model = catalog.model(model)?;
            let mut doc = fetch(&model, id)?;
            doc.merge(fields_to_map(fields))?;
            model.update(&doc, None)?;
            print_output(&json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Delete { model, id, dry_run } => {
            let model = catalog.model(model)?;
            let mut doc = fetch(&model, id)?;
            if *dry_run {
                let plan = model.removal_plan(&doc)?;
                print_output(
                    &json!({
                        "dry_run": true,
                        "allowed": plan.is_allowed(),
                        "would_delete": { "model": model.name(), "id": id },
                        "references": plan.steps,
                    }),
                    &cli.format,
                )?;
            } else {
                let outcome = model.remove(&mut doc)?;
                print_output(
                    &json!({ "ok": true, "deleted": id, "references": outcome.steps }),
                    &cli.format,
                )?;
            }
        }

        Command::Ref {
            model,
            id,
            no_database,
        } => {
            let model = catalog.model(model)?;
            let mut doc = fetch(&model, id)?;
            let reference = model.reference_to(&mut doc, !no_database)?;
            print_output(&reference.to_value()?, &cli.format)?;
        }

        Command::Indexes { model } => {
            let model = catalog.model(model)?;
            let indexes = serde_json::to_value(model.index_information()?)?;
            print_output(&indexes, &cli.format)?;
        }
    }

    Ok(())
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn fields_to_map(fields: &[(String, String)]) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        map.insert(key.clone(), parse_value(val));
    }
    map
}

/// Numbers, booleans, arrays and objects parse as JSON; anything else is a string.
fn parse_value(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("5"), json!(5));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("[1,2]"), json!([1, 2]));
        assert_eq!(parse_value("abc"), json!("abc"));
        assert_eq!(parse_value("Alice Chen"), json!("Alice Chen"));
    }

    #[test]
    fn test_id_option_matches_id_field() {
        let cli = Cli::try_parse_from([
            "docbind", "save", "Author", "--id", "5", "--field", "name=Ann",
        ])
        .unwrap();
        let Command::Save { id, .. } = cli.command else {
            panic!("expected save command");
        };
        let from_option = parse_value(id.as_deref().unwrap());

        let fields = vec![("_id".to_string(), "5".to_string())];
        let from_field = fields_to_map(&fields).remove(ID_FIELD).unwrap();

        assert_eq!(from_option, json!(5));
        assert_eq!(from_option, from_field);
    }
}
