use clap::{Parser, Subcommand, ValueEnum};
use fireflex::{
    Adapter, AdapterConfig, AdapterOptions, MemoryBackend, MemoryStore, QueryDescriptor, RecordSnapshot,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process;

/// fireflex CLI: run adapter lookups, queries and writes against a JSON fixture
#[derive(Parser)]
#[command(name = "fireflex", version, about)]
struct Cli {
    /// JSON file holding the database tree
    #[arg(long)]
    data: PathBuf,

    /// Adapter config (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Print the whole tree after a write
    #[arg(long)]
    dump: bool,

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
    /// Find a single record by id
    Get {
        /// Model name (e.g. post)
        model: String,
        /// Record id
        id: String,
        /// Collection path override (e.g. /comments/post_a)
        #[arg(long)]
        path: Option<String>,
    },

    /// Find every record of a model
    List {
        model: String,
    },

    /// Run a query
    Query {
        model: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Run a query forced to a single result
    QueryRecord {
        model: String,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Check whether anything is stored at a path
    Exists {
        path: String,
    },

    /// Mint a new record id
    PushId {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Create or update a record
    Update {
        model: String,
        id: String,
        /// Attribute values (e.g. --field message="Hello")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Extra paths written in the same update (e.g. --include /userFeeds/user_a/:id=true)
        #[arg(long = "include", value_parser = parse_key_value)]
        include: Vec<(String, String)>,
        #[arg(long)]
        path: Option<String>,
    },

    /// Delete a record
    Delete {
        model: String,
        id: String,
        #[arg(long = "include", value_parser = parse_key_value)]
        include: Vec<(String, String)>,
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Path to query instead of the model's collection
    #[arg(long)]
    path: Option<String>,
    /// Child keys under --path name records of the model
    #[arg(long)]
    reference: bool,
    /// id, .value or an attribute name
    #[arg(long)]
    order_by: Option<String>,
    #[arg(long)]
    equal_to: Option<String>,
    #[arg(long)]
    start_at: Option<String>,
    #[arg(long)]
    end_at: Option<String>,
    #[arg(long, conflicts_with = "limit_to_last")]
    limit_to_first: Option<u32>,
    #[arg(long)]
    limit_to_last: Option<u32>,
}

impl QueryArgs {
    fn descriptor(&self) -> QueryDescriptor {
        let mut descriptor = QueryDescriptor::new();
        if let Some(path) = &self.path {
            descriptor = descriptor.path(path.as_str());
        }
        if self.reference {
            descriptor = descriptor.reference();
        }
        if let Some(field) = &self.order_by {
            descriptor = descriptor.order_by(field);
        }
        if let Some(v) = &self.equal_to {
            descriptor = descriptor.equal_to(parse_value(v));
        }
        if let Some(v) = &self.start_at {
            descriptor = descriptor.start_at(parse_value(v));
        }
        if let Some(v) = &self.end_at {
            descriptor = descriptor.end_at(parse_value(v));
        }
        if let Some(n) = self.limit_to_first {
            descriptor = descriptor.limit_to_first(n);
        }
        if let Some(n) = self.limit_to_last {
            descriptor = descriptor.limit_to_last(n);
        }
        descriptor
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Numbers, booleans, null and JSON literals parse as such; anything else is a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let tree: Value = serde_json::from_str(&std::fs::read_to_string(&cli.data)?)?;
    let config = match &cli.config {
        Some(path) => AdapterConfig::load(path)?,
        None => AdapterConfig::default(),
    };
    // A one-shot command has nothing to keep live
    let config = AdapterConfig {
        server_rendering: true,
        ..config
    };

    let backend = MemoryBackend::from_json(tree);
    let mut adapter = Adapter::new(backend.clone(), MemoryStore::new(), config);
    log::debug!("loaded {}", cli.data.display());

    match cli.command {
        Command::Get { model, id, path } => {
            let options = path.map(AdapterOptions::at_path).unwrap_or_default();
            let record = adapter.find_record(&model, &id, &options)?;
            print_output(&record.to_json(), &cli.format)?;
        }

        Command::List { model } => {
            let records = adapter.find_all(&model)?;
            print_output(&records_to_value(&records), &cli.format)?;
        }

        Command::Query { model, query } => {
            let result = adapter.query(&model, &query.descriptor())?;
            print_output(&records_to_value(&result.records()), &cli.format)?;
        }

        Command::QueryRecord { model, query } => {
            let record = adapter.query_record(&model, &query.descriptor())?;
            print_output(&record.to_json(), &cli.format)?;
        }

        Command::Exists { path } => {
            let exists = adapter.is_record_existing(&path)?;
            print_output(&serde_json::json!({ "path": path, "exists": exists }), &cli.format)?;
        }

        Command::PushId { path } => {
            print_output(&serde_json::json!({ "id": adapter.generate_id(&path) }), &cli.format)?;
        }

        Command::Update {
            model,
            id,
            fields,
            include,
            path,
        } => {
            let mut snapshot = RecordSnapshot::new(model, id.clone()).with_options(options(path, &include));
            for (name, raw) in &fields {
                snapshot = snapshot.attr(name, parse_value(raw));
            }
            adapter.update_record(&snapshot)?;
            print_write(&backend, &serde_json::json!({ "ok": true, "id": id }), cli.dump, &cli.format)?;
        }

        Command::Delete {
            model,
            id,
            include,
            path,
        } => {
            adapter.delete_record(&model, &id, &options(path, &include))?;
            print_write(&backend, &serde_json::json!({ "ok": true, "deleted": id }), cli.dump, &cli.format)?;
        }
    }

    Ok(())
}

fn options(path: Option<String>, include: &[(String, String)]) -> AdapterOptions {
    let mut options = path.map(AdapterOptions::at_path).unwrap_or_default();
    for (key, raw) in include {
        options = options.include(key.as_str(), parse_value(raw));
    }
    options
}

fn records_to_value(records: &[fireflex::Record]) -> Value {
    Value::Array(records.iter().map(|r| r.to_json()).collect())
}

fn print_write(
    backend: &MemoryBackend,
    summary: &Value,
    dump: bool,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if dump {
        print_output(&backend.export(), format)
    } else {
        print_output(summary, format)
    }
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
