//! hyperdoc CLI
//!
//! Command-line interface for checking resource models, reading request
//! documents and running atomic batches against an in-memory store.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use hyperdoc::{
    load_options, load_text_auto, Access, ApiError, AtomicSequencer, ChangeMode, ChangeSet,
    Document, DocumentReader, DocumentWriter, InMemoryStore, LoadError, LocalIdScope, Options,
    QueryParams, Registry, RequestContext, Resource, ResourceModel,
};

#[derive(Parser)]
#[command(name = "hyperdoc")]
#[command(about = "Check resource models, read documents and run atomic batches")]
#[command(version)]
struct Cli {
    /// Options file (JSON, camelCase keys): file path or URL
    #[arg(long, global = true)]
    config: Option<String>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the registry described by a model manifest
    Check {
        /// Model source: file path or URL (http:// or https://)
        model: String,

        /// Output the registry summary as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Read a resource document into a change-set
    Read {
        /// Model source: file path or URL
        model: String,

        /// Document to read
        document: String,

        /// Resource type the document is addressed to
        #[arg(long = "type", short = 't')]
        resource_type: String,

        /// Read as an update of the resource with this id (default: create)
        #[arg(long)]
        update: Option<String>,
    },

    /// Run an atomic operations request against an empty in-memory store
    Atomic {
        /// Model source: file path or URL
        model: String,

        /// Request body containing `atomic:operations`
        request: String,

        /// Maximum number of operations (overrides the config file)
        #[arg(long)]
        max: Option<usize>,

        /// After the batch, print every stored resource of this type
        #[arg(long)]
        dump: Option<String>,

        /// Query string shaping the dump, e.g. `include=tracks&fields[tags]=name`
        #[arg(long, requires = "dump", default_value = "")]
        query: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|options| match cli.command {
        Commands::Check { model, json } => run_check(&model, json, cli.pretty),
        Commands::Read {
            model,
            document,
            resource_type,
            update,
        } => run_read(
            &model,
            &document,
            &resource_type,
            update.as_deref(),
            options,
            cli.pretty,
        ),
        Commands::Atomic {
            model,
            request,
            max,
            dump,
            query,
        } => run_atomic(AtomicArgs {
            model,
            request,
            max,
            dump,
            query,
            options,
            pretty: cli.pretty,
        }),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn load_error(context: &str, e: &LoadError) -> u8 {
    eprintln!("Error {}: {}", context, e);
    e.exit_code() as u8
}

fn load_config(source: Option<&str>) -> Result<Options, u8> {
    match source {
        Some(source) => load_options(source).map_err(|e| load_error("loading config", &e)),
        None => Ok(Options::default()),
    }
}

fn load_registry(source: &str) -> Result<Registry, u8> {
    ResourceModel::load(source)
        .and_then(ResourceModel::build)
        .map_err(|e| load_error("loading model", &e))
}

fn print_json(value: &Value, pretty: bool) {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match output {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

fn run_check(model: &str, json_output: bool, pretty: bool) -> Result<(), u8> {
    let registry = match ResourceModel::load(model).and_then(ResourceModel::build) {
        Ok(registry) => registry,
        Err(e) => {
            if json_output {
                print_json(&json!({ "valid": false, "error": e.to_string() }), pretty);
            } else {
                eprintln!("Error: {}", e);
            }
            return Err(e.exit_code() as u8);
        }
    };

    if json_output {
        let resources: Vec<Value> = registry
            .resource_types()
            .map(|ty| {
                json!({
                    "name": ty.name(),
                    "idKind": ty.id_kind(),
                    "base": ty.base(),
                    "attributes": ty.attributes().iter().map(|a| a.name()).collect::<Vec<_>>(),
                    "relationships": ty.relationships().iter().map(|r| json!({
                        "name": r.name(),
                        "cardinality": r.cardinality(),
                        "target": r.related_type(),
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        print_json(&json!({ "valid": true, "resources": resources }), pretty);
    } else {
        for ty in registry.resource_types() {
            let base = ty.base().map(|b| format!(" extends {}", b)).unwrap_or_default();
            println!(
                "  {}{}: {} attributes, {} relationships",
                ty.name(),
                base,
                ty.attributes().len(),
                ty.relationships().len()
            );
        }
        println!("Valid: {} resource types", registry.len());
    }
    Ok(())
}

fn run_read(
    model: &str,
    document: &str,
    resource_type: &str,
    update: Option<&str>,
    options: Options,
    pretty: bool,
) -> Result<(), u8> {
    let registry = load_registry(model)?;
    let body = load_text_auto(document).map_err(|e| load_error("loading document", &e))?;

    let mut reader = DocumentReader::new(&registry, RequestContext::new(), options);
    let result = match update {
        Some(id) => reader.deserialize_update(&body, resource_type, id, LocalIdScope::Single),
        None => reader.deserialize(&body, resource_type, Access::Create, LocalIdScope::Single),
    };

    match result {
        Ok(changes) => {
            print_json(&change_set_json(&changes), pretty);
            Ok(())
        }
        Err(e) => {
            print_json(
                &Document::from_errors(vec![e.to_error_object()]).to_value(),
                pretty,
            );
            Err(1)
        }
    }
}

fn change_set_json(changes: &ChangeSet) -> Value {
    let attributes: Map<String, Value> = changes
        .attributes
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    let relationships: Map<String, Value> = changes
        .relationships
        .iter()
        .map(|(name, change)| {
            let mode = match change.mode {
                ChangeMode::Replace => "replace",
                ChangeMode::Add => "add",
                ChangeMode::Remove => "remove",
            };
            let targets: Vec<Value> = change
                .targets
                .iter()
                .map(|t| json!({ "type": t.resource_type, "id": t.id }))
                .collect();
            (name.clone(), json!({ "mode": mode, "targets": targets }))
        })
        .collect();
    json!({
        "type": changes.resource_type,
        "id": changes.id,
        "attributes": attributes,
        "relationships": relationships,
    })
}

struct AtomicArgs {
    model: String,
    request: String,
    max: Option<usize>,
    dump: Option<String>,
    query: String,
    options: Options,
    pretty: bool,
}

fn run_atomic(args: AtomicArgs) -> Result<(), u8> {
    let AtomicArgs {
        model,
        request,
        max,
        dump,
        query,
        options,
        pretty,
    } = args;

    // Inputs are loaded before the runtime exists; remote loading blocks.
    let registry = Arc::new(load_registry(&model)?);
    let body = load_text_auto(&request).map_err(|e| load_error("loading request", &e))?;
    let params = QueryParams::parse(&query).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    let options = match max {
        Some(max) => options.max_atomic_operations(max),
        None => options,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| {
            eprintln!("Error starting runtime: {}", e);
            3u8
        })?;

    let store = InMemoryStore::new(registry.clone());
    let mut sequencer = AtomicSequencer::new(&registry, &store, options.clone());
    let result = runtime.block_on(sequencer.run_body(&body));
    print_json(&result.to_document().to_value(), pretty);

    if let Some(resource_type) = dump {
        let stored = store.all(&resource_type);
        let resources: Vec<&dyn Resource> = stored.iter().map(|r| r.as_ref()).collect();
        let mut writer = DocumentWriter::new(
            &registry,
            RequestContext::new().selection(params.fields),
            options,
        );
        match writer.serialize(resources, &params.include) {
            Ok(document) => print_json(&document.to_value(), pretty),
            Err(e) => {
                print_json(
                    &Document::from_errors(vec![e.to_error_object()]).to_value(),
                    pretty,
                );
                return Err(1);
            }
        }
    }

    if result.is_committed() {
        Ok(())
    } else {
        Err(1)
    }
}
