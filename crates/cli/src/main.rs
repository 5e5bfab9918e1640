use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use tal_api::{ApiConfig, HttpTransport};
use tal_engine::{Catalog, Lang, Session};
use tal_types::{FieldKind, Schema};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Fetch entities from the USOS API by field selector.
#[derive(Debug, Parser)]
#[command(name = "tal", version)]
struct Cli {
    /// Response language (`pl` or `en`); overrides the config file and `USOS_LANG`.
    #[arg(long, global = true)]
    lang: Option<String>,

    /// API base URL; overrides the config file and `USOS_API_BASE`.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Print compact instead of pretty JSON.
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one entity.
    Get {
        class: String,
        id: String,
        /// Field selector, e.g. `first_name|room[number]`; defaults to the class's default fields.
        #[arg(short, long)]
        fields: Option<String>,
    },
    /// Fetch several entities of one class; absent ids are left out.
    GetMany {
        class: String,
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(short, long)]
        fields: Option<String>,
    },
    /// List the entities of a class within a domain, e.g. `CourseEdition user`.
    List {
        class: String,
        domain: String,
        #[arg(short, long)]
        fields: Option<String>,
    },
    /// Full-text search over a searchable class.
    Search {
        class: String,
        query: String,
        #[arg(short, long)]
        fields: Option<String>,
    },
    /// Describe the entity classes, their fields and list domains.
    Classes,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let catalog = tal_registry::catalog().context("failed to build the method catalog")?;

    let output = match &cli.command {
        Command::Classes => describe_classes(&catalog),
        command => {
            let session = open_session(&cli, catalog)?;
            let output = run(&session, command)?;
            let stats = session.last_run_stats();
            debug!(rounds = stats.rounds, remote_calls = stats.remote_calls, cache_hits = stats.cache_hits, "command finished");
            output
        }
    };

    let rendered = if cli.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{rendered}");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_session(cli: &Cli, catalog: Arc<Catalog>) -> Result<Session> {
    let mut config = ApiConfig::load().context("failed to load API configuration")?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(lang) = &cli.lang {
        config.lang = lang.clone();
    }
    let lang: Lang = config.lang.parse().context("invalid response language")?;
    let transport = HttpTransport::new(&config).context("failed to create the API transport")?;
    info!(base_url = %transport.base_url(), lang = %lang, "using USOS API");
    Ok(Session::new(catalog, Arc::new(transport)).with_lang(lang))
}

fn run(session: &Session, command: &Command) -> Result<Value> {
    match command {
        Command::Get { class, id, fields } => {
            let entity = session
                .get(class, id, fields.as_deref())
                .with_context(|| format!("failed to get {class} '{id}'"))?;
            to_json(&entity)
        }
        Command::GetMany { class, ids, fields } => {
            let entities = session
                .get_many(class, ids, fields.as_deref())
                .with_context(|| format!("failed to get {class} entities"))?;
            to_json(&entities)
        }
        Command::List { class, domain, fields } => {
            let entities = session
                .list(class, domain, fields.as_deref())
                .with_context(|| format!("failed to list {class} in domain '{domain}'"))?;
            to_json(&entities)
        }
        Command::Search { class, query, fields } => {
            let results = session
                .search(class, query, fields.as_deref())
                .with_context(|| format!("failed to search {class} for '{query}'"))?;
            to_json(&results)
        }
        Command::Classes => Ok(describe_classes(session.catalog())),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to serialize the result")
}

fn describe_classes(catalog: &Catalog) -> Value {
    let schema = catalog.schema();
    let classes: Vec<Value> = schema
        .classes()
        .map(|class| {
            let fields: Vec<Value> = class
                .fields()
                .map(|field| {
                    json!({
                        "name": field.name,
                        "kind": kind_label(schema, &field.kind),
                        "default": field.default,
                        "variant": field.variant,
                    })
                })
                .collect();
            json!({
                "name": class.name,
                "searchable": catalog.search_method(class.id).is_some(),
                "list_domains": catalog.list_domains(class.id),
                "getters": catalog.getters(class.id).iter().map(|method| method.name()).collect::<Vec<_>>(),
                "fields": fields,
            })
        })
        .collect();
    Value::Array(classes)
}

fn kind_label(schema: &Schema, kind: &FieldKind) -> String {
    match kind {
        FieldKind::Scalar(data_type) => format!("{data_type:?}"),
        FieldKind::Entity(class) => schema.class(*class).name.clone(),
        FieldKind::OptionalEntity(class) => format!("{}?", schema.class(*class).name),
        FieldKind::EntityList(class) => format!("[{}]", schema.class(*class).name),
        FieldKind::EntityMap(class) => format!("{{{}}}", schema.class(*class).name),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_get_many_with_global_flags() {
        let cli = Cli::try_parse_from(["tal", "get-many", "User", "1", "2", "--fields", "first_name", "--lang", "en"]).unwrap();
        assert_eq!(cli.lang.as_deref(), Some("en"));
        match cli.command {
            Command::GetMany { class, ids, fields } => {
                assert_eq!(class, "User");
                assert_eq!(ids, ["1", "2"]);
                assert_eq!(fields.as_deref(), Some("first_name"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn get_many_needs_ids() {
        assert!(Cli::try_parse_from(["tal", "get-many", "User"]).is_err());
    }

    #[test]
    fn classes_describe_fields_and_surfaces() {
        let catalog = tal_registry::catalog().unwrap();
        let classes = describe_classes(&catalog);
        let user = classes
            .as_array()
            .unwrap()
            .iter()
            .find(|class| class["name"] == "User")
            .unwrap();
        assert_eq!(user["searchable"], true);
        assert_eq!(user["getters"][0], "services/users/user");
        let room = user["fields"].as_array().unwrap().iter().find(|field| field["name"] == "room").unwrap();
        assert_eq!(room["kind"], "Room?");
    }
}
