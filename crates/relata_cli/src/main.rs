//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `relata_core` linkage with deterministic output.
//! - Optionally validate a mapping JSON document passed as first argument.
//! - Run a tiny in-memory create/commit/reload round trip.
//!
//! Set `RELATA_LOG_DIR` to an absolute directory to write rolling logs, and
//! `RELATA_LOG` to level directives such as `warn,transaction=debug`.

use log::info;
use relata_core::mapping::Cardinality;
use relata_core::{
    ClassDefinition, ClientTransaction, CoreResult, InMemoryPersistenceProvider,
    LoggingConfig, MappingConfiguration, PropertyDefinition, RelationPropertyDefinition, ValueType,
};
use std::process::ExitCode;
use std::rc::Rc;

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var("RELATA_LOG_DIR") {
        let directives = std::env::var("RELATA_LOG").unwrap_or_default();
        let started = LoggingConfig::with_default_level(log_dir)
            .with_directives(&directives)
            .and_then(|config| relata_core::init_logging(&config));
        if let Err(err) = started {
            eprintln!("logging status=error error={err}");
            return ExitCode::FAILURE;
        }
    }
    println!("relata_core version={}", relata_core::core_version());

    if let Some(path) = std::env::args().nth(1) {
        match validate_mapping(&path) {
            Ok(summary) => println!("mapping status=ok {summary}"),
            Err(err) => {
                eprintln!("mapping status=error path={path} error={err}");
                return ExitCode::FAILURE;
            }
        }
    }

    match round_trip() {
        Ok(orders) => {
            info!("event=round_trip module=cli status=ok orders={orders}");
            println!("round_trip status=ok orders={orders}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("round_trip status=error kind={:?} error={err}", err.kind());
            ExitCode::FAILURE
        }
    }
}

fn validate_mapping(path: &str) -> Result<String, String> {
    let json = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    let mapping = MappingConfiguration::from_json(&json).map_err(|err| err.to_string())?;
    let classes = mapping.class_names().count();
    let relations: usize = mapping
        .class_names()
        .filter_map(|name| mapping.class(name))
        .map(|class| {
            class
                .relations
                .iter()
                .filter(|relation| relation.cardinality == Cardinality::Many)
                .count()
        })
        .sum();
    Ok(format!("classes={classes} collection_relations={relations}"))
}

fn round_trip() -> CoreResult<usize> {
    let mapping = Rc::new(MappingConfiguration::build(vec![
        ClassDefinition::new("Customer")
            .with_property(PropertyDefinition::new("Name", ValueType::Text))
            .with_relation(
                RelationPropertyDefinition::many("Orders", "Order")
                    .with_opposite("Customer")
                    .sorted_by("Number"),
            ),
        ClassDefinition::new("Order")
            .with_property(PropertyDefinition::new("Number", ValueType::Int))
            .with_relation(
                RelationPropertyDefinition::one("Customer", "Customer").with_opposite("Orders"),
            ),
    ])?);
    let provider = Rc::new(InMemoryPersistenceProvider::new());

    let writer = ClientTransaction::new_root(mapping.clone(), provider.clone());
    let customer = writer.new_object("Customer")?;
    writer.set_value(&customer, "Name", "smoke")?;
    for number in [2, 1] {
        let order = writer.new_object("Order")?;
        writer.set_value(&order, "Number", number)?;
        writer.add_related(&customer, "Orders", &order)?;
    }
    writer.commit()?;

    let reader = ClientTransaction::new_root(mapping, provider);
    let reloaded = reader.get_object(customer.id())?;
    Ok(reader.collection(&reloaded, "Orders")?.len()?)
}
