// Configuration resolver: one declaration + process defaults -> resolved options

use super::types::{Defaults, IdStrategy, IndexSpec, ModelDeclaration, ReferenceSpec};
use crate::error::{DocBindError, Result};
use crate::mapper::FieldMap;
use crate::util::to_snake;

/// Where a concrete model's collection lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
}

/// Read-only options of one model type, after defaults and inheritance.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub name: String,
    pub collection: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub indices: Vec<IndexSpec>,
    pub references: Vec<ReferenceSpec>,
    pub field_map: FieldMap,
    pub interface: bool,
    pub auto_index: bool,
    pub id_strategy: IdStrategy,
    pub extends: Option<String>,
}

impl ResolvedOptions {
    /// Host, port and database, when all three are known.
    pub fn target(&self) -> Option<StoreTarget> {
        Some(StoreTarget {
            host: self.host.clone()?,
            port: self.port?,
            database: self.database.clone()?,
        })
    }
}

/// Merge a declaration with its parent's options (if it extends one) and the
/// process-wide defaults.
///
/// Fails when a concrete type ends up without host, port or database.
/// Interface-only types never fail for missing connection settings.
pub fn resolve(
    decl: ModelDeclaration,
    parent: Option<&ResolvedOptions>,
    defaults: &Defaults,
) -> Result<ResolvedOptions> {
    if decl.name.trim().is_empty() {
        return Err(DocBindError::config(&decl.name, "model name is empty"));
    }

    let collection = match decl.collection {
        Some(name) if !name.is_empty() => name,
        _ => to_snake(&decl.name),
    };

    let host = decl
        .host
        .or_else(|| parent.and_then(|p| p.host.clone()))
        .or_else(|| defaults.host.clone());
    let port = decl
        .port
        .or_else(|| parent.and_then(|p| p.port))
        .or(defaults.port);
    let database = decl
        .database
        .map(|logical| defaults.database_name(&logical))
        .or_else(|| parent.and_then(|p| p.database.clone()))
        .or_else(|| defaults.database.as_deref().map(|d| defaults.database_name(d)));

    let indices = match (decl.indices.is_empty(), parent) {
        (true, Some(p)) => p.indices.clone(),
        _ => decl.indices,
    };
    let references = match (decl.references.is_empty(), parent) {
        (true, Some(p)) => p.references.clone(),
        _ => decl.references,
    };
    let field_map = match (decl.field_map.is_empty(), parent) {
        (true, Some(p)) => p.field_map.clone(),
        _ => FieldMap::new(decl.field_map),
    };
    let auto_index = decl
        .auto_index
        .or_else(|| parent.map(|p| p.auto_index))
        .unwrap_or(defaults.auto_index);
    let id_strategy = decl
        .id_strategy
        .or_else(|| parent.map(|p| p.id_strategy))
        .unwrap_or(defaults.id_strategy);

    let resolved = ResolvedOptions {
        name: decl.name,
        collection,
        host,
        port,
        database,
        indices,
        references,
        field_map,
        interface: decl.interface,
        auto_index,
        id_strategy,
        extends: decl.extends,
    };

    if !resolved.interface {
        let mut missing = Vec::new();
        if resolved.host.is_none() {
            missing.push("host");
        }
        if resolved.port.is_none() {
            missing.push("port");
        }
        if resolved.database.is_none() {
            missing.push("database");
        }
        if !missing.is_empty() {
            return Err(DocBindError::config(
                &resolved.name,
                format!("missing {}", missing.join(", ")),
            ));
        }
    }

    Ok(resolved)
}
