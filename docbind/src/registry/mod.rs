//! Model registration.
//!
//! Registration has two phases. [`Registry::register`] resolves a
//! declaration, obtains its connection and collection binding and ensures its
//! indices, so configuration problems surface at declaration time.
//! [`Registry::finalize`] then wires every declared reference onto its target
//! type as a backward reference and freezes the result into a [`Catalog`].
//! Because wiring happens once at the end, reference targets may be declared
//! in any order.

use crate::client::{
    CollectionHandle, ConnectionHandle, DatabaseHandle, NullCollection, StoreClient,
};
use crate::error::{DocBindError, Result};
use crate::model::Model;
use crate::pool::ConnectionPool;
use crate::reference::BackwardReference;
use crate::schema::{resolve, DeclarationFile, Defaults, ModelDeclaration, ResolvedOptions};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Strategy that turns a database handle and a model's options into the
/// collection the model is bound to.
pub trait CollectionBinder: Send + Sync {
    fn bind(
        &self,
        database: &dyn DatabaseHandle,
        options: &ResolvedOptions,
    ) -> Result<Arc<dyn CollectionHandle>>;
}

/// Binds the collection named in the options, as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBinder;

impl CollectionBinder for DirectBinder {
    fn bind(
        &self,
        database: &dyn DatabaseHandle,
        options: &ResolvedOptions,
    ) -> Result<Arc<dyn CollectionHandle>> {
        database.collection(&options.collection)
    }
}

struct Registered {
    options: ResolvedOptions,
    collection: Arc<dyn CollectionHandle>,
    connection: Option<Arc<dyn ConnectionHandle>>,
}

pub struct Registry {
    defaults: Defaults,
    pool: Arc<ConnectionPool>,
    binder: Arc<dyn CollectionBinder>,
    registered: Vec<Registered>,
}

impl Registry {
    pub fn new(client: Arc<dyn StoreClient>, defaults: Defaults) -> Self {
        Self::with_pool(Arc::new(ConnectionPool::new(client)), defaults)
    }

    /// Share an existing pool, e.g. between several registries.
    pub fn with_pool(pool: Arc<ConnectionPool>, defaults: Defaults) -> Self {
        Registry {
            defaults,
            pool,
            binder: Arc::new(DirectBinder),
            registered: Vec::new(),
        }
    }

    pub fn with_binder(mut self, binder: Arc<dyn CollectionBinder>) -> Self {
        self.binder = binder;
        self
    }

    /// Registry with the file's defaults, every model in it registered in order.
    pub fn from_file(client: Arc<dyn StoreClient>, file: DeclarationFile) -> Result<Self> {
        let mut registry = Registry::new(client, file.defaults);
        registry.register_all(file.models)?;
        Ok(registry)
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    fn find(&self, name: &str) -> Option<&Registered> {
        self.registered.iter().find(|r| r.options.name == name)
    }

    /// Resolve and bind one model type.
    pub fn register(&mut self, decl: ModelDeclaration) -> Result<&ResolvedOptions> {
        if self.find(&decl.name).is_some() {
            return Err(DocBindError::config(&decl.name, "model is already registered"));
        }

        let parent = match &decl.extends {
            Some(parent) => Some(
                self.find(parent)
                    .map(|r| &r.options)
                    .ok_or_else(|| {
                        DocBindError::config(&decl.name, format!("extends unknown model '{parent}'"))
                    })?,
            ),
            None => None,
        };
        let options = resolve(decl, parent, &self.defaults)?;

        let (collection, connection) = if options.interface {
            log::debug!("Registering interface model {}", options.name);
            let placeholder: Arc<dyn CollectionHandle> =
                Arc::new(NullCollection::new(&options.name, &options.collection));
            (placeholder, None)
        } else {
            let target = options
                .target()
                .ok_or_else(|| DocBindError::config(&options.name, "missing connection settings"))?;
            let connection = self.pool.get_or_create(&target.host, target.port)?;
            let database = connection.database(&target.database)?;
            let collection = self.binder.bind(database.as_ref(), &options)?;
            log::debug!(
                "Registering model {} -> {}:{}/{}.{}",
                options.name,
                target.host,
                target.port,
                target.database,
                collection.name()
            );

            if options.auto_index {
                for index in &options.indices {
                    log::debug!("Ensuring index {} on {}", index.index_name(), collection.name());
                    collection.ensure_index(index)?;
                }
            }
            (collection, Some(connection))
        };

        self.registered.push(Registered {
            options,
            collection,
            connection,
        });
        let last = self.registered.len() - 1;
        Ok(&self.registered[last].options)
    }

    pub fn register_all(&mut self, decls: impl IntoIterator<Item = ModelDeclaration>) -> Result<()> {
        for decl in decls {
            self.register(decl)?;
        }
        Ok(())
    }

    /// Wire backward references and freeze every model.
    ///
    /// Entries on a target are ordered by registration order of the
    /// referencing type, then by the order of its reference declarations.
    pub fn finalize(self) -> Result<Catalog> {
        let index: HashMap<&str, usize> = self
            .registered
            .iter()
            .enumerate()
            .map(|(i, r)| (r.options.name.as_str(), i))
            .collect();

        let mut backward: Vec<Vec<BackwardReference>> = vec![Vec::new(); self.registered.len()];
        for referencing in &self.registered {
            let name = &referencing.options.name;
            for spec in &referencing.options.references {
                let target = *index.get(spec.target.as_str()).ok_or_else(|| {
                    DocBindError::config(
                        name,
                        format!("reference '{}' targets unknown model '{}'", spec.field, spec.target),
                    )
                })?;
                if referencing.options.interface {
                    log::warn!("Skipping reference {name}.{} declared on interface model", spec.field);
                    continue;
                }
                if self.registered[target].options.interface {
                    return Err(DocBindError::config(
                        name,
                        format!("reference '{}' targets interface model '{}'", spec.field, spec.target),
                    ));
                }

                log::debug!(
                    "Wiring {name}.{} -> {} ({})",
                    spec.field,
                    spec.target,
                    spec.on_delete
                );
                backward[target].push(BackwardReference {
                    field: spec.field.clone(),
                    referent: name.clone(),
                    referent_collection: Arc::clone(&referencing.collection),
                    policy: spec.on_delete,
                });
            }
        }

        let models: Vec<Arc<Model>> = self
            .registered
            .into_iter()
            .zip(backward)
            .map(|(r, refs)| Arc::new(Model::new(r.options, r.collection, r.connection, refs)))
            .collect();
        let by_name = models
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name().to_string(), i))
            .collect();

        Ok(Catalog {
            models,
            by_name,
            pool: self.pool,
        })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("defaults", &self.defaults)
            .field(
                "models",
                &self.registered.iter().map(|r| &r.options.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Frozen set of registered models.
#[derive(Debug)]
pub struct Catalog {
    models: Vec<Arc<Model>>,
    by_name: HashMap<String, usize>,
    pool: Arc<ConnectionPool>,
}

/// Summary of one model, for listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub name: String,
    pub collection: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub interface: bool,
    pub auto_index: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    pub indices: Vec<String>,
    pub backward_references: Vec<String>,
}

impl Catalog {
    pub fn get(&self, name: &str) -> Option<&Arc<Model>> {
        self.by_name.get(name).map(|&i| &self.models[i])
    }

    pub fn model(&self, name: &str) -> Result<Arc<Model>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| DocBindError::Other(format!("Unknown model '{name}'")))
    }

    /// Models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        self.models
            .iter()
            .map(|m| {
                let o = m.options();
                ModelStatus {
                    name: o.name.clone(),
                    collection: o.collection.clone(),
                    host: o.host.clone(),
                    port: o.port,
                    database: o.database.clone(),
                    interface: o.interface,
                    auto_index: o.auto_index,
                    extends: o.extends.clone(),
                    indices: o.indices.iter().map(|i| i.index_name()).collect(),
                    backward_references: m
                        .backward_references()
                        .iter()
                        .map(|b| b.to_string())
                        .collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Attr;
    use crate::mapper::FieldMapper;
    use crate::query::Filter;
    use crate::schema::{parse_declarations_str, CascadePolicy, IndexSpec};
    use crate::sqlite::SqliteClient;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::new(Arc::new(SqliteClient::in_memory()), Defaults::default())
    }

    fn config_message(err: DocBindError) -> String {
        match err {
            DocBindError::Configuration { message, .. } => message,
            other => panic!("expected configuration error, got {other}"),
        }
    }

    #[test]
    fn test_concrete_model_without_database_fails_at_register() {
        let mut registry = registry();
        let err = registry.register(ModelDeclaration::new("Orphan")).unwrap_err();
        assert_eq!(config_message(err), "missing database");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_interface_model_gets_placeholder_collection() {
        let defaults = Defaults {
            host: None,
            port: None,
            ..Defaults::default()
        };
        let mut registry = Registry::new(Arc::new(SqliteClient::in_memory()), defaults);
        registry.register(ModelDeclaration::new("Shape").interface()).unwrap();
        let catalog = registry.finalize().unwrap();

        let shape = catalog.model("Shape").unwrap();
        assert!(shape.is_interface());
        assert!(shape.connection().is_none());
        assert_eq!(shape.collection().name(), "shape");
        assert!(catalog.pool().is_empty());

        let mut doc = shape.new_document();
        assert!(matches!(shape.save(&mut doc), Err(DocBindError::InterfaceModel(ref m)) if m == "Shape"));
        assert!(matches!(shape.find(&Filter::new()), Err(DocBindError::InterfaceModel(_))));
    }

    #[test]
    fn test_same_host_and_port_share_one_connection() {
        let mut registry = registry();
        registry.register(ModelDeclaration::new("Author").database("blog")).unwrap();
        registry.register(ModelDeclaration::new("Event").database("audit")).unwrap();
        registry
            .register(ModelDeclaration::new("Remote").database("blog").port(27018))
            .unwrap();
        let catalog = registry.finalize().unwrap();

        let author = catalog.model("Author").unwrap();
        let event = catalog.model("Event").unwrap();
        let remote = catalog.model("Remote").unwrap();
        assert!(Arc::ptr_eq(author.connection().unwrap(), event.connection().unwrap()));
        assert!(!Arc::ptr_eq(author.connection().unwrap(), remote.connection().unwrap()));
        assert_eq!(catalog.pool().len(), 2);
    }

    #[test]
    fn test_registration_is_lazy_without_indices() {
        let mut registry = registry();
        registry.register(ModelDeclaration::new("Author").database("blog")).unwrap();
        let catalog = registry.finalize().unwrap();
        let author = catalog.model("Author").unwrap();
        assert!(!author.connection().unwrap().is_connected());
    }

    #[test]
    fn test_auto_index_at_registration() {
        let mut registry = registry();
        registry
            .register(
                ModelDeclaration::new("Account")
                    .database("bank")
                    .index(IndexSpec::new("email").unique())
                    .index(IndexSpec::new("created")),
            )
            .unwrap();
        let catalog = registry.finalize().unwrap();
        let accounts = catalog.model("Account").unwrap();

        let names: Vec<String> = accounts
            .index_information()
            .unwrap()
            .iter()
            .map(|i| i.index_name())
            .collect();
        assert_eq!(names, vec!["email_1", "created_1"]);

        let mut a = accounts.document(json!({ "email": "a@example.com" })).unwrap();
        accounts.save(&mut a).unwrap();
        let mut b = accounts.document(json!({ "email": "a@example.com" })).unwrap();
        assert!(matches!(accounts.save(&mut b), Err(DocBindError::DuplicateKey { .. })));
    }

    #[test]
    fn test_registering_twice_against_same_store_is_idempotent() {
        let pool = Arc::new(ConnectionPool::new(Arc::new(SqliteClient::in_memory())));
        for _ in 0..2 {
            let mut registry = Registry::with_pool(Arc::clone(&pool), Defaults::default());
            registry
                .register(ModelDeclaration::new("Account").database("bank").index(IndexSpec::new("email")))
                .unwrap();
        }
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_duplicate_model_name_is_rejected() {
        let mut registry = registry();
        registry.register(ModelDeclaration::new("Author").database("blog")).unwrap();
        let err = registry
            .register(ModelDeclaration::new("Author").database("blog"))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_backward_references_in_any_declaration_order() {
        let mut registry = registry();
        registry
            .register(
                ModelDeclaration::new("Post")
                    .database("blog")
                    .reference("author", "Author", CascadePolicy::Cascade)
                    .reference("editor", "Author", CascadePolicy::Nullify),
            )
            .unwrap();
        registry
            .register(
                ModelDeclaration::new("Comment")
                    .database("blog")
                    .reference("author", "Author", CascadePolicy::Deny),
            )
            .unwrap();
        registry.register(ModelDeclaration::new("Author").database("blog")).unwrap();
        let catalog = registry.finalize().unwrap();

        let author = catalog.model("Author").unwrap();
        let entries: Vec<String> = author
            .backward_references()
            .iter()
            .map(|b| b.to_string())
            .collect();
        assert_eq!(
            entries,
            vec![
                "Post.author (cascade)",
                "Post.editor (nullify)",
                "Comment.author (deny)",
            ]
        );
        assert!(catalog.model("Post").unwrap().backward_references().is_empty());
    }

    #[test]
    fn test_unknown_reference_target_fails_finalize() {
        let mut registry = registry();
        registry
            .register(
                ModelDeclaration::new("Post")
                    .database("blog")
                    .reference("author", "Ghost", CascadePolicy::Cascade),
            )
            .unwrap();
        let err = registry.finalize().unwrap_err();
        assert!(config_message(err).contains("unknown model 'Ghost'"));
    }

    #[test]
    fn test_reference_to_interface_fails_finalize() {
        let mut registry = registry();
        registry.register(ModelDeclaration::new("Shape").interface()).unwrap();
        registry
            .register(
                ModelDeclaration::new("Drawing")
                    .database("art")
                    .reference("shape", "Shape", CascadePolicy::Cascade),
            )
            .unwrap();
        assert!(registry.finalize().unwrap_err().is_configuration());
    }

    #[test]
    fn test_reference_between_interfaces_is_skipped() {
        let mut registry = registry();
        registry.register(ModelDeclaration::new("Shape").interface()).unwrap();
        registry
            .register(
                ModelDeclaration::new("Layer")
                    .interface()
                    .reference("shape", "Shape", CascadePolicy::Cascade),
            )
            .unwrap();
        let catalog = registry.finalize().unwrap();
        assert!(catalog.model("Shape").unwrap().backward_references().is_empty());
    }

    #[test]
    fn test_extends_inherits_references_and_indices() {
        let mut registry = registry();
        registry.register(ModelDeclaration::new("Author").database("blog")).unwrap();
        registry
            .register(
                ModelDeclaration::new("Authored")
                    .interface()
                    .index(IndexSpec::new("author"))
                    .reference("author", "Author", CascadePolicy::Cascade),
            )
            .unwrap();
        registry
            .register(ModelDeclaration::new("Post").database("blog").extends("Authored"))
            .unwrap();
        registry
            .register(ModelDeclaration::new("Photo").database("blog").extends("Authored"))
            .unwrap();
        let catalog = registry.finalize().unwrap();

        let author = catalog.model("Author").unwrap();
        let referents: Vec<&str> = author
            .backward_references()
            .iter()
            .map(|b| b.referent.as_str())
            .collect();
        assert_eq!(referents, vec!["Post", "Photo"]);
        assert_eq!(catalog.model("Photo").unwrap().index_information().unwrap().len(), 1);
    }

    #[test]
    fn test_extends_unknown_parent_fails() {
        let mut registry = registry();
        let err = registry
            .register(ModelDeclaration::new("Post").database("blog").extends("Nope"))
            .unwrap_err();
        assert!(config_message(err).contains("extends unknown model 'Nope'"));
    }

    #[test]
    fn test_custom_binder() {
        struct Prefixed;
        impl CollectionBinder for Prefixed {
            fn bind(
                &self,
                database: &dyn DatabaseHandle,
                options: &ResolvedOptions,
            ) -> Result<Arc<dyn CollectionHandle>> {
                database.collection(&format!("app_{}", options.collection))
            }
        }

        let mut registry = registry().with_binder(Arc::new(Prefixed));
        registry.register(ModelDeclaration::new("Author").database("blog")).unwrap();
        let catalog = registry.finalize().unwrap();
        assert_eq!(catalog.model("Author").unwrap().collection().name(), "app_author");
    }

    #[test]
    fn test_field_mapper_that_keeps_kind_fails_on_first_write() {
        let mut registry = registry();
        registry
            .register(ModelDeclaration::new("Thing").database("test").field_mapper(
                FieldMapper::for_field("x", |v| v.is_i64(), |v| json!(v.as_i64().unwrap_or_default() * 2)),
            ))
            .unwrap();
        let catalog = registry.finalize().unwrap();
        let things = catalog.model("Thing").unwrap();

        let mut doc = things.new_document();
        doc.set("y", 1).unwrap();
        let err = doc.set("x", 1).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, DocBindError::FieldMapper { ref field, .. } if field == "x"));
    }

    #[test]
    fn test_blog_scenario_from_yaml() {
        let file = parse_declarations_str(
            r#"
defaults:
  database: blog
models:
  - name: Author
    indices:
      - keys: [email]
        unique: true
  - name: BlogPost
    references:
      - { field: author, target: Author, on_delete: cascade }
  - name: Comment
    references:
      - { field: author, target: Author, on_delete: nullify }
"#,
        )
        .unwrap();
        let catalog = Registry::from_file(Arc::new(SqliteClient::in_memory()), file)
            .unwrap()
            .finalize()
            .unwrap();

        let authors = catalog.model("Author").unwrap();
        let posts = catalog.model("BlogPost").unwrap();
        let comments = catalog.model("Comment").unwrap();
        assert_eq!(posts.collection().name(), "blog_post");

        let mut ann = authors.document(json!({ "email": "ann@example.com" })).unwrap();
        authors.save(&mut ann).unwrap();
        let ann_ref = authors.reference_to(&mut ann, true).unwrap().to_value().unwrap();

        let mut post = posts.document(json!({ "title": "Hello", "author": ann_ref.clone() })).unwrap();
        posts.save(&mut post).unwrap();
        let mut comment = comments.document(json!({ "body": "Nice", "author": ann_ref })).unwrap();
        comments.save(&mut comment).unwrap();

        authors.remove(&mut ann).unwrap();

        assert_eq!(authors.count(&Filter::new()).unwrap(), 0);
        assert_eq!(posts.count(&Filter::new()).unwrap(), 0);
        let stored = comments.get(comment.id().unwrap()).unwrap().unwrap();
        assert!(stored.attr("author").is_err());
        assert_eq!(stored.attr("body").unwrap(), &json!("Nice"));

        let status = catalog.status();
        assert_eq!(status.len(), 3);
        assert_eq!(status[0].indices, vec!["email_1"]);
        assert_eq!(
            status[0].backward_references,
            vec!["BlogPost.author (cascade)", "Comment.author (nullify)"]
        );
    }
}
