use crate::error::Result;
use super::types::DeclarationFile;
use std::path::Path;

/// Parse a model declaration file (YAML) into a DeclarationFile
pub fn parse_declarations(path: &Path) -> Result<DeclarationFile> {
    let content = std::fs::read_to_string(path)?;
    parse_declarations_str(&content)
}

/// Parse a declaration YAML string into a DeclarationFile
pub fn parse_declarations_str(content: &str) -> Result<DeclarationFile> {
    let file: DeclarationFile = serde_yaml::from_str(content)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CascadePolicy, IndexKey, SortOrder};

    const DECLARATIONS: &str = r#"
defaults:
  host: localhost
  port: 27017
  databases:
    main: blog
models:
  - name: Author
    database: main
    indices:
      - { keys: [first_name], unique: true }
  - name: Post
    database: main
    indices:
      - keys: [{ field: published, order: desc }, title]
    references:
      - { field: author, target: Author, on_delete: cascade }
      - { field: editor, target: Author, on_delete: error }
      - { field: reviewer, target: Author }
"#;

    #[test]
    fn test_parse_declarations() {
        let file = parse_declarations_str(DECLARATIONS).unwrap();
        assert_eq!(file.defaults.port, Some(27017));
        assert_eq!(file.defaults.database_name("main"), "blog");
        assert_eq!(file.models.len(), 2);

        let author = &file.models[0];
        assert_eq!(author.name, "Author");
        assert!(author.indices[0].unique);
        assert_eq!(author.indices[0].index_name(), "first_name_1");

        let post = &file.models[1];
        assert_eq!(
            post.indices[0].keys[0],
            IndexKey::Ordered { field: "published".into(), order: SortOrder::Descending }
        );
        assert_eq!(post.indices[0].index_name(), "published_-1_title_1");
        assert_eq!(post.references[0].on_delete, CascadePolicy::Cascade);
        assert_eq!(post.references[1].on_delete, CascadePolicy::Deny);
        assert_eq!(post.references[2].on_delete, CascadePolicy::Nothing);
    }

    #[test]
    fn test_parse_empty_file_uses_defaults() {
        let file = parse_declarations_str("{}").unwrap();
        assert_eq!(file.defaults.host.as_deref(), Some("localhost"));
        assert!(file.defaults.auto_index);
        assert!(file.models.is_empty());
    }

    #[test]
    fn test_parse_declarations_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("models.yaml");
        std::fs::write(&path, DECLARATIONS).unwrap();
        let file = parse_declarations(&path).unwrap();
        assert_eq!(file.models[1].references.len(), 3);
    }
}
