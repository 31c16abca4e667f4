//! YAML load/store helpers.
//!
//! These helpers serialize the data model only. Comment-preserving emission
//! belongs to the storage layer, which reads and writes
//! [`Template::metadata_comments`](crate::Template::metadata_comments).

use std::path::Path;

use iambic_core::Result;
use tracing::debug;

use crate::template::Template;

/// Parse a template document.
pub fn from_yaml_str(text: &str) -> Result<Template> {
    Ok(serde_yaml::from_str(text)?)
}

/// Emit a template document.
pub fn to_yaml_string(template: &Template) -> Result<String> {
    Ok(serde_yaml::to_string(template)?)
}

/// Read a template file.
pub fn load(path: impl AsRef<Path>) -> Result<Template> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let template = from_yaml_str(&text)?;
    debug!(path = %path.display(), identifier = %template.identifier, "Loaded template");
    Ok(template)
}

/// Write a template file, creating parent directories.
pub fn store(path: impl AsRef<Path>, template: &Template) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_yaml_string(template)?)?;
    debug!(path = %path.display(), identifier = %template.identifier, "Stored template");
    Ok(())
}

/// Remove a template file; a missing file is not an error.
pub fn remove(path: impl AsRef<Path>) -> Result<()> {
    match std::fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aws/iam/role/admin.yaml");
        let template = Template::new("NOQ::AWS::IAM::Role", "admin")
            .with_property("RoleName", json!("admin"))
            .with_owner("platform");

        store(&path, &template).unwrap();
        assert_eq!(load(&path).unwrap(), template);

        remove(&path).unwrap();
        remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_yaml_is_serialization_error() {
        let err = from_yaml_str("template_type: [").unwrap_err();
        assert_eq!(err.kind(), iambic_core::ErrorKind::Storage);
    }
}
