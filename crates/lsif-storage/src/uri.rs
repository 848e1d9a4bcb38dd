use std::sync::Arc;

/// Maps request paths onto the URIs stored in a dump and back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriTransformer {
    project_root: Option<String>,
}

/// Builds a transformer from a dump's `projectRoot`.
pub type UriTransformerFactory = Arc<dyn Fn(&str) -> UriTransformer + Send + Sync>;

impl UriTransformer {
    /// Paths and URIs pass through unchanged.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn for_project_root(project_root: &str) -> Self {
        let root = project_root.trim_end_matches('/');
        Self {
            project_root: (!root.is_empty()).then(|| root.to_string()),
        }
    }

    pub fn project_root(&self) -> Option<&str> {
        self.project_root.as_deref()
    }

    pub fn to_database(&self, path: &str) -> String {
        match &self.project_root {
            Some(root) => format!("{}/{}", root, path.trim_start_matches('/')),
            None => path.to_string(),
        }
    }

    pub fn from_database(&self, uri: &str) -> String {
        self.project_root
            .as_ref()
            .and_then(|root| uri.strip_prefix(root.as_str()))
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(uri)
            .to_string()
    }
}

pub fn project_root_factory() -> UriTransformerFactory {
    Arc::new(UriTransformer::for_project_root)
}
