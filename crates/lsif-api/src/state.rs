use crate::metrics::Metrics;
use crate::upload::TMP_DIR;
use lsif_core::{Result, Settings};
use lsif_query::Databases;
use lsif_storage::{
    BuiltinConverter, Converter, CrossRepoIndex, ExternalConverter, MultiBackend,
    SqliteCrossRepoIndex,
};
use std::sync::Arc;
use tracing::info;

/// File name of the cross-repository index inside the storage root.
pub const XREPO_FILE: &str = "xrepo.db";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub databases: Arc<Databases>,
    pub converter: Arc<dyn Converter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Prepare the storage root and open the cross-repository index inside it.
    pub async fn new(settings: Settings) -> Result<Self> {
        let root = settings.storage.root.clone();
        tokio::fs::create_dir_all(root.join(TMP_DIR)).await?;

        let xrepo: Arc<dyn CrossRepoIndex> =
            Arc::new(SqliteCrossRepoIndex::open(&root.join(XREPO_FILE))?);
        let converter: Arc<dyn Converter> = match &settings.converter.binary {
            Some(binary) => Arc::new(ExternalConverter::new(binary)),
            None => Arc::new(BuiltinConverter),
        };
        info!(
            storage_root = %root.display(),
            external_converter = settings.converter.binary.is_some(),
            "Initialized application state"
        );
        Self::with_parts(settings, xrepo, converter)
    }

    pub fn with_parts(
        settings: Settings,
        xrepo: Arc<dyn CrossRepoIndex>,
        converter: Arc<dyn Converter>,
    ) -> Result<Self> {
        let databases = Databases::new(
            settings.storage.root.clone(),
            MultiBackend::new(settings.backends),
            &settings.cache,
            xrepo,
        );
        Ok(Self {
            settings: Arc::new(settings),
            databases,
            converter,
            metrics: Arc::new(Metrics::new()?),
        })
    }
}
