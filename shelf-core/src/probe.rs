use std::sync::Arc;

use serde::Serialize;

use crate::precache::PrecacheController;
use crate::repo::{BlobStore, CatalogIndex};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub blob_store: bool,
    pub catalog: bool,
    /// Shell-asset precache. Reported for diagnostics only.
    pub precache: bool,
}

impl Capabilities {
    pub fn is_supported(&self) -> bool {
        self.blob_store && self.catalog
    }
}

/// Side-effect-free check of the storage primitives, evaluated on every call.
#[derive(Clone)]
pub struct CapabilityProbe {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogIndex>,
    precache: Option<Arc<PrecacheController>>,
}

impl CapabilityProbe {
    pub fn new(blobs: Arc<dyn BlobStore>, catalog: Arc<dyn CatalogIndex>) -> Self {
        Self {
            blobs,
            catalog,
            precache: None,
        }
    }

    pub fn with_precache(mut self, precache: Arc<PrecacheController>) -> Self {
        self.precache = Some(precache);
        self
    }

    pub fn probe(&self) -> Capabilities {
        Capabilities {
            blob_store: self.blobs.is_available(),
            catalog: self.catalog.is_available(),
            precache: self.precache.as_ref().is_some_and(|p| p.is_available()),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.probe().is_supported()
    }
}
