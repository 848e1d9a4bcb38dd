pub mod backend;
pub mod chain;
pub mod codec;
pub mod convert;
pub mod dispatcher;
pub mod dump;
pub mod model;
pub mod position;
pub mod uri;
pub mod xrepo;

pub use backend::{
    write_blob_database, write_graph_database, BackendKind, BlobBackend, GraphBackend, JsonBackend,
    StorageBackend,
};
pub use chain::*;
pub use codec::*;
pub use convert::*;
pub use dispatcher::*;
pub use dump::{parse_elements, parse_elements_limited, Edge, Element, LsifDump, MonikerRow};
pub use model::*;
pub use position::*;
pub use uri::*;
pub use xrepo::*;

pub use lsif_core::{BackendFlags, Location, LsifError, Position, Range, Result};
