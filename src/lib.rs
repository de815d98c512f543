pub mod archive;
pub mod config;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod model;
pub mod relations;
pub mod rpc;
pub mod source;

// Re-export main types
pub use archive::{fetch_archive_blocks, ArchiveClient, ArchiveQuery};
pub use config::{IngestConfig, ValidationFlags, MAX_RETRY_DEPTH};
pub use error::{BlockRef, Error, MappingError, Result};
pub use filter::{filter_block, IncludeSet, ItemFilter};
pub use mapping::map_block;
pub use model::{Block, DataRequest, FieldSelection, MappingRequest};
pub use relations::wire;
pub use rpc::{RawBlock, Rpc, RpcClient};
pub use source::{BlockBatch, RpcDataSource};
