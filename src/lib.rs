pub mod error;
pub mod codec;
pub mod record;
pub mod block;
pub mod index;
pub mod container;

pub use error::{ArchiveError, Result};
pub use codec::CodecId;
pub use record::StoredFileRecord;
pub use block::{RawIndex, encode_raw_index, decode_raw_index};
pub use index::{ContainerIndex, IndexEntry, DirectoryTree, build_directory_tree};
pub use container::{ContainerFile, ContainerOptions, append_record, append_records, rebuild};
