mod config;
mod date;
mod paths;
mod codec;
mod registry;
mod envelope;

mod sanitize;
mod langmap;
mod canonical;
mod progress;
mod util;
mod mem;
mod pipeline;

mod interactions;
mod hypergraph;
mod follows;
mod likes;
mod integrity;

pub use crate::config::{DatingStrategy, ETLOptions};
pub use crate::pipeline::SkyETL;

// Components usable without the file layer.
pub use crate::registry::{Id, LoadReport, Registry, WriterLock};
pub use crate::envelope::{did_from_at_uri, Envelope, RecordRef};
pub use crate::canonical::{
    instance_of, parse_minimal, post_key, CanonicalPost, CanonicalStats, Canonicalizer, DropReason, MinimalPost, NullCounts,
};
pub use crate::sanitize::{sanitize_mentions, SanitizedText};
pub use crate::date::{accept_time, classify_time, classify_time_value, compact_date, day_string, parse_timestamp, valid_time, Validity};
pub use crate::langmap::{LangTag, LanguageMap, LanguageMapReport};

pub use crate::interactions::{edges_of, InteractionEdge, InteractionKind, InteractionStats};
pub use crate::hypergraph::{Hyperedge, HypergraphBuilder, HypergraphStats};
pub use crate::follows::{FollowJoinStats, FollowStats};
pub use crate::likes::{encode_like, EncodedLike, LikeStats};

// Expose multiprogress and progress helpers.
pub use crate::progress::{make_count_progress, make_progress_bar_labeled, set_global_multiprogress};

// Expose memory helpers for adaptive throttling from the binary.
pub use crate::mem::{available_memory_fraction, is_low_memory};

// Integrity checks, plus the raw validators and line readers.
pub use crate::integrity::{IntegrityMode, IntegrityTarget};
pub use crate::codec::{for_each_line, quick_validate, validate_full, Codec, GzLineWriter, StreamEnd};
pub use crate::paths::{discover_chunk_files, discover_named, discover_shards, ChunkJob};

//export robust file ops from util so binaries can import from crate root.
pub use crate::util::{create_with_backoff, open_with_backoff, remove_with_backoff, replace_file_atomic_backoff};
