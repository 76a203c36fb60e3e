use std::path::{Path, PathBuf};
use time::macros::date;
use time::Date;

/// How the hypergraph stage finds the date of each thread's root post.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatingStrategy {
    /// Keep a `post_id -> date` map for the whole corpus during a single pass.
    InMemory,
    /// Build the hyperedges first, then re-read the shards keeping dates for root ids only.
    TwoPass,
}

/// User-facing options with sensible defaults and builder chaining.
#[derive(Clone, Debug)]
pub struct ETLOptions {
    pub base_dir: PathBuf,            // raw corpus root holding chunk_* directories
    pub out_dir: PathBuf,             // canonical shards land here
    pub results_dir: PathBuf,         // registries, lang map, edge lists, hypergraph
    pub users_registry: Option<PathBuf>, // if None, results_dir/enc_users.txt
    pub uris_registry: Option<PathBuf>,  // if None, results_dir/enc_uris.txt
    pub lang_map: Option<PathBuf>,       // if None, results_dir/language_mapping.json
    pub min_date: Date,               // inclusive lower bound for createdAt
    pub resume: bool,                 // skip chunks whose shard already exists
    pub checkpoint_registries: bool,  // rewrite registries after every finished shard
    pub dating: DatingStrategy,
    pub parallelism: Option<usize>,   // Some(N) to set rayon threads, None to use default
    pub progress: bool,               // show progress bar
    pub progress_label: Option<String>, // optional label for progress bar

    // IO tuning
    pub read_buffer_bytes: usize,     // BufReader capacity
    pub write_buffer_bytes: usize,    // BufWriter capacity
    pub compression_level: u32,       // gzip level for every .gz we write
}

impl Default for ETLOptions {
    fn default() -> Self {
        let default_read = 256 * 1024;
        let default_write = 256 * 1024;

        Self {
            base_dir: PathBuf::from("../data_collection/data"),
            out_dir: PathBuf::from("results/clean"),
            results_dir: PathBuf::from("results"),
            users_registry: None,
            uris_registry: None,
            lang_map: None,
            // first day of the collection window
            min_date: date!(2023 - 02 - 17),
            resume: false,
            checkpoint_registries: false,
            dating: DatingStrategy::InMemory,
            parallelism: None,
            progress: true,
            progress_label: None,

            read_buffer_bytes: default_read,
            write_buffer_bytes: default_write,
            compression_level: 6,
        }
    }
}

impl ETLOptions {
    pub fn with_base_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.base_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_out_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.out_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_results_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.results_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_users_registry(mut self, path: impl AsRef<Path>) -> Self {
        self.users_registry = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn with_uris_registry(mut self, path: impl AsRef<Path>) -> Self {
        self.uris_registry = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn with_lang_map(mut self, path: impl AsRef<Path>) -> Self {
        self.lang_map = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn with_min_date(mut self, d: Date) -> Self {
        self.min_date = d;
        self
    }
    pub fn with_resume(mut self, yes: bool) -> Self {
        self.resume = yes;
        self
    }
    pub fn with_checkpoint_registries(mut self, yes: bool) -> Self {
        self.checkpoint_registries = yes;
        self
    }
    pub fn with_dating(mut self, dating: DatingStrategy) -> Self {
        self.dating = dating;
        self
    }
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }

    // IO buffers tuning
    pub fn with_io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self {
        self.read_buffer_bytes = read_bytes.max(8 * 1024);
        self.write_buffer_bytes = write_bytes.max(8 * 1024);
        self
    }
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    // Resolved paths
    pub fn users_registry_path(&self) -> PathBuf {
        self.users_registry.clone().unwrap_or_else(|| self.results_dir.join("enc_users.txt"))
    }
    pub fn uris_registry_path(&self) -> PathBuf {
        self.uris_registry.clone().unwrap_or_else(|| self.results_dir.join("enc_uris.txt"))
    }
    pub fn lang_map_path(&self) -> PathBuf {
        self.lang_map.clone().unwrap_or_else(|| self.results_dir.join("language_mapping.json"))
    }
}
