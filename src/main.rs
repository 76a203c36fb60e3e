use anyhow::Result;
use skyetl::{DatingStrategy, SkyETL};
use std::path::PathBuf;

const DATA_ROOT: &str = "../data_collection/data";
const CLEAN_ROOT: &str = "./results/clean";
const RESULTS_ROOT: &str = "./results";
const LIKES_ROOT: &str = "../data_collection/feed_posts_likes";
const FOLLOW_LISTS_ROOT: &str = "../data_collection";

fn main() -> Result<()> {
    let hw = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(8);

    let etl = SkyETL::new()
        .base_dir(PathBuf::from(DATA_ROOT))
        .out_dir(PathBuf::from(CLEAN_ROOT))
        .results_dir(PathBuf::from(RESULTS_ROOT))
        .parallelism(hw)
        .resume(true)
        .checkpoint_registries(true)
        .dating(DatingStrategy::InMemory)
        .progress(true);

    if !etl.options().lang_map_path().exists() {
        let report = etl.clone().progress_label("Scanning languages").build_language_map()?;
        println!("Mapped {} language codes from {} files", report.codes, report.files);
    }

    let stats = etl.clone().progress_label("Canonicalizing").canonicalize()?;
    println!(
        "Kept {} of {} records ({} bad, {} schema, {} out of window, {} failed shards)",
        stats.kept, stats.total_lines, stats.bad_lines, stats.schema_errors, stats.out_of_window, stats.failed_shards
    );

    let likes_dir = PathBuf::from(LIKES_ROOT);
    if likes_dir.exists() {
        let likes = etl
            .clone()
            .progress_label("Likes")
            .encode_likes(&likes_dir, &PathBuf::from(RESULTS_ROOT).join("clean_feed_posts_likes"))?;
        println!("Encoded {} likes ({} bad, {} out of window)", likes.likes_written, likes.bad_lines, likes.out_of_window);
    }

    let edgelist = PathBuf::from(RESULTS_ROOT).join("edgelist.csv.gz");
    let joined = etl.clone().progress_label("Follow lists").join_follow_lists(&PathBuf::from(FOLLOW_LISTS_ROOT), &edgelist)?;
    if joined.edges > 0 {
        let follows = etl
            .clone()
            .progress_label("Follow edges")
            .encode_follow_edges(&edgelist, &PathBuf::from(RESULTS_ROOT).join("enc_edgelist.csv.gz"))?;
        println!("Wrote {} follow edges ({} new users)", follows.edges_written, follows.minted_users);
    }

    let inter = etl.clone().progress_label("Interactions").extract_interactions()?;
    println!("Wrote {} interaction edges", inter.edges());

    let hyper = etl.clone().progress_label("Hypergraph").extract_hypergraph()?;
    println!("Wrote {} hyperedges ({} undated)", hyper.hyperedges, hyper.undated);

    Ok(())
}
