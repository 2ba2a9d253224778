//! `khub search` and `khub repos`.
//!
//! Thin printers over [`App::search`] and [`App::list_repos`]; the ranking
//! itself lives in `knowledge_hub_core::search`.

use anyhow::Result;

use knowledge_hub_core::models::SearchResult;

use crate::app::App;
use crate::config::Config;

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    repo: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let app = App::open(config).await?;
    let results = app
        .search(query, repo.as_deref(), Some(mode), limit)
        .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print_results(&results);
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, result.score, result.repo_name);
        if !result.summary.is_empty() {
            println!("    summary: {}", result.summary);
        }
        if !result.labels.is_empty() {
            let labels: Vec<String> = result
                .labels
                .iter()
                .map(|l| format!("{}:{}", l.label, l.score))
                .collect();
            println!("    labels: {}", labels.join(", "));
        }
        println!("    excerpt: \"{}\"", excerpt(&result.content, 160));
        println!("    id: {}", result.id);
        println!();
    }
}

/// First `max_chars` characters on one line.
fn excerpt(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &flat[..end]),
        None => flat.to_string(),
    }
}

pub async fn run_repos(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let repos = app.list_repos().await?;
    if repos.is_empty() {
        println!("No repositories.");
    }
    for repo in repos {
        println!("{}", repo);
    }
    Ok(())
}
