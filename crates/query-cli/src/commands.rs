use crate::config::{Config, OutputFormat};
use crate::fixture::Fixture;
use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color, Table as ComfyTable};
use query_core::{CancellationToken, QueryPage, Value};
use query_distributed::CrossPartitionQuery;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Drain a fixture query page by page, printing each page and its continuation
pub async fn drain_fixture(
    fixture_path: &Path,
    continuation: Option<&str>,
    max_pages: Option<usize>,
    config: &Config,
) -> Result<()> {
    let start = Instant::now();
    let fixture = Fixture::load(fixture_path)?;
    let container = Arc::new(fixture.container());
    let plan = fixture.plan();

    println!(
        "{} Draining {} documents across {} partitions",
        "→".bright_blue(),
        fixture.documents.len(),
        container.ranges().len()
    );

    let mut query = CrossPartitionQuery::create(
        container.clone(),
        container.clone(),
        &plan,
        container.ranges(),
        continuation,
        config.execution(),
    )
    .await?;

    let cancellation = CancellationToken::new();
    let mut pages = 0usize;
    let mut documents = 0usize;
    while !query.is_done() && max_pages.map_or(true, |max| pages < max) {
        let page = query.next_page(&cancellation).await?;
        pages += 1;
        documents += page.len();
        print_page(pages, &page, config);
    }

    println!();
    println!(
        "{} {} documents in {} pages",
        "✓".bright_green(),
        documents,
        pages
    );
    if config.show_charge {
        println!(
            "{} {:.2}",
            "Total request charge:".bright_yellow(),
            query.total_charge()
        );
    }
    println!(
        "{} {:.2}ms",
        "Elapsed:".bright_yellow(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn print_page(number: usize, page: &QueryPage, config: &Config) {
    println!();
    println!(
        "{} {} ({} documents, activity {})",
        "Page".bright_yellow().bold(),
        number,
        page.len(),
        page.activity_id
    );

    match config.output_format {
        OutputFormat::Table => {
            let mut table = ComfyTable::new();
            table.set_header(vec![
                Cell::new("#").fg(Color::Cyan),
                Cell::new("Document").fg(Color::Yellow),
            ]);
            for (index, document) in page.documents.iter().enumerate() {
                table.add_row(vec![Cell::new(index + 1), Cell::new(document.to_string())]);
            }
            println!("{}", table);
        }
        OutputFormat::Json => {
            for document in &page.documents {
                println!("{}", document);
            }
        }
    }

    if config.show_charge {
        println!("{} {:.2}", "Request charge:".bright_black(), page.request_charge);
    }
    match page.continuation_token() {
        Ok(Some(token)) => println!("{} {}", "Continuation:".bright_cyan(), token),
        Ok(None) => println!("{}", "No continuation (query complete)".bright_black()),
        Err(err) => println!("{} {}", "Continuation unavailable:".bright_red(), err),
    }
}

/// Print the 128-bit distinct hash of a JSON value
pub fn hash_value(json: &str) -> Result<()> {
    let parsed: serde_json::Value = serde_json::from_str(json)?;
    let value = Value::from(parsed);
    let hash = query_distinct::hash::hash(&value);
    println!("{} {}", value.kind().to_string().bright_cyan(), format!("{:032x}", hash).bright_green());
    Ok(())
}

/// Write the default configuration to `path`
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Refusing to overwrite existing file {:?}", path);
    }
    Config::default().save(path)?;
    println!("{} Wrote default configuration to {:?}", "✓".bright_green(), path);
    Ok(())
}
