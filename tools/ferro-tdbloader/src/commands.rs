//! Subcommand implementations

use anyhow::{Context, Result};
use colored::Colorize;
use ferro_tdb::loader::read_file;
use ferro_tdb::{
    IndexOrder, LoadStats, NTriplesParser, PatternShape, RawTriple, TdbConfig, TdbStore, Term,
};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

type TripleSource = Box<dyn Iterator<Item = ferro_tdb::Result<RawTriple>>>;

/// Build the store configuration from the command line
pub fn store_config(
    loc: &Path,
    mem_buffer: Option<usize>,
    batch_size: Option<usize>,
) -> Result<TdbConfig> {
    let mut config = TdbConfig::new(loc);
    if let Some(triples) = mem_buffer {
        config = config.with_sort_buffer(triples);
        if batch_size.is_none() && config.bulk.batch_size > triples {
            config = config.with_batch_size(triples);
        }
    }
    if let Some(batch) = batch_size {
        config = config.with_batch_size(batch);
    }
    config.validate().context("invalid loader options")?;
    Ok(config)
}

fn open_sources(files: &[PathBuf]) -> Result<Vec<TripleSource>> {
    files
        .iter()
        .map(|file| -> Result<TripleSource> {
            if file.as_os_str() == "-" {
                let stdin = io::stdin().lock();
                Ok(Box::new(NTriplesParser::new("<stdin>").for_reader(stdin)))
            } else {
                let reader =
                    read_file(file).with_context(|| format!("cannot open {}", file.display()))?;
                Ok(Box::new(reader))
            }
        })
        .collect()
}

/// `load`: bulk load every file as one all-or-nothing load
pub fn load(config: TdbConfig, files: &[PathBuf]) -> Result<()> {
    let location = config.location.clone();
    let mut store = TdbStore::open_or_create(config)
        .with_context(|| format!("cannot open dataset at {}", location.display()))?;

    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Ferro TDB Bulk Load".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "Dataset Location: {}",
        location.display().to_string().cyan()
    );
    println!("Input Files:      {}", files.len().to_string().bright_white());
    println!();

    let sources = open_sources(files)?;
    let stats = store
        .bulk_load(sources.into_iter().flatten())
        .context("bulk load failed, dataset left unchanged")?;
    store.close()?;

    print_load_summary(&stats);
    Ok(())
}

fn print_load_summary(stats: &LoadStats) {
    println!("{}", "Load Summary".bright_yellow().bold());
    println!("{}", "─".repeat(70));
    println!(
        "  Triples Read:     {}",
        format_number(stats.triples_read).bright_white()
    );
    println!(
        "  Distinct Triples: {}",
        format_number(stats.distinct_triples).bright_white().bold()
    );
    println!(
        "  Triples Added:    {}",
        format_number(stats.triples_added).bright_white()
    );
    println!(
        "  Terms Added:      {}",
        format_number(stats.terms_added).bright_white()
    );
    println!(
        "  Total Triples:    {}",
        format_number(stats.total_triples).bright_white()
    );
    println!(
        "  Duration:         {}s",
        format!("{:.2}", stats.elapsed.as_secs_f64()).bright_white()
    );
    println!(
        "  Throughput:       {} triples/sec",
        format_number(stats.triples_per_second() as u64).bright_white()
    );
    println!("{}", "═".repeat(70).bright_blue());
}

/// `parse`: read every file and report counts without touching a dataset
pub fn parse(files: &[PathBuf]) -> Result<()> {
    let start = Instant::now();
    let mut total = 0u64;
    for source in open_sources(files)? {
        for triple in source {
            triple?;
            total += 1;
        }
    }
    let elapsed = start.elapsed();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        total as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    info!("Parsed {} triples in {:?}", total, elapsed);

    println!(
        "  ✓ {}",
        format!("Parsed {} triples", format_number(total)).green().bold()
    );
    println!(
        "  Duration:   {}s",
        format!("{:.2}", elapsed.as_secs_f64()).bright_white()
    );
    println!(
        "  Throughput: {} triples/sec",
        format_number(rate as u64).bright_white()
    );
    Ok(())
}

/// `info`: dataset statistics
pub fn info(config: TdbConfig) -> Result<()> {
    let location = config.location.clone();
    let store = TdbStore::open(config)
        .with_context(|| format!("cannot open dataset at {}", location.display()))?;
    let stats = store.stats();

    println!("{}", "Dataset Statistics".bright_yellow().bold());
    println!("{}", "─".repeat(70));
    println!(
        "  Location:        {}",
        location.display().to_string().cyan()
    );
    println!(
        "  Triples:         {}",
        format_number(stats.triples.triples).bright_white().bold()
    );
    println!(
        "  Terms:           {}",
        format_number(stats.nodes.terms).bright_white()
    );
    println!(
        "  Node Log:        {} bytes",
        format_number(stats.nodes.log_bytes).bright_white()
    );
    for index in &stats.triples.indexes {
        println!(
            "  {} Index:       {} keys, {} cached pages",
            index.order,
            format_number(index.triples).bright_white(),
            index.buffer.cached_pages
        );
    }
    if stats.triples.poisoned {
        println!("  {}", "Store is poisoned; reopen to recover".red().bold());
    }
    Ok(())
}

/// `find`: print matching triples as N-Triples
pub fn find(
    config: TdbConfig,
    subject: Option<&str>,
    predicate: Option<&str>,
    object: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let parse = |text: Option<&str>| -> Result<Option<Term>> {
        text.map(|t| NTriplesParser::parse_term(t).with_context(|| format!("bad term {t}")))
            .transpose()
    };
    let (s, p, o) = (parse(subject)?, parse(predicate)?, parse(object)?);

    let location = config.location.clone();
    let store = TdbStore::open(config)
        .with_context(|| format!("cannot open dataset at {}", location.display()))?;

    let shape = PatternShape::new(s.is_some(), p.is_some(), o.is_some());
    let order: IndexOrder = store.triple_store().reorder().choose_index(shape);
    info!("Pattern {} answered from {}", shape, order);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut count = 0usize;
    for triple in store.find_terms(s.as_ref(), p.as_ref(), o.as_ref())? {
        if limit.is_some_and(|limit| count >= limit) {
            break;
        }
        let (s, p, o) = triple?;
        writeln!(out, "{} {} {} .", s, p, o)?;
        count += 1;
    }
    out.flush()?;
    info!("{} triple(s) matched", count);
    Ok(())
}

/// Format number with thousand separators
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
