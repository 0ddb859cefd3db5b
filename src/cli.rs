//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use enricher_core::{EnrichConfig, PdfPolicy};

/// Deduplicate bibliographic records and enrich them with abstracts and PDFs.
///
/// Reads JSON arrays of records from the given files (in order) or from
/// stdin, and writes the enriched array as JSON.
#[derive(Parser, Debug)]
#[command(name = "enricher")]
#[command(author, version, about)]
pub struct Args {
    /// JSON files containing an array of records (reads stdin when omitted)
    pub inputs: Vec<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write enriched records here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory downloaded PDFs are stored in
    #[arg(long)]
    pub pdf_dir: Option<PathBuf>,

    /// Concurrent records in the abstract stage (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Concurrent records in the PDF stage (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub pdf_concurrency: Option<u8>,

    /// Title similarity above which two records are duplicates (0.0-1.0)
    #[arg(long, value_parser = parse_threshold)]
    pub dedup_threshold: Option<f64>,

    /// Skip the abstract stage
    #[arg(long)]
    pub skip_abstracts: bool,

    /// Skip the PDF stage
    #[arg(long)]
    pub skip_pdfs: bool,

    /// Stop issuing provider calls after this many seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub deadline_secs: Option<u64>,

    /// Contact email sent to the DOI registry's polite pool
    #[arg(long)]
    pub email: Option<String>,
}

impl Args {
    /// Applies flags given on the command line on top of `config`.
    pub fn apply_to(&self, config: &mut EnrichConfig) {
        if let Some(dir) = &self.pdf_dir {
            config.pdf.output_dir.clone_from(dir);
        }
        if let Some(concurrency) = self.concurrency {
            config.abstract_concurrency = usize::from(concurrency);
        }
        if let Some(concurrency) = self.pdf_concurrency {
            config.pdf_concurrency = usize::from(concurrency);
        }
        if let Some(threshold) = self.dedup_threshold {
            config.dedup.title_threshold = threshold;
        }
        if self.skip_abstracts {
            config.enrich_abstracts = false;
        }
        if self.skip_pdfs {
            config.pdf_policy = PdfPolicy::Never;
        }
        if let Some(email) = &self.email {
            config.contact_email = Some(email.clone());
        }
    }
}

fn parse_threshold(value: &str) -> Result<f64, String> {
    let threshold: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(format!("{threshold} is not between 0.0 and 1.0"))
    }
}
