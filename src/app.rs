use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use log::{info, warn};
use thiserror::Error;
use tokio::{fs::File, task};

use crate::{
    barcode::{BarcodeError, BarcodeTally, ReadBarcodeMap},
    fragment::{FragmentError, FragmentGenerator},
    io::{create_output, open_alignment_text, AlignmentDump, BamIoError},
    knee::RetainedBarcodes,
    metrics::{Metrics, Status},
};

const DEFAULT_ALIGNMENTS: &str = "aligned.bam";
const DEFAULT_BARCODES: &str = "barcodes_R2.fastq.gz";
const DEFAULT_OUTPUT: &str = "fragments.tsv";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// The aligned reads. A BAM file, or `samtools view` output with --input-format text
    /// (`-` reads stdin)
    pub alignments: Option<PathBuf>,

    /// FASTQ file with the cell barcode reads, optionally gzip compressed
    pub barcodes: Option<PathBuf>,

    /// The fragment file to write, `-` writes to stdout
    pub output: Option<PathBuf>,

    /// Expected number of cells. About this many of the most frequent barcodes are kept
    #[clap(short = 'n', long, default_value = "8000")]
    pub cells: NonZeroUsize,

    /// The metrics file, if missing metrics will be written to stderr
    #[clap(short = 'm', long)]
    pub metrics: Option<PathBuf>,

    /// How the alignments are read
    #[clap(short = 'f', long, value_enum, default_value_t = InputFormat::Samtools)]
    pub input_format: InputFormat,

    /// The samtools executable used to dump the BAM file
    #[clap(short = 's', long, default_value = "samtools")]
    pub samtools: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Pipe the BAM file through `samtools view`
    Samtools,
    /// Decode the BAM file in process
    Native,
    /// The input already is `samtools view` output
    Text,
}

impl Config {
    /// The alignment, barcode and output paths. Without all three positional arguments the
    /// default paths are used.
    pub fn paths(&self) -> (PathBuf, PathBuf, PathBuf) {
        match (&self.alignments, &self.barcodes, &self.output) {
            (Some(alignments), Some(barcodes), Some(output)) => {
                (alignments.clone(), barcodes.clone(), output.clone())
            }
            _ => {
                warn!("Arguments: aligned.bam the_R2.fastq.gz out_fragments.tsv");
                warn!(
                    "using the default paths {} {} {}",
                    DEFAULT_ALIGNMENTS, DEFAULT_BARCODES, DEFAULT_OUTPUT
                );
                (
                    PathBuf::from(DEFAULT_ALIGNMENTS),
                    PathBuf::from(DEFAULT_BARCODES),
                    PathBuf::from(DEFAULT_OUTPUT),
                )
            }
        }
    }
}

pub struct App {
    config: Config,
    metrics: Metrics,
}

impl App {
    pub fn new() -> App {
        App::with_config(Config::parse())
    }

    pub fn with_config(config: Config) -> App {
        App { config, metrics: Metrics::default() }
    }

    #[cfg(test)]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Count and filter the barcodes, map reads to the kept barcodes and write the fragments.
    pub async fn run(&mut self) -> Result<(), BamFragError> {
        let (alignments, barcodes, output) = self.config.paths();

        info!("Count bc");
        let path = barcodes.clone();
        let tally = task::spawn_blocking(move || BarcodeTally::from_path(path)).await??;
        self.metrics.count_many(Status::BarcodeRead, tally.records());
        self.metrics.count_many(Status::DistinctBarcode, tally.len());

        info!("Filter bc");
        let retained = RetainedBarcodes::filter(tally, self.config.cells);
        self.metrics.count_many(Status::RetainedBarcode, retained.len());
        self.metrics.set_count_cutoff(retained.cutoff(), retained.max_count());

        info!("Construct read-to-bc map");
        let path = barcodes.clone();
        let reads = task::spawn_blocking(move || ReadBarcodeMap::from_path(path, &retained)).await??;
        self.metrics.count_many(Status::MappedRead, reads.len());

        info!("Generate fragment file");
        self.write_fragments(&alignments, &output, &reads).await?;
        drop(reads);

        self.write_metrics()?;
        info!("Done");

        Ok(())
    }

    async fn write_fragments(
        &mut self,
        alignments: &Path,
        output: &Path,
        reads: &ReadBarcodeMap,
    ) -> Result<(), BamFragError> {
        let mut out = create_output(output)
            .await
            .map_err(|source| BamFragError::Output { path: output.to_owned(), source })?;
        let mut generator = FragmentGenerator::new(reads, &mut self.metrics);
        let context = |source| BamFragError::Fragments { path: alignments.to_owned(), source };

        match self.config.input_format {
            InputFormat::Samtools => {
                let (dump, stdout) = AlignmentDump::spawn(&self.config.samtools, alignments)?;
                generator
                    .write_from_text(stdout, &mut out)
                    .await
                    .map_err(context)?;
                dump.wait().await?;
            }
            InputFormat::Native => {
                let file = File::open(alignments)
                    .await
                    .map_err(|source| BamFragError::Input { path: alignments.to_owned(), source })?;
                generator.write_from_bam(file, &mut out).await.map_err(context)?;
            }
            InputFormat::Text => {
                let text = open_alignment_text(alignments)
                    .await
                    .map_err(|source| BamFragError::Input { path: alignments.to_owned(), source })?;
                generator.write_from_text(text, &mut out).await.map_err(context)?;
            }
        }

        Ok(())
    }

    fn write_metrics(&self) -> Result<(), BamFragError> {
        if let Some(path) = &self.config.metrics {
            use std::io::Write;
            std::fs::File::create(path)
                .and_then(|mut mout| write!(mout, "{}", self.metrics))
                .map_err(|source| BamFragError::Metrics { path: path.to_owned(), source })?;
        } else {
            eprint!("{}", self.metrics);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum BamFragError {
    #[error("writing metrics to {path}")]
    Metrics {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Barcodes(#[from] BarcodeError),
    #[error("Error running the alignment dump")]
    Dump(#[from] BamIoError),
    #[error("cannot open alignments {path}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot create fragment file {path}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("generating fragments from {path}")]
    Fragments {
        path: PathBuf,
        #[source]
        source: FragmentError,
    },
    #[error("barcode stage did not complete")]
    Join(#[from] task::JoinError),
}
