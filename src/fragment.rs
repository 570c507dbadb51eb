//! Fragment generation: a single ordered pass over the alignments that writes one fragment per
//! (barcode, start) change.

use std::fmt::{self, Write as _};
use std::io;

use log::{info, warn};
use noodles_bam as bam;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use vec_map::VecMap;

use crate::barcode::{trim_newline, ReadBarcodeMap};
use crate::header::BamHeader;
use crate::metrics::{Metrics, Status};

/// Progress is logged every this many alignment lines.
pub const PROGRESS_INTERVAL: usize = 1_000_000;

/// Minimum number of tab-delimited fields of an alignment line (up to the template length).
pub const MIN_FIELDS: usize = 9;

/// The fields of one alignment used for fragment generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment<'a> {
    pub read_name: &'a str,
    pub reference_name: &'a str,
    /// 1-based leftmost position, `None` if it is not an integer
    pub start: Option<i64>,
    /// Signed template length, `None` if it is not an integer
    pub template_length: Option<i64>,
}

impl<'a> Alignment<'a> {
    /// Split a SAM text line. Returns the number of fields found when the line is too short.
    pub fn from_line(line: &'a str) -> Result<Alignment<'a>, usize> {
        let mut fields = line.split('\t');
        let mut wanted = [""; MIN_FIELDS];
        for (i, slot) in wanted.iter_mut().enumerate() {
            *slot = fields.next().ok_or(i)?;
        }

        Ok(Alignment {
            read_name: wanted[0],
            reference_name: wanted[2],
            start: parse_int(wanted[3]),
            template_length: parse_int(wanted[8]),
        })
    }
}

fn parse_int(field: &str) -> Option<i64> {
    lexical_core::parse::<i64>(field.as_bytes()).ok()
}

/// One output line: `chrom  start  end  barcode  1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRecord<'a> {
    pub reference_name: &'a str,
    pub start: i64,
    pub end: i64,
    pub barcode: &'a str,
}

impl fmt::Display for FragmentRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t1",
            self.reference_name, self.start, self.end, self.barcode
        )
    }
}

/// Deduplicates alignments per barcode against the last emitted start position.
///
/// Only the previous emission of a barcode is remembered, so a start that returns after another
/// start of the same barcode is emitted again. Input order therefore matters.
pub struct FragmentGenerator<'a> {
    reads: &'a ReadBarcodeMap,
    last_positions: VecMap<i64>,
    metrics: &'a mut Metrics,
    key: String,
    out: String,
}

impl<'a> FragmentGenerator<'a> {
    pub fn new(reads: &'a ReadBarcodeMap, metrics: &'a mut Metrics) -> FragmentGenerator<'a> {
        FragmentGenerator {
            reads,
            last_positions: VecMap::with_capacity(reads.pool().len()),
            metrics,
            key: String::with_capacity(128),
            out: String::with_capacity(256),
        }
    }

    /// Decide whether `alignment` starts a new fragment.
    pub fn process<'b>(&mut self, alignment: &Alignment<'b>) -> Option<FragmentRecord<'b>>
    where
        'a: 'b,
    {
        let reads: &'a ReadBarcodeMap = self.reads;
        self.metrics.count(Status::AlignmentLine);
        let n = self.metrics.alignment_lines();
        if n % PROGRESS_INTERVAL == 0 {
            info!("records so far: {}", n);
        }

        // read names in the barcode FASTQ carry the leading '@'
        self.key.clear();
        self.key.push('@');
        self.key.push_str(alignment.read_name);

        let id = match reads.get(&self.key) {
            Some(id) => id,
            None => {
                self.metrics.count(Status::MissingBarcode);
                return None;
            }
        };

        let (start, template_length) = match (alignment.start, alignment.template_length) {
            (Some(start), Some(template_length)) => (start, template_length),
            _ => {
                self.metrics.count(Status::Ignored);
                return None;
            }
        };

        if self.last_positions.get(id.index()) == Some(&start) {
            self.metrics.count(Status::Duplicate);
            return None;
        }

        self.last_positions.insert(id.index(), start);
        self.metrics.count(Status::Fragment);
        Some(FragmentRecord {
            reference_name: alignment.reference_name,
            start,
            end: start + template_length,
            barcode: reads.barcode(id),
        })
    }

    async fn write_alignment<W>(
        &mut self,
        alignment: &Alignment<'_>,
        writer: &mut W,
    ) -> Result<(), FragmentError>
    where
        W: AsyncWrite + Unpin,
    {
        if let Some(fragment) = self.process(alignment) {
            self.out.clear();
            writeln!(self.out, "{}", fragment).expect("writing to a String");
            writer
                .write_all(self.out.as_bytes())
                .await
                .map_err(FragmentError::Write)?;
        }
        Ok(())
    }

    /// Generate fragments from `samtools view` text lines. Bytes that are not valid UTF-8 are
    /// replaced with U+FFFD.
    pub async fn write_from_text<R, W>(&mut self, mut reader: R, writer: &mut W) -> Result<(), FragmentError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(512);
        let mut line_number = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await.map_err(FragmentError::Read)? == 0 {
                break;
            }
            line_number += 1;

            let line = String::from_utf8_lossy(trim_newline(&buf));
            let alignment = Alignment::from_line(&line)
                .map_err(|fields| FragmentError::TruncatedLine { line: line_number, fields })?;

            self.write_alignment(&alignment, writer).await?;
        }
        writer.flush().await.map_err(FragmentError::Write)?;
        self.log_summary();
        Ok(())
    }

    /// Generate fragments from BAM records decoded in process. Records are presented the way
    /// `samtools view` prints them: `*` for an unplaced record and start 0 without a position.
    pub async fn write_from_bam<W>(&mut self, file: File, writer: &mut W) -> Result<(), FragmentError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut reader = bam::r#async::io::Reader::new(file);
        let header: BamHeader = reader.read_header().await.map_err(FragmentError::Read)?.into();
        if header.is_coordinate_sorted() != Some(true) {
            warn!("BAM header does not declare coordinate sorting, duplicates may be missed");
        }
        let reference_names = header.reference_names();

        let mut record = bam::Record::default();
        let mut read_name = String::new();
        while reader
            .read_record(&mut record)
            .await
            .map_err(FragmentError::Read)?
            != 0
        {
            read_name.clear();
            match record.name() {
                Some(name) => read_name.push_str(&String::from_utf8_lossy(name)),
                None => read_name.push('*'),
            }

            let reference_name = match record
                .reference_sequence_id()
                .transpose()
                .map_err(FragmentError::Read)?
            {
                Some(id) => reference_names
                    .get(id)
                    .map(String::as_str)
                    .ok_or(FragmentError::UnknownReference(id))?,
                None => "*",
            };

            let start = record
                .alignment_start()
                .transpose()
                .map_err(FragmentError::Read)?
                .map(|position| usize::from(position) as i64)
                .unwrap_or(0);

            let alignment = Alignment {
                read_name: &read_name,
                reference_name,
                start: Some(start),
                template_length: Some(i64::from(record.template_length())),
            };
            self.write_alignment(&alignment, writer).await?;
        }
        writer.flush().await.map_err(FragmentError::Write)?;
        self.log_summary();
        Ok(())
    }

    fn log_summary(&self) {
        info!(
            "total records read: {} fragments: {} ignored: {} dedup: {} missing barcode: {}",
            self.metrics.alignment_lines(),
            self.metrics.fragments(),
            self.metrics.ignored_lines(),
            self.metrics.duplicate_lines(),
            self.metrics.missing_barcode_lines(),
        );
    }
}

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("alignment line {line} has {fields} tab-delimited fields, at least 9 are required")]
    TruncatedLine { line: usize, fields: usize },
    #[error("alignment refers to unknown reference sequence id {0}")]
    UnknownReference(usize),
    #[error("error reading alignments")]
    Read(#[source] io::Error),
    #[error("error writing fragments")]
    Write(#[source] io::Error),
}
