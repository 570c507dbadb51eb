use std::fmt;

/// Run metrics of the barcode and fragment stages.
#[derive(Debug, Default)]
pub struct Metrics {
    barcode_reads: usize,
    distinct_barcodes: usize,
    retained_barcodes: usize,
    count_cutoff: Option<u64>,
    max_barcode_count: Option<u64>,
    mapped_reads: usize,
    alignment_lines: usize,
    fragments: usize,
    ignored_lines: usize,
    duplicate_lines: usize,
    missing_barcode_lines: usize,
}

pub enum Status {
    BarcodeRead,
    DistinctBarcode,
    RetainedBarcode,
    MappedRead,
    AlignmentLine,
    Fragment,
    Ignored,
    Duplicate,
    MissingBarcode,
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BARCODE_READS\tDISTINCT_BARCODES\tRETAINED_BARCODES\tCOUNT_CUTOFF\tMAX_BARCODE_COUNT\tMAPPED_READS\tALIGNMENT_LINES\tFRAGMENTS\tIGNORED_LINES\tDUPLICATE_LINES\tMISSING_BARCODE_LINES\tPERCENT_DUPLICATION")?;
        writeln!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.4}",
            self.barcode_reads,
            self.distinct_barcodes,
            self.retained_barcodes,
            OptCount(self.count_cutoff),
            OptCount(self.max_barcode_count),
            self.mapped_reads,
            self.alignment_lines,
            self.fragments,
            self.ignored_lines,
            self.duplicate_lines,
            self.missing_barcode_lines,
            self.percent_duplication(),
        )
    }
}

struct OptCount(Option<u64>);

impl fmt::Display for OptCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "NA"),
        }
    }
}

impl Metrics {
    /// Fraction of the usable alignment lines (barcode found, numbers parsed) that were
    /// duplicates.
    pub fn percent_duplication(&self) -> f64 {
        let usable = self.fragments + self.duplicate_lines;
        if usable == 0 {
            0.0
        } else {
            self.duplicate_lines as f64 / usable as f64
        }
    }

    pub fn count(&mut self, status: Status) {
        self.count_many(status, 1);
    }

    pub fn count_many(&mut self, status: Status, count: usize) {
        match status {
            Status::BarcodeRead => self.barcode_reads += count,
            Status::DistinctBarcode => self.distinct_barcodes += count,
            Status::RetainedBarcode => self.retained_barcodes += count,
            Status::MappedRead => self.mapped_reads += count,
            Status::AlignmentLine => self.alignment_lines += count,
            Status::Fragment => self.fragments += count,
            Status::Ignored => self.ignored_lines += count,
            Status::Duplicate => self.duplicate_lines += count,
            Status::MissingBarcode => self.missing_barcode_lines += count,
        }
    }

    pub fn set_count_cutoff(&mut self, cutoff: Option<u64>, max_count: Option<u64>) {
        self.count_cutoff = cutoff;
        self.max_barcode_count = max_count;
    }

    pub fn alignment_lines(&self) -> usize {
        self.alignment_lines
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn ignored_lines(&self) -> usize {
        self.ignored_lines
    }

    pub fn duplicate_lines(&self) -> usize {
        self.duplicate_lines
    }

    pub fn missing_barcode_lines(&self) -> usize {
        self.missing_barcode_lines
    }
}
