//! Cell barcode reads: frequency counting and the read name to barcode lookup.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use log::info;
use thiserror::Error;

use crate::io::open_text;
use crate::knee::RetainedBarcodes;

/// One FASTQ record. Only the identifier and sequence lines are kept, the separator and
/// quality lines are read into `skip` and overwritten by the next record.
#[derive(Debug, Default)]
pub struct FastqRecord {
    header: String,
    sequence: String,
    skip: String,
}

impl FastqRecord {
    /// The read name: the identifier line up to the first space, including the leading `@`.
    pub fn read_name(&self) -> &str {
        self.header
            .split_once(' ')
            .map(|(name, _)| name)
            .unwrap_or(self.header.as_str())
    }

    /// The barcode, i.e. the sequence line.
    pub fn barcode(&self) -> &str {
        &self.sequence
    }
}

/// Reads 4-line FASTQ records from a buffered reader without any format validation. Bytes that
/// are not valid UTF-8 are replaced with U+FFFD.
pub struct FastqReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(inner: R) -> FastqReader<R> {
        FastqReader { inner, buf: Vec::with_capacity(256) }
    }

    /// Read the next record into `record`. Returns the number of bytes consumed, 0 at the end of
    /// the stream. A trailing partial record counts as the end of the stream.
    pub fn read_record(&mut self, record: &mut FastqRecord) -> io::Result<usize> {
        let mut n = 0;
        for line in [&mut record.header, &mut record.sequence, &mut record.skip] {
            match self.read_line(line)? {
                0 => return Ok(0),
                len => n += len,
            }
        }
        match self.read_line(&mut record.skip)? {
            0 => Ok(0),
            len => Ok(n + len),
        }
    }

    fn read_line(&mut self, line: &mut String) -> io::Result<usize> {
        self.buf.clear();
        line.clear();
        let n = self.inner.read_until(b'\n', &mut self.buf)?;
        line.push_str(&String::from_utf8_lossy(trim_newline(&self.buf)));
        Ok(n)
    }
}

/// Strip a trailing `\n` or `\r\n`.
pub fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Number of reads observed per barcode.
#[derive(Debug, Default)]
pub struct BarcodeTally {
    counts: AHashMap<String, u64>,
    records: usize,
}

impl BarcodeTally {
    /// Count every barcode of a FASTQ stream.
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<BarcodeTally> {
        let mut fastq = FastqReader::new(reader);
        let mut record = FastqRecord::default();
        let mut tally = BarcodeTally::default();

        while fastq.read_record(&mut record)? > 0 {
            tally.add(record.barcode());
        }

        Ok(tally)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<BarcodeTally, BarcodeError> {
        let path = path.as_ref();
        let tally = open_text(path)
            .and_then(BarcodeTally::from_reader)
            .map_err(|source| BarcodeError::Count { path: path.to_owned(), source })?;
        info!(
            "counted {} barcode reads, {} distinct barcodes",
            tally.records(),
            tally.len()
        );
        Ok(tally)
    }

    pub fn add(&mut self, barcode: &str) {
        self.records += 1;
        if let Some(count) = self.counts.get_mut(barcode) {
            *count += 1;
        } else {
            self.counts.insert(barcode.to_owned(), 1);
        }
    }

    pub fn get(&self, barcode: &str) -> Option<u64> {
        self.counts.get(barcode).copied()
    }

    /// Number of distinct barcodes
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of FASTQ records that were tallied
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn into_counts(self) -> AHashMap<String, u64> {
        self.counts
    }
}

impl FromIterator<(String, u64)> for BarcodeTally {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut tally = BarcodeTally::default();
        for (barcode, count) in iter {
            tally.records += count as usize;
            *tally.counts.entry(barcode).or_insert(0) += count;
        }
        tally
    }
}

/// Handle of an interned barcode in a [`BarcodePool`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BarcodeId(u32);

impl BarcodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stores every distinct barcode once. Reads refer to their barcode by [`BarcodeId`].
#[derive(Debug, Default)]
pub struct BarcodePool {
    barcodes: Vec<Box<str>>,
    ids: AHashMap<Box<str>, BarcodeId>,
}

impl BarcodePool {
    pub fn intern(&mut self, barcode: &str) -> BarcodeId {
        if let Some(&id) = self.ids.get(barcode) {
            return id;
        }
        let id = BarcodeId(
            u32::try_from(self.barcodes.len()).expect("more than u32::MAX distinct barcodes"),
        );
        self.barcodes.push(barcode.into());
        self.ids.insert(barcode.into(), id);
        id
    }

    pub fn id(&self, barcode: &str) -> Option<BarcodeId> {
        self.ids.get(barcode).copied()
    }

    pub fn get(&self, id: BarcodeId) -> &str {
        &self.barcodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }
}

/// Lookup from read name (with its leading `@`) to the barcode of the read. Only reads with a
/// retained barcode are present.
#[derive(Debug, Default)]
pub struct ReadBarcodeMap {
    pool: BarcodePool,
    reads: AHashMap<Box<str>, BarcodeId>,
}

impl ReadBarcodeMap {
    pub fn from_reader<R: BufRead>(
        reader: R,
        retained: &RetainedBarcodes,
    ) -> io::Result<ReadBarcodeMap> {
        let mut fastq = FastqReader::new(reader);
        let mut record = FastqRecord::default();
        let mut map = ReadBarcodeMap::default();

        while fastq.read_record(&mut record)? > 0 {
            if retained.contains(record.barcode()) {
                map.insert(record.read_name(), record.barcode());
            }
        }
        map.reads.shrink_to_fit();

        Ok(map)
    }

    pub fn from_path<P: AsRef<Path>>(
        path: P,
        retained: &RetainedBarcodes,
    ) -> Result<ReadBarcodeMap, BarcodeError> {
        let path = path.as_ref();
        let map = open_text(path)
            .and_then(|reader| ReadBarcodeMap::from_reader(reader, retained))
            .map_err(|source| BarcodeError::Map { path: path.to_owned(), source })?;
        info!("number of reads in map: {}", map.len());
        Ok(map)
    }

    pub fn insert(&mut self, read_name: &str, barcode: &str) -> BarcodeId {
        let id = self.pool.intern(barcode);
        self.reads.insert(read_name.into(), id);
        id
    }

    pub fn get(&self, read_name: &str) -> Option<BarcodeId> {
        self.reads.get(read_name).copied()
    }

    pub fn barcode(&self, id: BarcodeId) -> &str {
        self.pool.get(id)
    }

    pub fn pool(&self) -> &BarcodePool {
        &self.pool
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.reads
            .iter()
            .map(|(name, &id)| (name.as_ref(), self.pool.get(id)))
    }

    /// Number of reads
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum BarcodeError {
    #[error("counting barcodes in {path}")]
    Count {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("building read to barcode map from {path}")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    const FASTQ: &str = "@read1 2:N:0:1
AAAA
+
FFFF
@read2 2:N:0:1
CCCC
+
FFFF
@read3 2:N:0:1
AAAA
+
FFFF
@read4
GGGG
+
FFFF
@read5 2:N:0:1
AAAA
+
FFFF
";

    #[test]
    fn fastq_records() {
        let mut fastq = FastqReader::new(FASTQ.as_bytes());
        let mut record = FastqRecord::default();

        assert!(fastq.read_record(&mut record).unwrap() > 0);
        assert_eq!(record.read_name(), "@read1");
        assert_eq!(record.barcode(), "AAAA");

        for _ in 0..3 {
            assert!(fastq.read_record(&mut record).unwrap() > 0);
        }
        // no space in the identifier line
        assert_eq!(record.read_name(), "@read4");
        assert_eq!(record.barcode(), "GGGG");

        assert!(fastq.read_record(&mut record).unwrap() > 0);
        assert_eq!(fastq.read_record(&mut record).unwrap(), 0);
    }

    #[test]
    fn crlf_line_endings() {
        let data = "@r1 x\r\nACGT\r\n+\r\nFFFF\r\n";
        let mut fastq = FastqReader::new(data.as_bytes());
        let mut record = FastqRecord::default();
        assert!(fastq.read_record(&mut record).unwrap() > 0);
        assert_eq!(record.read_name(), "@r1");
        assert_eq!(record.barcode(), "ACGT");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let data: &[u8] = b"@r1 \xff\xfe\nAC\xffT\n+\n\xfe\xfe\xfe\xfe\n@r2\nACGT\n+\nFFFF\n";
        let mut fastq = FastqReader::new(data);
        let mut record = FastqRecord::default();

        assert!(fastq.read_record(&mut record).unwrap() > 0);
        assert_eq!(record.read_name(), "@r1");
        assert_eq!(record.barcode(), "AC\u{FFFD}T");
        assert!(fastq.read_record(&mut record).unwrap() > 0);
        assert_eq!(record.read_name(), "@r2");
        assert_eq!(record.barcode(), "ACGT");
        assert_eq!(fastq.read_record(&mut record).unwrap(), 0);
    }

    #[test]
    fn count_barcodes() {
        let tally = BarcodeTally::from_reader(FASTQ.as_bytes()).unwrap();
        assert_eq!(tally.records(), 5);
        assert_eq!(tally.len(), 3);
        assert_eq!(tally.get("AAAA"), Some(3));
        assert_eq!(tally.get("CCCC"), Some(1));
        assert_eq!(tally.get("GGGG"), Some(1));
        assert_eq!(tally.get("TTTT"), None);
    }

    #[test]
    fn partial_record_is_ignored() {
        let truncated = format!("{}@read6 2:N:0:1\nCCCC\n+\n", FASTQ);
        let tally = BarcodeTally::from_reader(truncated.as_bytes()).unwrap();
        assert_eq!(tally.records(), 5);
        assert_eq!(tally.get("CCCC"), Some(1));

        let tally = BarcodeTally::from_reader("@read1 x\n".as_bytes()).unwrap();
        assert!(tally.is_empty());
    }

    #[test]
    fn pool_interns_once() {
        let mut pool = BarcodePool::default();
        let a = pool.intern("AAAA");
        let c = pool.intern("CCCC");
        assert_eq!(pool.intern("AAAA"), a);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(c), "CCCC");
        assert_eq!(pool.id("CCCC"), Some(c));
        assert_eq!(pool.id("GGGG"), None);
    }

    #[test]
    fn read_map_only_holds_retained() {
        let tally = BarcodeTally::from_reader(FASTQ.as_bytes()).unwrap();
        let retained = RetainedBarcodes::filter(tally, NonZeroUsize::new(1).unwrap());
        let map = ReadBarcodeMap::from_reader(FASTQ.as_bytes(), &retained).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(map.pool().len(), 1);
        for name in ["@read1", "@read3", "@read5"] {
            let id = map.get(name).unwrap();
            assert_eq!(map.barcode(id), "AAAA");
        }
        assert!(map.get("@read2").is_none());
        assert!(map.get("read1").is_none());
    }

    #[test]
    fn retention_closure() {
        let tally = BarcodeTally::from_reader(FASTQ.as_bytes()).unwrap();
        let retained = RetainedBarcodes::filter(tally, NonZeroUsize::new(2).unwrap());
        let cutoff = retained.cutoff().unwrap();
        let map = ReadBarcodeMap::from_reader(FASTQ.as_bytes(), &retained).unwrap();

        assert_eq!(map.len(), 5);
        for (_, barcode) in map.iter() {
            assert!(retained.count(barcode).unwrap() >= cutoff);
        }
    }

    #[test]
    fn tally_from_path() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::with_suffix(".fastq").unwrap();
        write!(file, "{}", FASTQ).unwrap();
        file.flush().unwrap();

        let tally = BarcodeTally::from_path(file.path()).unwrap();
        assert_eq!(tally.get("AAAA"), Some(3));

        let err = BarcodeTally::from_path("/nonexistent/barcodes.fastq").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/barcodes.fastq"));
    }
}
