use noodles_sam::header::record::value::map::header::tag as header_tag;
use noodles_sam::header::Header;

/// Wraps the header of a BAM file read by the native input mode.
pub struct BamHeader(Header);

impl From<Header> for BamHeader {
    fn from(h: Header) -> BamHeader {
        BamHeader(h)
    }
}

impl AsRef<Header> for BamHeader {
    fn as_ref(&self) -> &Header {
        &self.0
    }
}

impl BamHeader {
    /// `Some(true)` when the `@HD` line declares `SO:coordinate`, `None` without a sort order.
    pub fn is_coordinate_sorted(&self) -> Option<bool> {
        self.0
            .header()
            .and_then(|hd| hd.other_fields().get(&header_tag::SORT_ORDER))
            .map(|so| {
                let so: &[u8] = so.as_ref();
                so == b"coordinate"
            })
    }

    /// Reference sequence names indexed by reference sequence id.
    pub fn reference_names(&self) -> Vec<String> {
        self.0
            .reference_sequences()
            .keys()
            .map(|name| name.to_string())
            .collect()
    }
}
