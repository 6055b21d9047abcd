//! Batched reads and the per-address value cache
//!
//! Addresses that share a `batchGroup` and sit close together in the target
//! are combined into a single larger read, reducing the number of
//! cross-process calls per tick. Ungrouped addresses are read one by one so
//! that an unmapped neighbour cannot take a healthy value down with it.
//!
//! # Example
//!
//! ```ignore
//! use plynk_rs::backend::read_manager::{PlannedRead, ReadManager};
//!
//! let manager = ReadManager::new(64);  // 64-byte gap threshold
//! let regions = manager.plan_reads(&planned);
//!
//! for region in regions {
//!     let data = reader.read_bytes(process, region.address, region.size)?;
//!     for &pos in &region.members {
//!         let read = &planned[pos];
//!         let bytes = ReadManager::extract(&region, &data, read.address, read.size);
//!     }
//! }
//! ```

use crate::types::OutputValue;
use std::collections::{BTreeMap, HashMap};

/// Default gap threshold for combining reads (64 bytes)
pub const DEFAULT_GAP_THRESHOLD: usize = 64;

/// One resolved address waiting to be read this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRead {
    /// Index into the session's address list
    pub index: usize,
    /// Final resolved address
    pub address: u64,
    /// Number of bytes the value occupies
    pub size: usize,
    /// Batch group hint
    pub group: Option<String>,
}

/// A planned memory read region
///
/// Represents a contiguous memory region that covers one or more addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRegion {
    /// Start address of the read
    pub address: u64,
    /// Number of bytes to read
    pub size: usize,
    /// Positions (in the planned slice) of the reads this region serves
    pub members: Vec<usize>,
}

impl ReadRegion {
    /// Whether this region serves more than one address
    pub fn is_batched(&self) -> bool {
        self.members.len() > 1
    }
}

/// Plans batched reads
#[derive(Debug, Clone)]
pub struct ReadManager {
    /// Maximum gap between addresses to combine into single read
    gap_threshold: usize,
}

impl ReadManager {
    /// Create a new read manager with the specified gap threshold
    pub fn new(gap_threshold: usize) -> Self {
        Self { gap_threshold }
    }

    pub fn gap_threshold(&self) -> usize {
        self.gap_threshold
    }

    /// Plan reads for a set of resolved addresses
    ///
    /// Reads in the same batch group whose addresses are within
    /// `gap_threshold` bytes of each other share a region. Reads without a
    /// group each get their own region. Regions are returned in the order
    /// of their first member so priority ordering is kept.
    pub fn plan_reads(&self, reads: &[PlannedRead]) -> Vec<ReadRegion> {
        let mut regions = Vec::new();
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for (pos, read) in reads.iter().enumerate() {
            match read.group.as_deref() {
                Some(group) => groups.entry(group).or_default().push(pos),
                None => regions.push(ReadRegion {
                    address: read.address,
                    size: read.size,
                    members: vec![pos],
                }),
            }
        }

        for positions in groups.into_values() {
            regions.extend(self.merge(reads, positions));
        }

        regions.sort_by_key(|r| r.members.iter().copied().min().unwrap_or(usize::MAX));
        regions
    }

    fn merge(&self, reads: &[PlannedRead], mut positions: Vec<usize>) -> Vec<ReadRegion> {
        positions.sort_by_key(|&p| reads[p].address);

        let mut regions = Vec::new();
        let mut iter = positions.into_iter();
        let Some(first) = iter.next() else {
            return regions;
        };
        let mut current_start = reads[first].address;
        let mut current_end = reads[first].address.saturating_add(reads[first].size as u64);
        let mut current_members = vec![first];

        for pos in iter {
            let read = &reads[pos];
            let read_end = read.address.saturating_add(read.size as u64);

            // Merge if the read starts within the gap threshold of the current end
            if read.address <= current_end.saturating_add(self.gap_threshold as u64) {
                current_end = current_end.max(read_end);
                current_members.push(pos);
            } else {
                regions.push(ReadRegion {
                    address: current_start,
                    size: (current_end - current_start) as usize,
                    members: std::mem::take(&mut current_members),
                });
                current_start = read.address;
                current_end = read_end;
                current_members.push(pos);
            }
        }

        regions.push(ReadRegion {
            address: current_start,
            size: (current_end - current_start) as usize,
            members: current_members,
        });
        regions
    }

    /// Slice one value's bytes out of a region's data
    ///
    /// Returns `None` if the value is not fully inside the region.
    pub fn extract<'a>(
        region: &ReadRegion,
        data: &'a [u8],
        address: u64,
        size: usize,
    ) -> Option<&'a [u8]> {
        let offset = usize::try_from(address.checked_sub(region.address)?).ok()?;
        data.get(offset..offset.checked_add(size)?)
    }

    /// Number of regions and individual reads saved by batching
    pub fn calculate_savings(&self, reads: &[PlannedRead]) -> (usize, usize) {
        let regions = self.plan_reads(reads).len();
        (regions, reads.len().saturating_sub(regions))
    }
}

impl Default for ReadManager {
    fn default() -> Self {
        Self::new(DEFAULT_GAP_THRESHOLD)
    }
}

#[derive(Debug, Clone)]
struct CachedValue {
    address: u64,
    bytes: Vec<u8>,
    raw: OutputValue,
    value: OutputValue,
}

/// Last decoded and transformed value per label
///
/// A hit requires the same resolved address and the same byte pattern as
/// the previous tick, in which case decoding and transforming are skipped.
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: HashMap<String, CachedValue>,
    hits: u64,
    misses: u64,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached `(raw, final)` values if address and bytes are unchanged
    pub fn lookup(&mut self, label: &str, address: u64, bytes: &[u8]) -> Option<(OutputValue, OutputValue)> {
        match self.entries.get(label) {
            Some(c) if c.address == address && c.bytes == bytes => {
                self.hits += 1;
                Some((c.raw.clone(), c.value.clone()))
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn store(&mut self, label: &str, address: u64, bytes: &[u8], raw: &OutputValue, value: &OutputValue) {
        self.entries.insert(
            label.to_string(),
            CachedValue {
                address,
                bytes: bytes.to_vec(),
                raw: raw.clone(),
                value: value.clone(),
            },
        );
    }

    pub fn invalidate(&mut self, label: &str) {
        self.entries.remove(label);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
