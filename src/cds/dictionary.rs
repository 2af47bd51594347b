/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use super::{
    archive_builder::ArchiveBuilder,
    deserializer::{ArchiveDeserializer, Deserializable},
    error::ArchiveError,
    serializer::{ArchiveSerializer, Serializable},
};

const ENTRIES_PER_BUCKET: usize = 4;

/// Builds a read-only hash dictionary of serialized records.
///
/// Table layout, all little-endian `u32`:
///
/// ```text
/// bucket_count entry_count
/// bucket_start[0] .. bucket_start[bucket_count]
/// (hash, record_offset) * entry_count      sorted by bucket
/// ```
///
/// Record offsets point into the same read-only region.
#[derive(Default)]
pub struct CompactDictionaryWriter {
    entries: Vec<(u32, u32)>,
}

impl CompactDictionaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `record` into the builder's read-only region and files it
    /// under `hash`.
    pub fn add<T: Serializable>(&mut self, builder: &mut dyn ArchiveBuilder, hash: u32, record: &T) {
        let mut serializer = ArchiveSerializer::new();
        record.serialize(&mut serializer);
        let offset = builder.ro_region_alloc(&serializer.into_bytes());
        self.entries.push((hash, offset));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the table and returns its offset in the read-only region.
    pub fn finish(self, builder: &mut dyn ArchiveBuilder) -> u32 {
        let bucket_count = ((self.entries.len() + ENTRIES_PER_BUCKET - 1) / ENTRIES_PER_BUCKET).max(1);
        let mut buckets: Vec<Vec<(u32, u32)>> = vec![Vec::new(); bucket_count];
        for (hash, offset) in self.entries.iter().copied() {
            buckets[hash as usize % bucket_count].push((hash, offset));
        }

        let mut serializer = ArchiveSerializer::new();
        serializer.write_u32(bucket_count as u32);
        serializer.write_u32(self.entries.len() as u32);
        let mut start = 0;
        for bucket in buckets.iter() {
            serializer.write_u32(start);
            start += bucket.len() as u32;
        }
        serializer.write_u32(start);
        for bucket in buckets.iter() {
            for (hash, offset) in bucket.iter() {
                serializer.write_u32(*hash);
                serializer.write_u32(*offset);
            }
        }
        builder.ro_region_alloc(&serializer.into_bytes())
    }
}

/// Read side of [`CompactDictionaryWriter`].
pub struct CompactDictionary<'a> {
    region: &'a [u8],
    bucket_count: u32,
    entry_count: u32,
    buckets_at: usize,
    entries_at: usize,
}

impl<'a> CompactDictionary<'a> {
    pub fn new(region: &'a [u8], table_offset: u32) -> Result<Self, ArchiveError> {
        let mut reader = ArchiveDeserializer::new(region, table_offset as usize);
        let bucket_count = reader.get_u32()?;
        let entry_count = reader.get_u32()?;
        if bucket_count == 0 {
            return Err(ArchiveError::Malformed("dictionary without buckets".to_owned()));
        }
        let buckets_at = reader.pc();
        let entries_at = buckets_at + (bucket_count as usize + 1) * 4;
        let end = entries_at + entry_count as usize * 8;
        if end > region.len() {
            return Err(ArchiveError::Malformed(format!(
                "dictionary of {} entries does not fit the read-only region",
                entry_count
            )));
        }
        Ok(Self {
            region,
            bucket_count,
            entry_count,
            buckets_at,
            entries_at,
        })
    }

    pub fn len(&self) -> usize {
        self.entry_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    fn bucket_start(&self, bucket: u32) -> Result<u32, ArchiveError> {
        ArchiveDeserializer::new(self.region, self.buckets_at + bucket as usize * 4).get_u32()
    }

    fn entry(&self, index: u32) -> Result<(u32, u32), ArchiveError> {
        let mut reader = ArchiveDeserializer::new(self.region, self.entries_at + index as usize * 8);
        Ok((reader.get_u32()?, reader.get_u32()?))
    }

    fn record_at<T: Deserializable>(&self, offset: u32) -> Result<T, ArchiveError> {
        T::deserialize(&mut ArchiveDeserializer::new(self.region, offset as usize))
    }

    /// Returns the first record filed under `hash` that satisfies `matches`.
    pub fn lookup<T: Deserializable>(
        &self,
        hash: u32,
        mut matches: impl FnMut(&T) -> bool,
    ) -> Result<Option<T>, ArchiveError> {
        let bucket = hash % self.bucket_count;
        let start = self.bucket_start(bucket)?;
        let end = self.bucket_start(bucket + 1)?;
        if start > end || end > self.entry_count {
            return Err(ArchiveError::Malformed(format!("corrupt dictionary bucket {}", bucket)));
        }
        for index in start..end {
            let (entry_hash, offset) = self.entry(index)?;
            if entry_hash != hash {
                continue;
            }
            let record = self.record_at::<T>(offset)?;
            if matches(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Decodes every record, in bucket order.
    pub fn records<T: Deserializable>(&self) -> Result<Vec<T>, ArchiveError> {
        let mut records = Vec::with_capacity(self.len());
        for index in 0..self.entry_count {
            let (_, offset) = self.entry(index)?;
            records.push(self.record_at(offset)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cds::{archive_builder::BufferedArchiveBuilder, subgraph::ArchivedSubgraphRecord},
        heap::address::Address,
        runtime::{options::Options, vm::Runtime},
    };

    fn record(klass: usize, entries: u32) -> ArchivedSubgraphRecord {
        ArchivedSubgraphRecord {
            klass: Address::from(klass),
            is_full_module_graph: klass % 2 == 0,
            has_non_early_klasses: klass % 3 == 0,
            entry_field_records: (0..entries).map(|i| (i, i + 10)).collect(),
            subgraph_object_klasses: vec![Address::from(klass + 8)],
        }
    }

    #[test]
    fn lookup_compares_holder_after_hash() {
        let rt = Runtime::new(Options::default());
        let mut builder = BufferedArchiveBuilder::new(&rt);
        let mut writer = CompactDictionaryWriter::new();
        let records: Vec<_> = (1..=9).map(|i| record(i * 0x200, i as u32)).collect();
        for r in records.iter() {
            // everything in one hash chain
            writer.add(&mut builder, 7, r);
        }
        let table = writer.finish(&mut builder);

        let dictionary = CompactDictionary::new(builder.ro_region(), table).unwrap();
        assert_eq!(dictionary.len(), 9);
        for r in records.iter() {
            let found = dictionary
                .lookup::<ArchivedSubgraphRecord>(7, |candidate| candidate.klass == r.klass)
                .unwrap();
            assert_eq!(found.as_ref(), Some(r));
        }
        assert!(dictionary
            .lookup::<ArchivedSubgraphRecord>(8, |_| true)
            .unwrap()
            .is_none());
        assert_eq!(dictionary.records::<ArchivedSubgraphRecord>().unwrap().len(), 9);
    }

    #[test]
    fn empty_dictionary() {
        let rt = Runtime::new(Options::default());
        let mut builder = BufferedArchiveBuilder::new(&rt);
        let table = CompactDictionaryWriter::new().finish(&mut builder);
        let dictionary = CompactDictionary::new(builder.ro_region(), table).unwrap();
        assert!(dictionary.is_empty());
        assert!(dictionary
            .lookup::<ArchivedSubgraphRecord>(0, |_| true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn truncated_region_is_malformed() {
        let rt = Runtime::new(Options::default());
        let mut builder = BufferedArchiveBuilder::new(&rt);
        let mut writer = CompactDictionaryWriter::new();
        writer.add(&mut builder, 1, &record(0x400, 2));
        let table = writer.finish(&mut builder);
        let region = &builder.ro_region()[..builder.ro_region().len() - 4];
        assert!(matches!(
            CompactDictionary::new(region, table),
            Err(ArchiveError::Malformed(_))
        ));
    }
}
