use super::domain::{Identity, ProspectRecord};

/// Default number of prospects dispatched to the model in one call.
pub const CHUNK_SIZE: usize = 20;

/// A prospect admitted for dispatch, tagged with its 1-indexed input position.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEntry {
    pub position: usize,
    pub identity: Identity,
    pub record: ProspectRecord,
}

/// Positional slice of the admitted prospects; boundaries carry no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 1-indexed chunk number, used in logs.
    pub number: usize,
    pub entries: Vec<ChunkEntry>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> Vec<&ProspectRecord> {
        self.entries.iter().map(|entry| &entry.record).collect()
    }
}

/// Splits `entries` into consecutive chunks of at most `chunk_size` items.
///
/// A `chunk_size` of zero is treated as one.
pub fn chunk_entries(entries: Vec<ChunkEntry>, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks: Vec<Chunk> = Vec::with_capacity(entries.len().div_ceil(chunk_size));

    for entry in entries {
        match chunks.last_mut() {
            Some(chunk) if chunk.entries.len() < chunk_size => chunk.entries.push(entry),
            _ => chunks.push(Chunk {
                number: chunks.len() + 1,
                entries: vec![entry],
            }),
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(count: usize) -> Vec<ChunkEntry> {
        (1..=count)
            .map(|position| ChunkEntry {
                position,
                identity: Identity::auto(position),
                record: ProspectRecord::new(),
            })
            .collect()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_entries(Vec::new(), CHUNK_SIZE).is_empty());
    }

    #[test]
    fn splits_forty_five_into_twenty_twenty_five() {
        let chunks = chunk_entries(entries(45), CHUNK_SIZE);
        let sizes: Vec<usize> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
        assert_eq!(
            chunks.iter().map(|chunk| chunk.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn preserves_order_across_and_within_chunks() {
        let chunks = chunk_entries(entries(7), 3);
        let positions: Vec<usize> = chunks
            .iter()
            .flat_map(|chunk| chunk.entries.iter().map(|entry| entry.position))
            .collect();
        assert_eq!(positions, (1..=7).collect::<Vec<_>>());
        assert_eq!(chunks[1].entries[0].position, 4);
    }

    #[test]
    fn zero_chunk_size_behaves_as_one() {
        assert_eq!(chunk_entries(entries(3), 0).len(), 3);
    }
}
