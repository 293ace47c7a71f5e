//! Volume data store - chunk objects and chunk metadata pages on an I/O manager

use crate::compression::VolumeDataCodec;
use crate::data_block::DataBlock;
use crate::error::{Result, VdsError};
use crate::io::IOManager;
use crate::layer::VolumeDataLayer;
use crate::metadata::VdsDescriptor;
use crate::utils::{
    chunk_hash, chunk_metadata_url, chunk_url, format_bytes, DESCRIPTOR_OBJECT, LAYER_STATUS_OBJECT,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Hashes of a run of chunks; zero marks a chunk never written
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkMetadataPage {
    hashes: Vec<u64>,
    #[serde(skip)]
    dirty: bool,
}

type PageId = (String, i64);

/// Reads and writes the persistent objects of one volume
pub struct VolumeDataStore {
    io: Arc<dyn IOManager>,
    codec: Arc<dyn VolumeDataCodec>,
    metadata_page_size: usize,
    pages: Mutex<HashMap<PageId, ChunkMetadataPage>>,
}

impl VolumeDataStore {
    pub fn new(io: Arc<dyn IOManager>, codec: Arc<dyn VolumeDataCodec>, metadata_page_size: usize) -> Self {
        Self {
            io,
            codec,
            metadata_page_size: metadata_page_size.max(1),
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub async fn read_descriptor(&self) -> Result<VdsDescriptor> {
        let bytes = self.io.read(DESCRIPTOR_OBJECT).await?;
        VdsDescriptor::from_json(&bytes)
    }

    pub async fn write_descriptor(&self, descriptor: &VdsDescriptor) -> Result<()> {
        self.io.write(DESCRIPTOR_OBJECT, &descriptor.to_json()?).await
    }

    fn page_id(&self, layer: &VolumeDataLayer, chunk: i64) -> (PageId, usize) {
        let page = chunk / self.metadata_page_size as i64;
        let entry = (chunk % self.metadata_page_size as i64) as usize;
        ((layer.name().to_string(), page), entry)
    }

    /// Make sure the metadata page holding `chunk` is resident
    async fn load_page(&self, id: &PageId) -> Result<()> {
        if self.pages.lock().contains_key(id) {
            return Ok(());
        }
        let loaded = match self.io.read(&chunk_metadata_url(&id.0, id.1)).await {
            Ok(bytes) => bincode::deserialize::<ChunkMetadataPage>(&bytes)?,
            Err(VdsError::NotFound(_)) => ChunkMetadataPage {
                hashes: vec![0; self.metadata_page_size],
                dirty: false,
            },
            Err(e) => return Err(e),
        };
        if loaded.hashes.len() != self.metadata_page_size {
            return Err(VdsError::InvalidFormat(format!(
                "Chunk metadata page {}/{} holds {} entries, expected {}",
                id.0,
                id.1,
                loaded.hashes.len(),
                self.metadata_page_size
            )));
        }
        self.pages.lock().entry(id.clone()).or_insert(loaded);
        Ok(())
    }

    /// Recorded hash of a chunk, zero when it was never written
    pub async fn chunk_hash(&self, layer: &VolumeDataLayer, chunk: i64) -> Result<u64> {
        let (id, entry) = self.page_id(layer, chunk);
        self.load_page(&id).await?;
        Ok(self
            .pages
            .lock()
            .get(&id)
            .map(|page| page.hashes[entry])
            .unwrap_or(0))
    }

    /// Read and decode a chunk; `None` when it was never written
    pub async fn read_chunk(&self, layer: &VolumeDataLayer, chunk: i64) -> Result<Option<DataBlock>> {
        if self.chunk_hash(layer, chunk).await? == 0 {
            return Ok(None);
        }
        let url = chunk_url(layer.name(), chunk);
        let bytes = self.io.read(&url).await?;
        let size = layer.partition().chunk_extent(chunk).allocated_size();
        let block = self.codec.decode(&bytes, layer.channel().format, size)?;
        log::trace!("read {} ({})", url, format_bytes(bytes.len()));
        Ok(Some(block))
    }

    /// Encode and write a chunk, then record its hash
    pub async fn write_chunk(&self, layer: &VolumeDataLayer, chunk: i64, block: &DataBlock) -> Result<()> {
        let url = chunk_url(layer.name(), chunk);
        let bytes = self.codec.encode(block)?;
        self.io.write(&url, &bytes).await?;
        log::trace!("wrote {} ({})", url, format_bytes(bytes.len()));

        let (id, entry) = self.page_id(layer, chunk);
        self.load_page(&id).await?;
        if let Some(page) = self.pages.lock().get_mut(&id) {
            page.hashes[entry] = chunk_hash(&bytes);
            page.dirty = true;
        }
        Ok(())
    }

    /// Write every modified chunk metadata page, returning how many were written
    pub async fn flush_metadata(&self) -> Result<usize> {
        let dirty: Vec<(PageId, ChunkMetadataPage)> = self
            .pages
            .lock()
            .iter_mut()
            .filter(|(_, page)| page.dirty)
            .map(|(id, page)| {
                page.dirty = false;
                (id.clone(), page.clone())
            })
            .collect();

        let mut first_error = None;
        for (id, page) in &dirty {
            let result = match bincode::serialize(page) {
                Ok(bytes) => self.io.write(&chunk_metadata_url(&id.0, id.1), &bytes).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                if let Some(page) = self.pages.lock().get_mut(id) {
                    page.dirty = true;
                }
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(dirty.len()),
        }
    }

    /// Write how many chunks of each resident layer have been written
    pub async fn write_layer_status(&self) -> Result<()> {
        let mut status: BTreeMap<String, usize> = BTreeMap::new();
        for ((layer, _), page) in self.pages.lock().iter() {
            *status.entry(layer.clone()).or_default() +=
                page.hashes.iter().filter(|&&hash| hash != 0).count();
        }
        self.io
            .write(LAYER_STATUS_OBJECT, &serde_json::to_vec_pretty(&status)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelDescriptor;
    use crate::compression::{CompressionMethod, DefaultCodec};
    use crate::dimensions::DimensionsND;
    use crate::io::InMemoryIOManager;
    use crate::layer::LayerKey;
    use crate::layout::{BrickSize, LayoutDescriptor, VolumeDataLayout};
    use crate::metadata::MetadataContainer;
    use crate::types::{AxisDescriptor, Format, ValueRange};

    fn layer() -> VolumeDataLayer {
        let layout = VolumeDataLayout::new(
            LayoutDescriptor::new(BrickSize::Size32),
            vec![
                AxisDescriptor::new(64, "Sample", "ms", 0.0, 1.0),
                AxisDescriptor::new(64, "Crossline", "", 0.0, 1.0),
                AxisDescriptor::new(64, "Inline", "", 0.0, 1.0),
            ],
            vec![ChannelDescriptor::new(Format::R32, "Amplitude", "", ValueRange::new(-1.0, 1.0))],
            MetadataContainer::new(),
        )
        .unwrap();
        VolumeDataLayer::new(&layout, LayerKey::new(DimensionsND::Dimensions012, 0, 0)).unwrap()
    }

    fn store(io: Arc<InMemoryIOManager>) -> VolumeDataStore {
        VolumeDataStore::new(io, Arc::new(DefaultCodec::new(CompressionMethod::Deflate, 0.0)), 4)
    }

    #[tokio::test]
    async fn test_unwritten_chunk_reads_as_none() {
        let io = Arc::new(InMemoryIOManager::new());
        let store = store(io.clone());
        let layer = layer();
        assert!(store.read_chunk(&layer, 5).await.unwrap().is_none());
        assert_eq!(io.object_count(), 0);
    }

    #[tokio::test]
    async fn test_write_flush_and_reload() {
        let io = Arc::new(InMemoryIOManager::new());
        let layer = layer();
        let size = layer.partition().chunk_extent(5).allocated_size();
        let mut block = DataBlock::new(Format::R32, crate::types::Components::One, size);
        block.fill(0.5);

        let store_a = store(io.clone());
        store_a.write_chunk(&layer, 5, &block).await.unwrap();
        assert_ne!(store_a.chunk_hash(&layer, 5).await.unwrap(), 0);
        assert_eq!(store_a.flush_metadata().await.unwrap(), 1);
        assert_eq!(store_a.flush_metadata().await.unwrap(), 0);
        assert!(io.exists("Dimensions_012LOD0/ChunkMetadata/1").await.unwrap());

        let store_b = store(io.clone());
        let read = store_b.read_chunk(&layer, 5).await.unwrap().unwrap();
        assert_eq!(read, block);
        assert!(store_b.read_chunk(&layer, 4).await.unwrap().is_none());

        store_b.write_layer_status().await.unwrap();
        let status: BTreeMap<String, usize> =
            serde_json::from_slice(&io.read(LAYER_STATUS_OBJECT).await.unwrap()).unwrap();
        assert_eq!(status.get("Dimensions_012LOD0"), Some(&1));
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_not_found() {
        let store = store(Arc::new(InMemoryIOManager::new()));
        assert!(matches!(store.read_descriptor().await, Err(VdsError::NotFound(_))));
    }
}
