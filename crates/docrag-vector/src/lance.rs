use anyhow::{anyhow, bail, Context, Result};
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use docrag_core::traits::{Embedder, VectorStore};
use docrag_core::types::{Chunk, ChunkMetadata, ScoredChunk};

use crate::schema::{self, build_chunk_schema, content_hash};

/// Chunk store backed by a LanceDB table under `persist_dir`.
///
/// Scores are cosine similarities (`1 - distance`), higher is better.
pub struct LanceVectorStore {
	db: Connection,
	table_name: String,
	embedder: Arc<dyn Embedder>,
}

impl LanceVectorStore {
	pub async fn open(db_path: &Path, table_name: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
		let db = connect(db_path.to_string_lossy().as_ref()).execute().await?;
		info!(path = %db_path.display(), collection = table_name, "vector store opened");
		Ok(Self { db, table_name: table_name.to_string(), embedder })
	}

	async fn table(&self) -> Result<Option<Table>> {
		if !self.db.table_names().execute().await?.contains(&self.table_name) {
			return Ok(None);
		}
		Ok(Some(self.db.open_table(&self.table_name).execute().await?))
	}

	fn dim(&self) -> Result<i32> { i32::try_from(self.embedder.dim()).context("embedding dimension out of range") }

	fn to_record_batch(&self, chunks: &[Chunk], vectors: Vec<Vec<f32>>, first_seq: i64) -> Result<RecordBatch> {
		let dim = self.dim()?;
		let mut ids = Vec::with_capacity(chunks.len());
		let mut seqs = Vec::with_capacity(chunks.len());
		let mut contents = Vec::with_capacity(chunks.len());
		let mut hashes = Vec::with_capacity(chunks.len());
		let mut metas = Vec::with_capacity(chunks.len());
		for (seq, chunk) in (first_seq..).zip(chunks) {
			let hash = content_hash(&chunk.content);
			ids.push(format!("{seq:08}-{}", &hash[..16]));
			seqs.push(seq);
			contents.push(chunk.content.clone());
			hashes.push(hash);
			metas.push(serde_json::to_string(&chunk.metadata)?);
		}
		for v in &vectors {
			if v.len() != self.embedder.dim() {
				bail!("embedding has {} dimensions, expected {}", v.len(), self.embedder.dim());
			}
		}
		let vectors = vectors.into_iter().map(|v| Some(v.into_iter().map(Some).collect::<Vec<_>>()));
		Ok(RecordBatch::try_new(
			build_chunk_schema(dim),
			vec![
				Arc::new(StringArray::from(ids)),
				Arc::new(Int64Array::from(seqs)),
				Arc::new(StringArray::from(contents)),
				Arc::new(StringArray::from(hashes)),
				Arc::new(StringArray::from(metas)),
				Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
			],
		)?)
	}
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| anyhow!("{name} column missing"))
}

/// Rows of a result batch as `(seq, chunk, distance)`.
fn read_rows(batch: &RecordBatch) -> Result<Vec<(i64, Chunk, Option<f32>)>> {
	let contents = string_col(batch, schema::CONTENT)?;
	let metas = string_col(batch, schema::METADATA)?;
	let seqs = batch
		.column_by_name(schema::SEQ)
		.and_then(|c| c.as_any().downcast_ref::<Int64Array>())
		.ok_or_else(|| anyhow!("seq column missing"))?;
	let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

	let mut rows = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let metadata: ChunkMetadata = serde_json::from_str(metas.value(i)).context("corrupt chunk metadata")?;
		let distance = distances.filter(|d| !d.is_null(i)).map(|d| d.value(i));
		rows.push((seqs.value(i), Chunk::new(contents.value(i), metadata), distance));
	}
	Ok(rows)
}

#[async_trait]
impl VectorStore for LanceVectorStore {
	fn collection_name(&self) -> &str { &self.table_name }

	async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
		if chunks.is_empty() {
			return Ok(0);
		}
		let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
		let vectors = self.embedder.embed_documents(&texts).await?;
		if vectors.len() != chunks.len() {
			bail!("embedder returned {} vectors for {} chunks", vectors.len(), chunks.len());
		}

		let existing = self.table().await?;
		let first_seq = match &existing {
			Some(t) => i64::try_from(t.count_rows(None).await?)?,
			None => 0,
		};
		let batch = self.to_record_batch(chunks, vectors, first_seq)?;
		let schema = batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		match existing {
			Some(table) => {
				table.add(reader).execute().await?;
			}
			None => {
				self.db.create_table(&self.table_name, reader).execute().await?;
			}
		}
		info!(collection = %self.table_name, added = chunks.len(), "chunks stored");
		Ok(chunks.len())
	}

	async fn similarity_search_with_score(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
		let Some(table) = self.table().await? else {
			return Ok(Vec::new());
		};
		if k == 0 {
			return Ok(Vec::new());
		}
		let query_vec = self.embedder.embed_query(query).await?;
		let mut stream = table.vector_search(query_vec)?.distance_type(DistanceType::Cosine).limit(k).execute().await?;

		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			for (_, chunk, distance) in read_rows(&batch)? {
				hits.push(ScoredChunk::new(chunk, 1.0 - distance.unwrap_or(1.0)));
			}
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score));
		debug!(k, hits = hits.len(), "vector search");
		Ok(hits)
	}

	async fn delete_collection(&self) -> Result<()> {
		if let Some(table) = self.table().await? {
			table.delete("true").await?;
			info!(collection = %self.table_name, "collection cleared");
		}
		Ok(())
	}

	async fn count(&self) -> Result<usize> {
		match self.table().await? {
			Some(table) => Ok(table.count_rows(None).await?),
			None => Ok(0),
		}
	}

	async fn snapshot(&self, limit: usize) -> Result<Vec<Chunk>> {
		let Some(table) = self.table().await? else {
			return Ok(Vec::new());
		};
		let mut stream = table.query().limit(limit).execute().await?;
		let mut rows = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			rows.extend(read_rows(&batch)?);
		}
		rows.sort_by_key(|(seq, _, _)| *seq);
		Ok(rows.into_iter().map(|(_, chunk, _)| chunk).collect())
	}
}
