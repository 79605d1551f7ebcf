use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const ID: &str = "id";
pub const SEQ: &str = "seq";
pub const CONTENT: &str = "content";
pub const CONTENT_HASH: &str = "content_hash";
pub const METADATA: &str = "metadata";
pub const VECTOR: &str = "vector";

/// Chunk table layout. `metadata` holds the chunk metadata as JSON; `seq`
/// preserves insertion order across appends.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new(ID, DataType::Utf8, false),
		Field::new(SEQ, DataType::Int64, false),
		Field::new(CONTENT, DataType::Utf8, false),
		Field::new(CONTENT_HASH, DataType::Utf8, false),
		Field::new(METADATA, DataType::Utf8, false),
		Field::new(VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Hex blake3 digest of a chunk's content.
pub fn content_hash(content: &str) -> String { blake3::hash(content.as_bytes()).to_hex().to_string() }

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vector_column_has_requested_dim() {
		let schema = build_chunk_schema(8);
		let field = schema.field_with_name(VECTOR).unwrap();
		assert!(matches!(field.data_type(), DataType::FixedSizeList(_, 8)));
		assert_eq!(schema.fields().len(), 6);
	}

	#[test]
	fn hash_is_stable_hex() {
		assert_eq!(content_hash("abc"), content_hash("abc"));
		assert_ne!(content_hash("abc"), content_hash("abd"));
		assert_eq!(content_hash("abc").len(), 64);
	}
}
