use async_trait::async_trait;
use log::{ info, warn };
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    value::Kind,
    vectors_config::Config as VectorsConfig,
    CountPointsBuilder,
    CreateCollectionBuilder,
    Distance,
    PointStruct,
    SearchPointsBuilder,
    UpsertPointsBuilder,
    Value as QdrantValue,
    VectorParams,
};
use serde_json::{ Map, Value };
use std::collections::HashMap;
use std::error::Error as StdError;
use uuid::Uuid;

use super::store::{ check_lengths, ScoredDocument, StoreError, StoredDocument, VectorStore };

const DOC_ID_FIELD: &str = "doc_id";
const TEXT_FIELD: &str = "text";
const METADATA_FIELD: &str = "metadata";

pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantVectorStore {
    pub async fn new(
        url: &str,
        api_key: &str,
        collection: &str,
        dimension: usize
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let mut builder = Qdrant::from_url(url);
        if !api_key.is_empty() {
            builder = builder.api_key(api_key.to_string());
        }
        let client = builder.build()?;
        let store = Self {
            client,
            collection: collection.to_string(),
            dimension,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        if self.client.collection_exists(self.collection.clone()).await? {
            return Ok(());
        }
        info!("Creating Qdrant collection '{}' (dimension {})", self.collection, self.dimension);
        let cfg = CreateCollectionBuilder::new(self.collection.clone()).vectors_config(
            VectorsConfig::Params(VectorParams {
                size: self.dimension as u64,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })
        );
        self.client.create_collection(cfg).await?;
        Ok(())
    }
}

// Qdrant only accepts unsigned integers or UUIDs as point ids.
fn point_id(doc_id: &str) -> String {
    match doc_id.rsplit('_').next().and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => Uuid::from_u64_pair(0, n).to_string(),
        None => Uuid::new_v4().to_string(),
    }
}

fn to_json(value: QdrantValue) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::from(i),
        Some(Kind::DoubleValue(d)) => Value::from(d),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(list.values.into_iter().map(to_json).collect()),
        Some(Kind::StructValue(st)) => {
            Value::Object(
                st.fields
                    .into_iter()
                    .map(|(k, v)| (k, to_json(v)))
                    .collect()
            )
        }
    }
}

fn to_document(mut payload: HashMap<String, QdrantValue>) -> Option<StoredDocument> {
    let id = match payload.remove(DOC_ID_FIELD).map(to_json) {
        Some(Value::String(s)) => s,
        _ => {
            return None;
        }
    };
    let text = match payload.remove(TEXT_FIELD).map(to_json) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let metadata = match payload.remove(METADATA_FIELD).map(to_json) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    Some(StoredDocument { id, text, metadata })
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn add(
        &self,
        docs: Vec<StoredDocument>,
        embeddings: Vec<Vec<f32>>
    ) -> Result<(), Box<dyn StdError + Send + Sync>> {
        check_lengths(docs.len(), embeddings.len())?;
        if docs.is_empty() {
            return Ok(());
        }

        let mut points = Vec::with_capacity(docs.len());
        for (doc, embedding) in docs.into_iter().zip(embeddings) {
            if embedding.len() != self.dimension {
                return Err(
                    Box::new(
                        StoreError(
                            format!(
                                "Embedding dimension {} does not match collection dimension {}",
                                embedding.len(),
                                self.dimension
                            )
                        )
                    )
                );
            }
            let mut payload = Map::new();
            payload.insert(DOC_ID_FIELD.to_string(), Value::String(doc.id.clone()));
            payload.insert(TEXT_FIELD.to_string(), Value::String(doc.text));
            payload.insert(METADATA_FIELD.to_string(), Value::Object(doc.metadata));
            points.push(PointStruct::new(point_id(&doc.id), embedding, payload));
        }

        self.client.upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true)).await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize
    ) -> Result<Vec<ScoredDocument>, Box<dyn StdError + Send + Sync>> {
        let resp = self.client.search_points(
            SearchPointsBuilder::new(&self.collection, embedding.to_vec(), n_results as u64).with_payload(
                true
            )
        ).await?;

        let mut hits = Vec::with_capacity(resp.result.len());
        for point in resp.result {
            let score = point.score;
            match to_document(point.payload) {
                Some(document) => hits.push(ScoredDocument { score, document }),
                None => warn!("Skipping Qdrant point without a document id"),
            }
        }
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        let resp = self.client.count(CountPointsBuilder::new(&self.collection).exact(true)).await?;
        Ok(resp.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn reset(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        if self.client.collection_exists(self.collection.clone()).await? {
            self.client.delete_collection(self.collection.clone()).await?;
        }
        self.ensure_collection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::{ ListValue, Struct };

    fn string(s: &str) -> QdrantValue {
        QdrantValue { kind: Some(Kind::StringValue(s.to_string())) }
    }

    #[test]
    fn numbered_ids_map_to_stable_points() {
        assert_eq!(point_id("doc_7"), point_id("doc_7"));
        assert_ne!(point_id("doc_7"), point_id("doc_8"));
        assert_eq!(point_id("doc_1"), "00000000-0000-0000-0000-000000000001");
    }

    #[test]
    fn payload_round_trips_into_document() {
        let mut fields = HashMap::new();
        fields.insert("source".to_string(), string("data/processed/FCS.json"));
        fields.insert("chunk_part".to_string(), QdrantValue { kind: Some(Kind::IntegerValue(2)) });
        fields.insert(
            "tags".to_string(),
            QdrantValue { kind: Some(Kind::ListValue(ListValue { values: vec![string("a")] })) }
        );

        let mut payload = HashMap::new();
        payload.insert(DOC_ID_FIELD.to_string(), string("doc_3"));
        payload.insert(TEXT_FIELD.to_string(), string("Braise slowly."));
        payload.insert(METADATA_FIELD.to_string(), QdrantValue {
            kind: Some(Kind::StructValue(Struct { fields })),
        });

        let doc = to_document(payload).unwrap();
        assert_eq!(doc.id, "doc_3");
        assert_eq!(doc.text, "Braise slowly.");
        assert_eq!(doc.source(), Some("data/processed/FCS.json"));
        assert_eq!(doc.metadata["chunk_part"], 2);
        assert_eq!(doc.metadata["tags"], serde_json::json!(["a"]));
        assert!(to_document(HashMap::new()).is_none());
    }
}
