//! Ingestion and collection lifecycle tests over the in-memory backend.

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{harness, ScriptedGeneration, BACH_KHOA};
use rag_gateway::ingest::IngestRequest;
use rag_gateway_core::models::Metadata;
use rag_gateway_core::store::VectorIndex;
use rag_gateway_core::RagError;

fn request(collection: &str, content: &str, document_id: Option<&str>) -> IngestRequest {
    IngestRequest {
        content: content.to_string(),
        collection: collection.to_string(),
        metadata: Metadata::new(),
        document_id: document_id.map(str::to_string),
    }
}

async fn chunk_ids(h: &common::Harness, collection: &str, document_id: &str) -> HashSet<String> {
    h.index
        .inner
        .query(collection, &common::hash_vector("x"), 10_000)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.chunk.document_id == document_id)
        .map(|c| c.chunk.chunk_id)
        .collect()
}

#[tokio::test]
async fn test_create_ingest_list() {
    let h = harness(ScriptedGeneration::new(&[]));
    let registry = h.gateway.registry();

    registry
        .create("uni-admissions", Metadata::new())
        .await
        .unwrap();
    let outcome = h
        .gateway
        .pipeline()
        .ingest(request("uni-admissions", BACH_KHOA, Some("")))
        .await
        .unwrap();

    assert!(outcome.chunks_created >= 1);
    assert!(!outcome.document_id.is_empty());
    assert!(!outcome.collection_created);

    let collections = registry.list().await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].name, "uni-admissions");
    assert_eq!(collections[0].document_count, 1);
}

#[tokio::test]
async fn test_chunks_carry_document_metadata() {
    let h = harness(ScriptedGeneration::new(&[]));
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), "moet.gov.vn".into());
    h.gateway
        .pipeline()
        .ingest(IngestRequest {
            metadata,
            ..request("uni", BACH_KHOA, Some("bk"))
        })
        .await
        .unwrap();

    let hits = h
        .index
        .inner
        .query("uni", &common::hash_vector("tuition"), 100)
        .await
        .unwrap();
    assert!(hits.len() > 1);
    for hit in hits {
        assert_eq!(hit.chunk.metadata["source"], "moet.gov.vn");
        assert_eq!(hit.chunk.metadata["document_id"], "bk");
        assert_eq!(hit.chunk.metadata["chunk_index"], hit.chunk.ordinal.to_string());
        assert!(hit.chunk.metadata.contains_key("indexed_at"));
        assert_eq!(hit.chunk.chunk_id, format!("bk_{}", hit.chunk.ordinal));
    }
}

#[tokio::test]
async fn test_ingest_auto_creates_collection() {
    let h = harness(ScriptedGeneration::new(&[]));
    let outcome = h
        .gateway
        .pipeline()
        .ingest(request("fresh", "Some content about careers.", None))
        .await
        .unwrap();
    assert!(outcome.collection_created);
    assert!(h.gateway.registry().get("fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn test_reingest_replaces_previous_chunks() {
    let h = harness(ScriptedGeneration::new(&[]));
    let pipeline = h.gateway.pipeline();

    let long = BACH_KHOA.repeat(3);
    let first = pipeline
        .ingest(request("uni", &long, Some("doc-1")))
        .await
        .unwrap();
    let second = pipeline
        .ingest(request("uni", "Short replacement text.", Some("doc-1")))
        .await
        .unwrap();

    assert!(first.chunks_created > second.chunks_created);
    assert_eq!(second.chunks_created, 1);
    let ids = chunk_ids(&h, "uni", "doc-1").await;
    assert_eq!(ids, HashSet::from(["doc-1_0".to_string()]));

    let hits = h.index.inner.query("uni", &common::hash_vector("x"), 100).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.text, "Short replacement text.");
    assert_eq!(
        h.gateway.registry().get("uni").await.unwrap().unwrap().document_count,
        1
    );
}

#[tokio::test]
async fn test_generated_ids_are_stable_for_identical_content() {
    let h = harness(ScriptedGeneration::new(&[]));
    let pipeline = h.gateway.pipeline();
    let a = pipeline.ingest(request("uni", BACH_KHOA, None)).await.unwrap();
    let b = pipeline.ingest(request("uni", BACH_KHOA, None)).await.unwrap();
    assert_eq!(a.document_id, b.document_id);
    assert_eq!(
        h.gateway.registry().get("uni").await.unwrap().unwrap().document_count,
        1
    );
}

#[tokio::test]
async fn test_document_count_matches_live_documents() {
    let h = harness(ScriptedGeneration::new(&[]));
    let pipeline = h.gateway.pipeline();
    let registry = h.gateway.registry();

    let ops: &[(&str, bool)] = &[
        ("a", true),
        ("b", true),
        ("c", true),
        ("b", false),
        ("a", true),
        ("d", true),
        ("c", false),
        ("missing", false),
    ];
    for (doc, ingest) in ops {
        if *ingest {
            pipeline
                .ingest(request("uni", &format!("content of {}", doc), Some(doc)))
                .await
                .unwrap();
        } else {
            pipeline.delete_document("uni", doc).await.unwrap();
        }
        let live = h.index.inner.document_count("uni").await.unwrap();
        let recorded = registry.get("uni").await.unwrap().unwrap().document_count;
        assert_eq!(recorded, live, "after {:?} {}", ingest, doc);
    }
    assert_eq!(registry.get("uni").await.unwrap().unwrap().document_count, 2);
}

#[tokio::test]
async fn test_empty_content_and_missing_collection_are_rejected() {
    let h = harness(ScriptedGeneration::new(&[]));
    let pipeline = h.gateway.pipeline();

    let err = pipeline.ingest(request("uni", "   ", None)).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    let err = pipeline.ingest(request("", "text", None)).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_then_ingest_recreates_consistently() {
    let h = harness(ScriptedGeneration::new(&[]));
    let registry = h.gateway.registry();
    let pipeline = h.gateway.pipeline();

    registry.create("uni-admissions", Metadata::new()).await.unwrap();
    pipeline
        .ingest(request("uni-admissions", BACH_KHOA, None))
        .await
        .unwrap();

    for _ in 0..3 {
        registry.delete("uni-admissions").await.unwrap();
        assert!(registry.get("uni-admissions").await.unwrap().is_none());

        let outcome = pipeline
            .ingest(request("uni-admissions", BACH_KHOA, None))
            .await
            .unwrap();
        assert!(outcome.collection_created);
        let record = registry.get("uni-admissions").await.unwrap().unwrap();
        assert_eq!(record.document_count, 1);
    }
}

#[tokio::test]
async fn test_embedding_failure_keeps_previous_version() {
    let h = harness(ScriptedGeneration::new(&[]));
    let pipeline = h.gateway.pipeline();
    pipeline
        .ingest(request("uni", BACH_KHOA, Some("doc")))
        .await
        .unwrap();
    let before = chunk_ids(&h, "uni", "doc").await;

    h.embedder.fail.store(true, Ordering::SeqCst);
    let err = pipeline
        .ingest(request("uni", "new text", Some("doc")))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingProvider { .. }));

    assert_eq!(chunk_ids(&h, "uni", "doc").await, before);
}

#[tokio::test]
async fn test_upsert_failure_rolls_back_partial_chunks() {
    let h = harness(ScriptedGeneration::new(&[]));
    h.index.fail_upsert.store(true, Ordering::SeqCst);

    let err = h
        .gateway
        .pipeline()
        .ingest(request("uni", &BACH_KHOA.repeat(2), Some("doc")))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Store(_)));

    assert!(chunk_ids(&h, "uni", "doc").await.is_empty());
    assert_eq!(
        h.gateway.registry().get("uni").await.unwrap().unwrap().document_count,
        0
    );
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let h = harness(ScriptedGeneration::new(&[]));
    h.index.fail_upsert.store(true, Ordering::SeqCst);
    h.index.fail_delete.store(true, Ordering::SeqCst);

    let err = h
        .gateway
        .pipeline()
        .ingest(request("uni", BACH_KHOA, Some("doc")))
        .await
        .unwrap_err();
    match err {
        RagError::IngestionRollback { document_id, .. } => assert_eq!(document_id, "doc"),
        other => panic!("expected rollback error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_document_requires_collection() {
    let h = harness(ScriptedGeneration::new(&[]));
    let err = h
        .gateway
        .pipeline()
        .delete_document("nowhere", "doc")
        .await
        .unwrap_err();
    assert_eq!(err, RagError::collection_not_found("nowhere"));
}

#[tokio::test]
async fn test_concurrent_ingest_of_same_document_is_serialized() {
    let h = Arc::new(harness(ScriptedGeneration::new(&[])));
    let mut tasks = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let content = format!("{} version {}", BACH_KHOA, i).repeat(i % 3 + 1);
            h.gateway
                .pipeline()
                .ingest(request("uni", &content, Some("same")))
                .await
                .unwrap()
                .chunks_created
        }));
    }
    let mut created = Vec::new();
    for t in tasks {
        created.push(t.await.unwrap());
    }

    // Whatever ingest won last, the index holds exactly one version.
    let ids = chunk_ids(&h, "uni", "same").await;
    assert!(created.contains(&ids.len()));
    let expected: HashSet<String> = (0..ids.len()).map(|i| format!("same_{}", i)).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_count_update_failure_rolls_back_chunks() {
    let h = harness(ScriptedGeneration::new(&[]));
    h.catalog.fail_count.store(true, Ordering::SeqCst);

    let err = h
        .gateway
        .pipeline()
        .ingest(request("uni", BACH_KHOA, Some("doc")))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Store(_)));

    // Index and catalog agree: nothing was ingested.
    assert!(chunk_ids(&h, "uni", "doc").await.is_empty());
    assert_eq!(h.index.inner.document_count("uni").await.unwrap(), 0);
    assert_eq!(
        h.gateway.registry().get("uni").await.unwrap().unwrap().document_count,
        0
    );

    h.catalog.fail_count.store(false, Ordering::SeqCst);
    h.gateway
        .pipeline()
        .ingest(request("uni", BACH_KHOA, Some("doc")))
        .await
        .unwrap();
    assert_eq!(
        h.gateway.registry().get("uni").await.unwrap().unwrap().document_count,
        1
    );
}

#[tokio::test]
async fn test_collection_delete_waits_for_inflight_ingest() {
    let h = Arc::new(harness(ScriptedGeneration::new(&[])));
    h.embedder.hold_next();

    let ingest = {
        let h = h.clone();
        tokio::spawn(async move {
            h.gateway
                .pipeline()
                .ingest(request("uni", BACH_KHOA, Some("doc")))
                .await
        })
    };
    // The ingest has created the collection and is parked in embedding.
    h.embedder.entered.notified().await;
    assert!(h.gateway.registry().get("uni").await.unwrap().is_some());

    let delete = {
        let h = h.clone();
        tokio::spawn(async move { h.gateway.registry().delete("uni").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!delete.is_finished());

    h.embedder.release.notify_one();
    let outcome = ingest.await.unwrap().unwrap();
    assert!(outcome.collection_created);
    delete.await.unwrap().unwrap();

    // The delete ran after the ingest finished and removed all of it.
    assert!(h.gateway.registry().get("uni").await.unwrap().is_none());
    assert!(!h.index.inner.has_collection("uni").await.unwrap());
    assert!(chunk_ids(&h, "uni", "doc").await.is_empty());
}

#[tokio::test]
async fn test_ingest_waits_for_inflight_collection_delete() {
    let h = Arc::new(harness(ScriptedGeneration::new(&[])));
    h.gateway
        .pipeline()
        .ingest(request("uni", BACH_KHOA, Some("old")))
        .await
        .unwrap();

    let held = h.gateway.registry().read_lock("uni").await;
    let delete = {
        let h = h.clone();
        tokio::spawn(async move { h.gateway.registry().delete("uni").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!delete.is_finished());

    // Queued behind the writer, so it sees the collection already gone.
    let ingest = {
        let h = h.clone();
        tokio::spawn(async move {
            h.gateway
                .pipeline()
                .ingest(request("uni", "Tuition rises next year.", Some("new")))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    delete.await.unwrap().unwrap();
    let outcome = ingest.await.unwrap().unwrap();
    assert!(outcome.collection_created);

    let record = h.gateway.registry().get("uni").await.unwrap().unwrap();
    assert_eq!(record.document_count, 1);
    assert_eq!(h.index.inner.document_count("uni").await.unwrap(), 1);
    assert!(chunk_ids(&h, "uni", "old").await.is_empty());
}
