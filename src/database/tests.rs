use super::*;

#[test]
fn capacity_errors_are_classified() {
    let capacity = StoreError::CapacityExceeded {
        partition: 0,
        bytes: 2048,
        limit: 1024,
    };
    assert!(capacity.is_capacity());
    assert!(capacity.to_string().contains("increase the number of partitions"));

    let corrupt = StoreError::Corrupt("bad file".to_string());
    assert!(!corrupt.is_capacity());
}

#[test]
fn integrity_report_health() {
    assert!(IntegrityReport::default().is_healthy());

    let report = IntegrityReport {
        checked: 3,
        invalid_ids: vec!["abc".to_string()],
        affected_files: vec!["note.md".to_string()],
    };
    assert!(!report.is_healthy());
}

#[test]
fn vector_record_metadata_defaults_when_absent() {
    let json = serde_json::json!({
        "id": "id",
        "path": "note.md",
        "title": "note",
        "content": "text",
        "embedding": [0.5],
        "embedding_model": "model",
        "ctime": 1,
        "mtime": 2,
        "tags": ["#a"],
        "extension": "md",
        "created_at": "2024-01-01T00:00:00Z",
        "nchars": 4
    });

    let record: VectorRecord = serde_json::from_value(json).expect("can parse record");
    assert!(record.metadata.is_empty());
    assert_eq!(record.tags, vec!["#a"]);
}
