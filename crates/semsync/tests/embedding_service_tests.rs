//! Embedding service call policy against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::harness::fast_settings;
use common::MockProvider;
use semsync::embedding::{EmbeddingError, EmbeddingService, EmbeddingSettings, TRUNCATION_MARKER};

fn service(provider: &Arc<MockProvider>, settings: EmbeddingSettings) -> EmbeddingService {
    EmbeddingService::new(provider.clone(), settings)
}

#[tokio::test]
async fn test_embed_many_splits_into_batches_in_order() {
    let provider = Arc::new(MockProvider::new());
    let svc = service(
        &provider,
        EmbeddingSettings {
            batch_size: 2,
            ..fast_settings()
        },
    );
    let texts: Vec<String> = ["alpha", "  ", "beta", "gamma", "delta"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let vectors = svc.embed_many(&texts).await.unwrap();

    assert_eq!(vectors.len(), 4);
    assert_eq!(provider.calls(), 2);
    assert_eq!(provider.texts(), vec!["alpha", "beta", "gamma", "delta"]);
    assert_eq!(vectors[2], MockProvider::vector_for("gamma"));
}

#[tokio::test]
async fn test_blank_input_never_reaches_provider() {
    let provider = Arc::new(MockProvider::new());
    let svc = service(&provider, fast_settings());

    assert_eq!(svc.embed_one(" \n\t ").await, Err(EmbeddingError::EmptyInput));
    assert!(svc
        .embed_many(&["".to_string(), "   ".to_string()])
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        svc.embed_batch(&["ok".to_string(), " ".to_string()]).await,
        Err(EmbeddingError::EmptyInput)
    ));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_long_text_is_truncated_before_sending() {
    let provider = Arc::new(MockProvider::new());
    let svc = service(
        &provider,
        EmbeddingSettings {
            max_chars: 40,
            ..fast_settings()
        },
    );

    svc.embed_one(&"word ".repeat(50)).await.unwrap();

    let sent = provider.texts().pop().unwrap();
    assert_eq!(sent.chars().count(), 40);
    assert!(sent.ends_with(TRUNCATION_MARKER));
}

#[tokio::test]
async fn test_single_failure_is_retried() {
    let provider = Arc::new(MockProvider::new().failing_calls(&[0]));
    let svc = service(&provider, fast_settings());

    let vector = svc.embed_one("orders table").await.unwrap();

    assert_eq!(vector, MockProvider::vector_for("orders table"));
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_second_failure_surfaces_provider_error() {
    let provider = Arc::new(MockProvider::new().failing_calls(&[0, 1]));
    let svc = service(&provider, fast_settings());

    let err = svc.embed_one("orders table").await.unwrap_err();

    assert!(matches!(err, EmbeddingError::Provider(_)));
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_millis(500)));
    let svc = service(
        &provider,
        EmbeddingSettings {
            timeout: Duration::from_millis(20),
            ..fast_settings()
        },
    );

    let err = svc.embed_one("orders table").await.unwrap_err();

    match err {
        EmbeddingError::Provider(msg) => assert!(msg.contains("timed out"), "got: {}", msg),
        other => panic!("expected provider error, got {:?}", other),
    }
    assert_eq!(provider.calls(), 2);
}

#[test]
fn test_disabled_provider_is_a_configuration_error() {
    let config = semsync::config::EmbeddingConfig {
        provider: "disabled".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        EmbeddingService::from_config(&config),
        Err(EmbeddingError::Configuration(_))
    ));
}
