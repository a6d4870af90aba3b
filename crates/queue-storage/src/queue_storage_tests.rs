//! Tests for the queue storage provider.

use super::*;
use crate::monitoring::RecordingStorageObserver;
use crate::persisted::PERSISTED_CONTAINER;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Job {
    id: u32,
    name: String,
}

fn job(id: u32) -> Job {
    Job {
        id,
        name: format!("job-{id}"),
    }
}

struct Harness {
    transport: Arc<InMemoryQueueTransport>,
    blobs: Arc<InMemoryBlobStorage>,
    observer: Arc<RecordingStorageObserver>,
    provider: QueueStorageProvider,
}

fn harness_with(settings: QueueStorageSettings) -> Harness {
    let transport = Arc::new(InMemoryQueueTransport::default());
    let blobs = Arc::new(InMemoryBlobStorage::new());
    let observer = Arc::new(RecordingStorageObserver::new());
    let provider = QueueStorageProvider::new(
        transport.clone(),
        blobs.clone(),
        JsonDataSerializer,
        settings,
    )
    .with_observer(observer.clone());

    Harness {
        transport,
        blobs,
        observer,
        provider,
    }
}

fn harness() -> Harness {
    harness_with(QueueStorageSettings::default())
}

fn short_visibility() -> GetOptions {
    GetOptions::new().with_visibility_timeout(Duration::from_secs(10))
}

// ============================================================================
// Put / Get Tests
// ============================================================================

mod put_get {
    use super::*;

    #[tokio::test]
    async fn test_put_creates_missing_queue() {
        let h = harness();

        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();

        assert_eq!(h.provider.list_queues("").await.unwrap(), vec!["jobs"]);
        assert!(h.observer.events().iter().any(|e| matches!(
            e,
            StorageEvent::OperationRetried { policy, .. } if policy == CREATE_MISSING_QUEUE_POLICY
        )));
        assert_eq!(h.observer.succeeded(StorageOperation::Put), 1);
    }

    #[tokio::test]
    async fn test_round_trip_registers_ticket() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();

        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 10, GetOptions::new()).await.unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, job(1));
        assert_eq!(received[0].dequeue_count, 1);
        assert_eq!(received[0].ticket.queue_name().as_str(), "jobs");
        assert_eq!(h.provider.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_get_on_missing_queue_is_empty() {
        let h = harness();

        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("missing", 5, GetOptions::new()).await.unwrap();

        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_queue_name_is_validation_error() {
        let h = harness();

        let result = h.provider.put("Not_Valid", &job(1), PutOptions::new()).await;

        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    #[tokio::test]
    async fn test_get_collects_across_transport_batches() {
        let h = harness();
        h.provider
            .put_range("jobs", (0..40).map(job), PutOptions::new())
            .await
            .unwrap();

        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 40, GetOptions::new()).await.unwrap();

        assert_eq!(received.len(), 40);
    }

    #[tokio::test]
    async fn test_legacy_body_without_envelope_is_readable() {
        let h = harness();
        let queue = QueueName::from_str("legacy").unwrap();
        h.transport.create_queue(&queue).await.unwrap();
        h.transport
            .send_message(&queue, Bytes::from(r#"{"id":5,"name":"old"}"#), None, None)
            .await
            .unwrap();

        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("legacy", 1, GetOptions::new()).await.unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message.id, 5);
        assert_eq!(received[0].dequeue_count, 1);
    }

    #[tokio::test]
    async fn test_put_range_parallel_counts_all() {
        let h = harness();

        let count = h
            .provider
            .put_range_parallel("jobs", (0..50).map(job), PutOptions::new())
            .await
            .unwrap();

        assert_eq!(count, 50);
        assert_eq!(h.provider.approximate_count("jobs").await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_put_range_parallel_rejects_invalid_queue_name() {
        let h = harness();

        let result = h
            .provider
            .put_range_parallel("Bad Name", (0..3).map(job), PutOptions::new())
            .await;

        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    /// Serializes as its number, except for the one it refuses
    struct Refusing(u32);

    impl Serialize for Refusing {
        fn serialize<Z: serde::Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
            if self.0 == 1 {
                return Err(serde::ser::Error::custom("refusing to serialize 1"));
            }
            serializer.serialize_u32(self.0)
        }
    }

    #[tokio::test]
    async fn test_put_range_continues_past_failed_element() {
        let h = harness();

        let count = h
            .provider
            .put_range("jobs", [Refusing(0), Refusing(1), Refusing(2)], PutOptions::new())
            .await
            .unwrap();

        assert_eq!(count, 2);
        let received: Vec<ReceivedMessage<u32>> =
            h.provider.get("jobs", 10, GetOptions::new()).await.unwrap();
        let mut values: Vec<u32> = received.iter().map(|m| m.message).collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_put_range_parallel_counts_successes_past_failure() {
        let h = harness();

        let count = h
            .provider
            .put_range_parallel("jobs", (0..3).map(Refusing), PutOptions::new())
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(h.provider.approximate_count("jobs").await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_visibility_returns_each_message_once() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();

        let received: Vec<ReceivedMessage<Job>> = h
            .provider
            .get(
                "jobs",
                10,
                GetOptions::new().with_visibility_timeout(Duration::ZERO),
            )
            .await
            .unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].dequeue_count, 1);
        assert_eq!(h.provider.in_flight_count(), 1);
        assert!(h.observer.quarantined().is_empty());
        assert!(h.provider.delete(&received[0].ticket).await.unwrap());
        assert_eq!(h.provider.approximate_count("jobs").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_visibility_does_not_quarantine_within_one_get() {
        let settings = QueueStorageSettings {
            max_processing_trials: 2,
            ..Default::default()
        };
        let h = harness_with(settings);
        h.provider
            .put_range("jobs", (0..3).map(job), PutOptions::new())
            .await
            .unwrap();

        let received: Vec<ReceivedMessage<Job>> = h
            .provider
            .get(
                "jobs",
                50,
                GetOptions::new().with_visibility_timeout(Duration::ZERO),
            )
            .await
            .unwrap();

        let mut ids: Vec<u32> = received.iter().map(|m| m.message.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(h.observer.quarantined().is_empty());
        assert_eq!(h.provider.delete_range(received.iter().map(|m| &m.ticket)).await, 3);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Lookalike {
        overflow_container: String,
        overflow_blob: String,
    }

    #[tokio::test]
    async fn test_message_shaped_like_overflow_pointer_round_trips() {
        let h = harness();
        let message = Lookalike {
            overflow_container: "overflow-jobs".to_string(),
            overflow_blob: "01J0000000000000000000000".to_string(),
        };
        h.provider.put("jobs", &message, PutOptions::new()).await.unwrap();

        let received: Vec<ReceivedMessage<Lookalike>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, message);
    }
}

// ============================================================================
// Failing Collaborator Tests
// ============================================================================

mod failing_blobs {
    use super::*;
    use crate::error::BlobStorageError;

    /// Blob storage whose overflow reads fail
    struct UnreadableOverflow {
        inner: InMemoryBlobStorage,
    }

    #[async_trait::async_trait]
    impl BlobStorage for UnreadableOverflow {
        async fn create_container(&self, container: &str) -> Result<bool, BlobStorageError> {
            self.inner.create_container(container).await
        }

        async fn delete_container(&self, container: &str) -> Result<bool, BlobStorageError> {
            self.inner.delete_container(container).await
        }

        async fn put_blob(
            &self,
            container: &str,
            name: &str,
            data: Bytes,
            condition: BlobCondition,
        ) -> Result<Option<crate::blob_storage::ETag>, BlobStorageError> {
            self.inner.put_blob(container, name, data, condition).await
        }

        async fn get_blob(
            &self,
            container: &str,
            name: &str,
        ) -> Result<Option<crate::blob_storage::StoredBlob>, BlobStorageError> {
            if container.starts_with("overflow-") {
                return Err(BlobStorageError::ConnectionFailed {
                    message: "storage unreachable".to_string(),
                });
            }
            self.inner.get_blob(container, name).await
        }

        async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, BlobStorageError> {
            self.inner.delete_blob(container, name).await
        }

        async fn list_blob_names(
            &self,
            container: &str,
            prefix: &str,
        ) -> Result<Vec<String>, BlobStorageError> {
            self.inner.list_blob_names(container, prefix).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_get_releases_tickets_it_registered() {
        let transport = Arc::new(InMemoryQueueTransport::default());
        let provider = QueueStorageProvider::new(
            transport,
            Arc::new(UnreadableOverflow {
                inner: InMemoryBlobStorage::new(),
            }),
            JsonDataSerializer,
            QueueStorageSettings::default(),
        );
        provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();
        provider
            .put("jobs", &vec![3u8; 20_000], PutOptions::new())
            .await
            .unwrap();

        let result: Result<Vec<ReceivedMessage<Job>>, QueueError> =
            provider.get("jobs", 10, short_visibility()).await;

        assert!(matches!(result, Err(QueueError::Blob(_))));
        assert_eq!(provider.in_flight_count(), 0);
        assert_eq!(provider.abandon_all(PutOptions::new()).await, 0);
        assert_eq!(provider.approximate_count("jobs").await.unwrap(), 2);

        // The small message comes back once its visibility lapses
        tokio::time::advance(Duration::from_secs(11)).await;
        let again: Vec<ReceivedMessage<Job>> =
            provider.get("jobs", 1, short_visibility()).await.unwrap();
        assert_eq!(again[0].message, job(1));
        assert_eq!(again[0].dequeue_count, 2);
    }
}

// ============================================================================
// Overflow Tests
// ============================================================================

mod overflow {
    use super::*;

    fn large_payload() -> Vec<u8> {
        (0..20_000u32).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_large_message_is_offloaded_and_cleaned_on_delete() {
        let h = harness();
        let payload = large_payload();

        h.provider.put("big", &payload, PutOptions::new()).await.unwrap();
        assert_eq!(h.blobs.blob_count("overflow-big"), 1);

        let received: Vec<ReceivedMessage<Vec<u8>>> =
            h.provider.get("big", 1, GetOptions::new()).await.unwrap();
        assert_eq!(received[0].message, payload);

        assert!(h.provider.delete(&received[0].ticket).await.unwrap());
        assert_eq!(h.blobs.blob_count("overflow-big"), 0);
    }

    #[tokio::test]
    async fn test_abandon_keeps_overflow_blob() {
        let h = harness();
        h.provider
            .put("big", &large_payload(), PutOptions::new())
            .await
            .unwrap();

        let received: Vec<ReceivedMessage<Vec<u8>>> =
            h.provider.get("big", 1, GetOptions::new()).await.unwrap();
        assert!(h
            .provider
            .abandon(&received[0].ticket, PutOptions::new())
            .await
            .unwrap());

        assert_eq!(h.blobs.blob_count("overflow-big"), 1);
        let again: Vec<ReceivedMessage<Vec<u8>>> =
            h.provider.get("big", 1, GetOptions::new()).await.unwrap();
        assert_eq!(again[0].message, large_payload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_overflow_blob_counts_as_deserialization_failure() {
        let settings = QueueStorageSettings {
            max_processing_trials: 2,
            ..Default::default()
        };
        let h = harness_with(settings);
        h.provider
            .put("big", &large_payload(), PutOptions::new())
            .await
            .unwrap();
        h.blobs.delete_container("overflow-big").await.unwrap();

        let first: Vec<ReceivedMessage<Vec<u8>>> =
            h.provider.get("big", 1, short_visibility()).await.unwrap();
        assert!(first.is_empty());
        assert!(h.observer.quarantined().is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        let second: Vec<ReceivedMessage<Vec<u8>>> =
            h.provider.get("big", 1, short_visibility()).await.unwrap();
        assert!(second.is_empty());

        let keys = h.provider.list_persisted("failing-messages").await.unwrap();
        assert_eq!(keys.len(), 1);
        let persisted = h
            .provider
            .get_persisted("failing-messages", &keys[0])
            .await
            .unwrap()
            .unwrap();
        assert!(!persisted.is_data_available);
        assert_eq!(persisted.reason, "deserialization-failure");
    }
}

// ============================================================================
// Poison Handling Tests
// ============================================================================

mod poison {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_undeserializable_message_quarantined_on_last_trial() {
        let settings = QueueStorageSettings {
            max_processing_trials: 3,
            ..Default::default()
        };
        let h = harness_with(settings);
        h.provider.put("jobs", &"not a job", PutOptions::new()).await.unwrap();

        for _ in 0..3 {
            let received: Vec<ReceivedMessage<Job>> =
                h.provider.get("jobs", 1, short_visibility()).await.unwrap();
            assert!(received.is_empty());
            tokio::time::advance(Duration::from_secs(11)).await;
        }

        let quarantined = h.observer.quarantined();
        assert_eq!(quarantined.len(), 1);
        match &quarantined[0] {
            StorageEvent::MessageQuarantined {
                reason,
                queue_name,
                store_name,
                message_type,
                ..
            } => {
                assert_eq!(*reason, QuarantineReason::DeserializationFailure);
                assert_eq!(queue_name, "jobs");
                assert_eq!(store_name, "failing-messages");
                assert!(message_type.ends_with("Job"));
            }
            other => panic!("Expected quarantine event, got: {:?}", other),
        }
        assert_eq!(h.provider.approximate_count("jobs").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeatedly_abandoned_message_quarantined_as_processing_failure() {
        let settings = QueueStorageSettings {
            max_processing_trials: 2,
            ..Default::default()
        };
        let h = harness_with(settings);
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();

        for expected in 1..=2 {
            let received: Vec<ReceivedMessage<Job>> =
                h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
            assert_eq!(received[0].dequeue_count, expected);
            h.provider
                .abandon(&received[0].ticket, PutOptions::new())
                .await
                .unwrap();
        }

        let third: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
        assert!(third.is_empty());

        let keys = h.provider.list_persisted("failing-messages").await.unwrap();
        let persisted = h
            .provider
            .get_persisted("failing-messages", &keys[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.reason, "processing-failure");
        assert_eq!(persisted.dequeue_count, 3);
        assert!(persisted.is_data_available);
        assert!(persisted.data_if_recoverable.is_some());
    }

    #[tokio::test]
    async fn test_per_call_trial_limit_overrides_settings() {
        let h = harness();
        h.provider.put("jobs", &"garbage", PutOptions::new()).await.unwrap();

        let received: Vec<ReceivedMessage<Job>> = h
            .provider
            .get("jobs", 1, GetOptions::new().with_max_processing_trials(1))
            .await
            .unwrap();

        assert!(received.is_empty());
        assert_eq!(h.observer.quarantined().len(), 1);
    }
}

// ============================================================================
// Terminal Operation Tests
// ============================================================================

mod terminal {
    use super::*;

    #[tokio::test]
    async fn test_second_terminal_operation_returns_false() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();
        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
        let ticket = &received[0].ticket;

        assert!(h.provider.delete(ticket).await.unwrap());
        assert!(!h.provider.delete(ticket).await.unwrap());
        assert!(!h.provider.abandon(ticket, PutOptions::new()).await.unwrap());
        assert!(!h.provider.resume_later(ticket, PutOptions::new()).await.unwrap());
        assert!(!h.provider.persist(ticket, "manual", "late").await.unwrap());
        assert_eq!(h.provider.keep_alive(ticket).await.unwrap(), None);
        assert_eq!(h.provider.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_later_does_not_advance_dequeue_count() {
        let settings = QueueStorageSettings {
            max_processing_trials: 1,
            ..Default::default()
        };
        let h = harness_with(settings);
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();

        for _ in 0..5 {
            let received: Vec<ReceivedMessage<Job>> =
                h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].dequeue_count, 1);
            assert!(h
                .provider
                .resume_later(&received[0].ticket, PutOptions::new())
                .await
                .unwrap());
        }

        assert!(h.observer.quarantined().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_with_delay() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();
        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();

        h.provider
            .abandon(
                &received[0].ticket,
                PutOptions::new().with_delay(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        let hidden: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
        assert!(hidden.is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let visible: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].dequeue_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_with_expired_receipt_returns_false() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();
        let first: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, short_visibility()).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let second: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, short_visibility()).await.unwrap();

        assert!(!h.provider.delete(&first[0].ticket).await.unwrap());
        assert!(h.provider.delete(&second[0].ticket).await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_moves_message_to_store() {
        let h = harness();
        h.provider.put("jobs", &job(9), PutOptions::new()).await.unwrap();
        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();

        assert!(h
            .provider
            .persist(&received[0].ticket, "manual", "needs review")
            .await
            .unwrap());

        assert_eq!(h.provider.approximate_count("jobs").await.unwrap(), 0);
        assert_eq!(h.blobs.blob_count(PERSISTED_CONTAINER), 1);
        let keys = h.provider.list_persisted("manual").await.unwrap();
        let persisted = h
            .provider
            .get_persisted("manual", &keys[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.reason, "needs review");
        assert_eq!(persisted.queue_name, "jobs");
        assert_eq!(persisted.dequeue_count, 1);
    }

    #[tokio::test]
    async fn test_range_operations_count_successes() {
        let h = harness();
        h.provider
            .put_range("jobs", (0..6).map(job), PutOptions::new())
            .await
            .unwrap();
        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 6, GetOptions::new()).await.unwrap();
        let tickets: Vec<MessageTicket> = received.iter().map(|m| m.ticket.clone()).collect();

        assert_eq!(h.provider.delete_range(&tickets[0..2]).await, 2);
        assert_eq!(h.provider.delete_range(&tickets[0..3]).await, 1);
        assert_eq!(
            h.provider
                .persist_range(&tickets[3..4], "manual", "batch")
                .await,
            1
        );
        assert_eq!(
            h.provider
                .resume_later_range(&tickets[4..5], PutOptions::new())
                .await,
            1
        );
        assert_eq!(
            h.provider
                .abandon_range(&tickets[4..6], PutOptions::new())
                .await,
            1
        );
        assert_eq!(h.provider.approximate_count("jobs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_abandon_all_releases_every_ticket() {
        let h = harness();
        h.provider
            .put_range("jobs", (0..4).map(job), PutOptions::new())
            .await
            .unwrap();
        let _received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 4, GetOptions::new()).await.unwrap();

        assert_eq!(h.provider.abandon_all(PutOptions::new()).await, 4);
        assert_eq!(h.provider.in_flight_count(), 0);

        let again: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 4, GetOptions::new()).await.unwrap();
        assert_eq!(again.len(), 4);
    }
}

// ============================================================================
// Keep-Alive and Revival Tests
// ============================================================================

mod keep_alive {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_extends_visibility() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();
        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, short_visibility()).await.unwrap();
        let ticket = &received[0].ticket;

        let total = h.provider.keep_alive(ticket).await.unwrap();
        assert_eq!(total, Some(Duration::from_secs(70)));
        assert_eq!(h.blobs.blob_count(KEEP_ALIVE_CONTAINER), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        let hidden: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, short_visibility()).await.unwrap();
        assert!(hidden.is_empty());

        let total = h.provider.keep_alive(ticket).await.unwrap();
        assert_eq!(total, Some(Duration::from_secs(130)));

        assert!(h.provider.delete(ticket).await.unwrap());
        assert_eq!(h.blobs.blob_count(KEEP_ALIVE_CONTAINER), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_after_redelivery_returns_none() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();
        let first: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, short_visibility()).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let _second: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, short_visibility()).await.unwrap();

        assert_eq!(h.provider.keep_alive(&first[0].ticket).await.unwrap(), None);
    }

    /// Push a keep-alive record's wall-clock deadline into the past
    async fn lapse_keep_alive_records(blobs: &InMemoryBlobStorage) {
        for name in blobs.list_blob_names(KEEP_ALIVE_CONTAINER, "").await.unwrap() {
            let blob = blobs
                .get_blob(KEEP_ALIVE_CONTAINER, &name)
                .await
                .unwrap()
                .unwrap();
            let mut record: KeepAliveRecord = serde_json::from_slice(&blob.data).unwrap();
            record.renewed_until =
                Timestamp::from_datetime(chrono::Utc::now() - chrono::Duration::seconds(1));
            blobs
                .put_blob(
                    KEEP_ALIVE_CONTAINER,
                    &name,
                    Bytes::from(serde_json::to_vec(&record).unwrap()),
                    BlobCondition::Always,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_revive_puts_back_lapsed_messages() {
        let h = harness();
        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();
        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, short_visibility()).await.unwrap();
        h.provider.keep_alive(&received[0].ticket).await.unwrap();

        let nothing_yet = h.provider.revive_messages(PutOptions::new()).await.unwrap();
        assert!(nothing_yet.is_empty());

        lapse_keep_alive_records(&h.blobs).await;

        let survivor = QueueStorageProvider::new(
            h.transport.clone(),
            h.blobs.clone(),
            JsonDataSerializer,
            QueueStorageSettings::default(),
        );
        let counts = survivor.revive_messages(PutOptions::new()).await.unwrap();
        assert_eq!(counts.get("jobs"), Some(&1));
        assert_eq!(h.blobs.blob_count(KEEP_ALIVE_CONTAINER), 0);

        let revived: Vec<ReceivedMessage<Job>> =
            survivor.get("jobs", 5, GetOptions::new()).await.unwrap();
        assert_eq!(revived.len(), 1);
        assert_eq!(revived[0].message, job(1));
        assert_eq!(revived[0].dequeue_count, 1);

        assert!(!h.provider.delete(&received[0].ticket).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revive_reuses_overflow_blob() {
        let h = harness();
        let payload = vec![9u8; 20_000];
        h.provider.put("big", &payload, PutOptions::new()).await.unwrap();
        let received: Vec<ReceivedMessage<Vec<u8>>> =
            h.provider.get("big", 1, short_visibility()).await.unwrap();
        h.provider.keep_alive(&received[0].ticket).await.unwrap();
        lapse_keep_alive_records(&h.blobs).await;

        let counts = h.provider.revive_messages(PutOptions::new()).await.unwrap();

        assert_eq!(counts.get("big"), Some(&1));
        assert_eq!(h.blobs.blob_count("overflow-big"), 1);
        let revived: Vec<ReceivedMessage<Vec<u8>>> =
            h.provider.get("big", 1, GetOptions::new()).await.unwrap();
        assert_eq!(revived[0].message, payload);
    }
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod management {
    use super::*;

    #[tokio::test]
    async fn test_clear_purges_messages_and_overflow() {
        let h = harness();
        h.provider
            .put("big", &vec![7u8; 20_000], PutOptions::new())
            .await
            .unwrap();
        h.provider.put("big", &job(1), PutOptions::new()).await.unwrap();

        h.provider.clear("big").await.unwrap();

        assert_eq!(h.provider.approximate_count("big").await.unwrap(), 0);
        assert_eq!(h.blobs.blob_count("overflow-big"), 0);
        assert_eq!(h.provider.list_queues("big").await.unwrap(), vec!["big"]);
    }

    #[tokio::test]
    async fn test_delete_queue_reports_existence() {
        let h = harness();
        h.provider
            .put("big", &vec![7u8; 20_000], PutOptions::new())
            .await
            .unwrap();

        assert!(h.provider.delete_queue("big").await.unwrap());
        assert!(!h.provider.delete_queue("big").await.unwrap());
        assert_eq!(h.blobs.blob_count("overflow-big"), 0);
        assert_eq!(h.provider.approximate_count("big").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_approximate_latency() {
        let h = harness();
        assert_eq!(h.provider.approximate_latency("jobs").await.unwrap(), None);

        h.provider.put("jobs", &job(1), PutOptions::new()).await.unwrap();

        assert!(h.provider.approximate_latency("jobs").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_persisted_round_trip() {
        let h = harness();
        h.provider.put("jobs", &job(3), PutOptions::new()).await.unwrap();
        let received: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
        h.provider
            .persist(&received[0].ticket, "manual", "hold")
            .await
            .unwrap();
        let key = h.provider.list_persisted("manual").await.unwrap().remove(0);

        assert!(h
            .provider
            .restore_persisted("manual", &key, PutOptions::new())
            .await
            .unwrap());
        assert!(!h
            .provider
            .restore_persisted("manual", &key, PutOptions::new())
            .await
            .unwrap());

        let restored: Vec<ReceivedMessage<Job>> =
            h.provider.get("jobs", 1, GetOptions::new()).await.unwrap();
        assert_eq!(restored[0].message, job(3));
        assert!(h.provider.list_persisted("manual").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_persisted_is_idempotent() {
        let h = harness();

        h.provider.delete_persisted("manual", "unknown").await.unwrap();
        h.provider.delete_persisted("manual", "unknown").await.unwrap();

        assert_eq!(h.observer.succeeded(StorageOperation::DeletePersisted), 2);
    }
}
