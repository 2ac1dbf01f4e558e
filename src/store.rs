//! Database store for the committed event log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::delegation::{DelegatorEvent, LedgerReplay};
use crate::error::{AppError, Result};

/// Largest page `list_events` returns
pub const MAX_PAGE: i64 = 1000;

/// An event as recorded in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: i64,
    pub id: Uuid,
    pub event: DelegatorEvent,
    pub recorded_at: DateTime<Utc>,
}

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))
    }

    pub async fn append_event(&self, event: &DelegatorEvent) -> Result<RecordedEvent> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Internal(format!("Failed to encode event: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (id, kind, delegator, payload, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(event.kind())
        .bind(event.delegator().to_string())
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(RecordedEvent {
            seq: result.last_insert_rowid(),
            id,
            event: event.clone(),
            recorded_at: now,
        })
    }

    /// Events with `seq > after`, oldest first
    pub async fn list_events(&self, after: i64, limit: i64) -> Result<Vec<RecordedEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT seq, id, payload, recorded_at
            FROM events
            WHERE seq > ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(after)
        .bind(limit.clamp(0, MAX_PAGE))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn count_events(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Fold the whole log into a [`LedgerReplay`]
    pub async fn replay(&self) -> Result<LedgerReplay> {
        let mut replay = LedgerReplay::new();
        let mut after = 0;
        loop {
            let page = self.list_events(after, MAX_PAGE).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = last.seq;
            for recorded in &page {
                replay.apply(&recorded.event);
            }
        }
        Ok(replay)
    }
}

/// Append every event received on `events` to the log until the engine is dropped
pub fn spawn_recorder(store: Store, mut events: mpsc::UnboundedReceiver<DelegatorEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = store.append_event(&event).await {
                tracing::error!(kind = event.kind(), "Failed to record event: {}", e);
            }
        }
    })
}

#[derive(sqlx::FromRow)]
struct EventRow {
    seq: i64,
    id: String,
    payload: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for RecordedEvent {
    type Error = AppError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(RecordedEvent {
            seq: row.seq,
            id: Uuid::parse_str(&row.id)
                .map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))?,
            event: serde_json::from_str(&row.payload)
                .map_err(|e| AppError::Internal(format!("Invalid event payload: {}", e)))?,
            recorded_at: row.recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Store {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        let store = Store::new(pool);
        store.migrate().await.expect("Failed to run migrations");
        store
    }

    fn addr(label: &str) -> Address {
        Address::derive(&[label.as_bytes()])
    }

    fn staked(who: &str, amount: u128) -> DelegatorEvent {
        DelegatorEvent::Staked {
            delegator: addr(who),
            amount,
            caller: addr(who),
        }
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let store = setup_test_db().await;
        let first = store.append_event(&staked("alice", 10)).await.unwrap();
        let second = store.append_event(&staked("bob", 20)).await.unwrap();
        assert!(second.seq > first.seq);

        let events = store.list_events(0, 100).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, first.id);
        assert_eq!(events[0].event, staked("alice", 10));
        assert_eq!(events[1].event, staked("bob", 20));

        let after_first = store.list_events(first.seq, 100).await.unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].seq, second.seq);
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let store = setup_test_db().await;
        for amount in 1..=5 {
            store.append_event(&staked("alice", amount)).await.unwrap();
        }
        assert_eq!(store.list_events(0, 2).await.unwrap().len(), 2);
        assert!(store.list_events(0, 0).await.unwrap().is_empty());
        assert_eq!(store.count_events().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_large_amount_round_trips() {
        let store = setup_test_db().await;
        let amount = 10u128.pow(30);
        store.append_event(&staked("alice", amount)).await.unwrap();
        let events = store.list_events(0, 10).await.unwrap();
        assert_eq!(events[0].event, staked("alice", amount));
    }

    #[tokio::test]
    async fn test_replay_folds_log() {
        let store = setup_test_db().await;
        store.append_event(&staked("alice", 100)).await.unwrap();
        store
            .append_event(&DelegatorEvent::Unstaked {
                delegator: addr("alice"),
                recipient: addr("alice"),
                amount: 30,
            })
            .await
            .unwrap();

        let replay = store.replay().await.unwrap();
        assert_eq!(replay.stake_balance(&addr("alice")), 70);
        assert_eq!(replay.events_applied(), 2);
    }

    #[tokio::test]
    async fn test_recorder_appends_journal_events() {
        let store = setup_test_db().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_recorder(store.clone(), rx);

        tx.send(staked("alice", 1)).unwrap();
        tx.send(staked("bob", 2)).unwrap();
        drop(tx);
        handle.await.unwrap();

        let events = store.list_events(0, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, staked("bob", 2));
    }
}
