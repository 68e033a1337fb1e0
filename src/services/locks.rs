use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry of per-user mutation locks.
///
/// Cart mutations and the checkout snapshot+authorize sequence for the same
/// user must not interleave; everything else runs concurrently. Suitable for
/// a single-node deployment; multi-node deployments get the same guarantee
/// from conditional row updates at the database.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for a user, waiting if another operation on the
    /// same user is in flight.
    pub async fn acquire(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(user_id).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_operations_serialize() {
        let locks = Arc::new(UserLocks::new());
        let user = Uuid::new_v4();
        let in_flight = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(user).await;
                let concurrent = in_flight.fetch_add(1, Ordering::SeqCst);
                assert_eq!(concurrent, 0, "lock admitted two holders");
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let locks = UserLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        // Completes immediately despite the held guard for another user.
        let _b = locks.acquire(Uuid::new_v4()).await;
    }
}
