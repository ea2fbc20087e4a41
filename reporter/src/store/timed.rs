use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::{Collection, Store, StoreError, StoreResult};
use crate::pipeline::{Filter, FindQuery, Pipeline, Update, UpsertOptions};

/// Applies a deadline to every call of the wrapped store.
///
/// The inner call is dropped once the deadline passes, and the caller sees
/// [StoreError::Timeout].
#[derive(Debug)]
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: Store> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

async fn deadline_for<T>(
    deadline: Duration,
    call: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("Store call abandoned after {deadline:?}");
            Err(StoreError::Timeout(deadline))
        }
    }
}

impl<S: Store> Store for TimedStore<S> {
    fn execute<'a>(
        &'a self,
        collection: Collection,
        pipeline: &'a Pipeline,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        deadline_for(self.timeout, self.inner.execute(collection, pipeline)).boxed()
    }

    fn find<'a>(
        &'a self,
        collection: Collection,
        query: &'a FindQuery,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        deadline_for(self.timeout, self.inner.find(collection, query)).boxed()
    }

    fn upsert<'a>(
        &'a self,
        collection: Collection,
        filter: &'a Filter,
        update: &'a Update,
        options: UpsertOptions,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        deadline_for(
            self.timeout,
            self.inner.upsert(collection, filter, update, options),
        )
        .boxed()
    }

    fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, StoreResult<String>> {
        deadline_for(self.timeout, self.inner.insert(collection, document)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    /// Never answers.
    struct Stalled;

    impl Store for Stalled {
        fn execute<'a>(
            &'a self,
            _: Collection,
            _: &'a Pipeline,
        ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
            futures::future::pending().boxed()
        }

        fn find<'a>(&'a self, _: Collection, _: &'a FindQuery) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
            futures::future::pending().boxed()
        }

        fn upsert<'a>(
            &'a self,
            _: Collection,
            _: &'a Filter,
            _: &'a Update,
            _: UpsertOptions,
        ) -> BoxFuture<'a, StoreResult<Option<Value>>> {
            futures::future::pending().boxed()
        }

        fn insert(&self, _: Collection, _: Value) -> BoxFuture<'_, StoreResult<String>> {
            futures::future::pending().boxed()
        }
    }

    #[tokio::test]
    async fn stalled_calls_time_out() {
        let store = TimedStore::new(Stalled, Duration::from_millis(20));
        let err = store
            .execute(Collection::Events, &Pipeline::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn answers_pass_through() -> anyhow::Result<()> {
        let store = TimedStore::new(MemoryStore::new(), Duration::from_secs(10));
        store.insert(Collection::Events, json!({"host": "h1"})).await?;
        assert_eq!(1, store.inner().len(Collection::Events));
        Ok(())
    }
}
