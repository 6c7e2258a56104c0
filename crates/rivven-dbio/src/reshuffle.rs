//! Fusion barrier
//!
//! Engines that fuse adjacent single-input stages onto one worker would run
//! everything downstream of a database scan serially behind it. The barrier
//! breaks that chain: every record gets a uniformly random key, records are
//! grouped by key through the engine's grouping primitive and the groups are
//! flattened again. Record content is untouched; ordering is not preserved.
//!
//! Records cross the grouping step in encoded form, using the codec the read
//! connector was configured with.

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::{decode_from_bytes, encode_to_bytes, Codec};
use crate::error::{Error, Result};

/// Receiver of records produced by a connector
pub trait Emitter<T>: Send {
    /// Hand one record downstream
    fn emit(&mut self, value: T) -> Result<()>;
}

impl<T: Send> Emitter<T> for Vec<T> {
    fn emit(&mut self, value: T) -> Result<()> {
        self.push(value);
        Ok(())
    }
}

impl<T: Send> Emitter<T> for mpsc::UnboundedSender<T> {
    fn emit(&mut self, value: T) -> Result<()> {
        self.send(value)
            .map_err(|_| Error::emit("downstream receiver is closed"))
    }
}

/// Grouping primitive of the host engine
#[async_trait]
pub trait GroupByKey: Send + Sync {
    /// Group encoded records by key; neither group order nor order within a
    /// group is meaningful
    async fn group_by_key(&self, records: Vec<(u32, Bytes)>) -> Result<Vec<(u32, Vec<Bytes>)>>;
}

/// In-process grouping, for single-process runs and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGroupByKey;

#[async_trait]
impl GroupByKey for LocalGroupByKey {
    async fn group_by_key(&self, records: Vec<(u32, Bytes)>) -> Result<Vec<(u32, Vec<Bytes>)>> {
        let mut groups: HashMap<u32, Vec<Bytes>> = HashMap::new();
        for (key, value) in records {
            groups.entry(key).or_default().push(value);
        }
        Ok(groups.into_iter().collect())
    }
}

/// Random-key, group, flatten barrier for records of type `T`
pub struct FusionBarrier<T> {
    codec: Arc<dyn Codec<T>>,
    rng: StdRng,
    keyed: Vec<(u32, Bytes)>,
}

impl<T> FusionBarrier<T> {
    /// Create a barrier with a freshly seeded random source
    pub fn new(codec: Arc<dyn Codec<T>>) -> Self {
        Self {
            codec,
            rng: StdRng::from_entropy(),
            keyed: Vec::new(),
        }
    }

    /// Create a barrier with a fixed seed
    pub fn with_seed(codec: Arc<dyn Codec<T>>, seed: u64) -> Self {
        Self {
            codec,
            rng: StdRng::seed_from_u64(seed),
            keyed: Vec::new(),
        }
    }

    /// Number of records waiting for the grouping step
    pub fn len(&self) -> usize {
        self.keyed.len()
    }

    /// Whether no record is waiting
    pub fn is_empty(&self) -> bool {
        self.keyed.is_empty()
    }

    /// Drop records collected since the last flush
    pub fn clear(&mut self) {
        self.keyed.clear();
    }

    /// Group the collected records and emit them, flattened, into `out`.
    /// Returns the number of records emitted.
    pub async fn flush(
        &mut self,
        grouping: &dyn GroupByKey,
        out: &mut dyn Emitter<T>,
    ) -> Result<u64> {
        let records = std::mem::take(&mut self.keyed);
        let total = records.len();
        let groups = grouping.group_by_key(records).await?;
        debug!(records = total, groups = groups.len(), "Flattening fusion barrier");

        let mut emitted = 0u64;
        for (_, values) in groups {
            for bytes in values {
                out.emit(decode_from_bytes(&*self.codec, bytes)?)?;
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}

impl<T> Emitter<T> for FusionBarrier<T> {
    fn emit(&mut self, value: T) -> Result<()> {
        let key: u32 = self.rng.gen();
        let bytes = encode_to_bytes(&*self.codec, &value)?;
        self.keyed.push((key, bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::I64Codec;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_barrier_preserves_records() {
        let mut barrier = FusionBarrier::<i64>::with_seed(Arc::new(I64Codec), 7);
        for i in 0..100 {
            barrier.emit(i).unwrap();
        }
        assert_eq!(barrier.len(), 100);

        let mut out: Vec<i64> = Vec::new();
        let emitted = barrier.flush(&LocalGroupByKey, &mut out).await.unwrap();

        assert_eq!(emitted, 100);
        assert!(barrier.is_empty());
        let got: HashSet<i64> = out.into_iter().collect();
        assert_eq!(got, (0..100).collect::<HashSet<i64>>());
    }

    #[tokio::test]
    async fn test_records_spread_over_keys() {
        let mut barrier = FusionBarrier::<i64>::new(Arc::new(I64Codec));
        for i in 0..64 {
            barrier.emit(i).unwrap();
        }
        let keys: HashSet<u32> = barrier.keyed.iter().map(|(k, _)| *k).collect();
        assert!(keys.len() > 1);
    }

    #[tokio::test]
    async fn test_local_group_by_key() {
        let groups = LocalGroupByKey
            .group_by_key(vec![
                (1, Bytes::from_static(b"a")),
                (2, Bytes::from_static(b"b")),
                (1, Bytes::from_static(b"c")),
            ])
            .await
            .unwrap();

        assert_eq!(groups.len(), 2);
        let ones = groups.iter().find(|(k, _)| *k == 1).unwrap();
        assert_eq!(ones.1.len(), 2);
    }

    #[test]
    fn test_channel_emitter() {
        let (mut tx, mut rx) = mpsc::unbounded_channel::<i64>();
        tx.emit(5).unwrap();
        assert_eq!(rx.try_recv().unwrap(), 5);

        drop(rx);
        let err = tx.emit(6).unwrap_err();
        assert!(matches!(err, Error::Emit { .. }));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_clear_drops_collected_records() {
        let mut barrier = FusionBarrier::<i64>::with_seed(Arc::new(I64Codec), 1);
        barrier.emit(1).unwrap();
        barrier.emit(2).unwrap();

        barrier.clear();
        assert!(barrier.is_empty());
    }
}
