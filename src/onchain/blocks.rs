//! Date boundary to block number resolution.
//!
//! Block timestamps are non-decreasing in block number, so both boundaries are
//! found by binary search over `[earliest, latest]`, one block fetch per step.

use serde::Serialize;
use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::error::LookupError;
use crate::rpc::{BlockTag, RpcClient, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRef {
    pub number: u64,
    /// Unix seconds.
    pub timestamp: u64,
}

/// Inclusive block range. `to < from` means there is nothing to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub const fn is_empty(&self) -> bool {
        self.to < self.from
    }

    /// Empty range positioned just past `block`.
    const fn empty_after(block: u64) -> Self {
        match block.checked_add(1) {
            Some(from) => Self { from, to: block },
            None => Self {
                from: block,
                to: block - 1,
            },
        }
    }
}

/// First and last block of the chain, fetched once per resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChainBounds {
    earliest: BlockRef,
    latest: BlockRef,
}

pub struct BlockResolver<'a, T> {
    client: &'a RpcClient<T>,
    cancel: &'a CancelSignal,
}

impl<'a, T: Transport> BlockResolver<'a, T> {
    pub const fn new(client: &'a RpcClient<T>, cancel: &'a CancelSignal) -> Self {
        Self { client, cancel }
    }

    /// Smallest block whose timestamp is `>= target_ts`, clamped to the chain.
    pub async fn first_block_at_or_after(&self, target_ts: u64) -> Result<u64, LookupError> {
        let bounds = self.bounds().await?;
        self.search_first_at_or_after(bounds, target_ts).await
    }

    /// Largest block whose timestamp is `<= target_ts`, clamped to the chain.
    pub async fn last_block_at_or_before(&self, target_ts: u64) -> Result<u64, LookupError> {
        let bounds = self.bounds().await?;
        self.search_last_at_or_before(bounds, target_ts).await
    }

    /// Resolves optional start/end timestamps into a block range. Missing
    /// boundaries default to the earliest and latest block. A start after the
    /// latest block or an end before the earliest one yields an empty range.
    pub async fn resolve_range(
        &self,
        start_ts: Option<u64>,
        end_ts: Option<u64>,
    ) -> Result<BlockRange, LookupError> {
        let bounds = self.bounds().await?;

        let starts_after_chain = start_ts.is_some_and(|ts| ts > bounds.latest.timestamp);
        let ends_before_chain = end_ts.is_some_and(|ts| ts < bounds.earliest.timestamp);
        if starts_after_chain || ends_before_chain {
            let range = BlockRange::empty_after(bounds.latest.number);
            info!(
                "Requested window (start_ts={start_ts:?}, end_ts={end_ts:?}) lies outside blocks \
                 {}-{}, nothing to fetch",
                bounds.earliest.number, bounds.latest.number
            );
            return Ok(range);
        }

        let from = match start_ts {
            Some(ts) => self.search_first_at_or_after(bounds, ts).await?,
            None => bounds.earliest.number,
        };
        let to = match end_ts {
            Some(ts) => self.search_last_at_or_before(bounds, ts).await?,
            None => bounds.latest.number,
        };

        let range = BlockRange { from, to };
        info!(
            "Resolved block range {from}-{to} (start_ts={start_ts:?}, end_ts={end_ts:?}, empty={})",
            range.is_empty()
        );

        Ok(range)
    }

    async fn bounds(&self) -> Result<ChainBounds, LookupError> {
        let earliest = self.block(BlockTag::Earliest).await?;
        let latest = self.block(BlockTag::Latest).await?;

        debug!(
            "Chain bounds: earliest #{} @{}, latest #{} @{}",
            earliest.number, earliest.timestamp, latest.number, latest.timestamp
        );

        Ok(ChainBounds { earliest, latest })
    }

    async fn block(&self, tag: BlockTag) -> Result<BlockRef, LookupError> {
        self.cancel
            .race(self.client.get_block(tag))
            .await?
            .ok_or_else(|| LookupError::BlockNotFound(tag.to_string()))
    }

    async fn timestamp_of(&self, number: u64) -> Result<u64, LookupError> {
        Ok(self.block(BlockTag::Number(number)).await?.timestamp)
    }

    async fn search_first_at_or_after(
        &self,
        bounds: ChainBounds,
        target_ts: u64,
    ) -> Result<u64, LookupError> {
        if target_ts <= bounds.earliest.timestamp {
            return Ok(bounds.earliest.number);
        }
        if target_ts > bounds.latest.timestamp {
            return Ok(bounds.latest.number);
        }

        let (mut lo, mut hi) = (bounds.earliest.number, bounds.latest.number);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let ts = self.timestamp_of(mid).await?;
            debug!("first_block_at_or_after({target_ts}): lo={lo} hi={hi} mid={mid} ts={ts}");

            if ts >= target_ts {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        Ok(lo)
    }

    async fn search_last_at_or_before(
        &self,
        bounds: ChainBounds,
        target_ts: u64,
    ) -> Result<u64, LookupError> {
        if target_ts >= bounds.latest.timestamp {
            return Ok(bounds.latest.number);
        }
        if target_ts < bounds.earliest.timestamp {
            return Ok(bounds.earliest.number);
        }

        let (mut lo, mut hi) = (bounds.earliest.number, bounds.latest.number);
        while lo < hi {
            // Upper mid so `lo = mid` always makes progress.
            let mid = lo + (hi - lo).div_ceil(2);
            let ts = self.timestamp_of(mid).await?;
            debug!("last_block_at_or_before({target_ts}): lo={lo} hi={hi} mid={mid} ts={ts}");

            if ts <= target_ts {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        Ok(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use std::time::{Duration, Instant};

    use crate::cancel::cancel_pair;
    use crate::rpc::{HttpReply, RetryPolicy};
    use crate::test_utils::{FakeChain, ScriptedTransport, fast_client};

    /// Timestamps with gaps and ties: blocks 3-5 share a second.
    fn irregular_timestamps() -> Vec<u64> {
        vec![100, 112, 124, 130, 130, 130, 150, 151, 190, 200, 200, 260]
    }

    fn expected_first_at_or_after(timestamps: &[u64], target: u64) -> u64 {
        let index = timestamps
            .iter()
            .position(|ts| *ts >= target)
            .unwrap_or(timestamps.len() - 1);
        index as u64
    }

    fn expected_last_at_or_before(timestamps: &[u64], target: u64) -> u64 {
        let index = timestamps
            .iter()
            .rposition(|ts| *ts <= target)
            .unwrap_or(0);
        index as u64
    }

    #[tokio::test]
    async fn test_first_block_at_or_after_every_timestamp() {
        let timestamps = irregular_timestamps();
        let client = fast_client(FakeChain::with_timestamps(timestamps.clone()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        for target in 90..=270 {
            let block = resolver.first_block_at_or_after(target).await.unwrap();
            assert_eq!(
                block,
                expected_first_at_or_after(&timestamps, target),
                "target {target}"
            );
        }
    }

    #[tokio::test]
    async fn test_last_block_at_or_before_every_timestamp() {
        let timestamps = irregular_timestamps();
        let client = fast_client(FakeChain::with_timestamps(timestamps.clone()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        for target in 90..=270 {
            let block = resolver.last_block_at_or_before(target).await.unwrap();
            assert_eq!(
                block,
                expected_last_at_or_before(&timestamps, target),
                "target {target}"
            );
        }
    }

    #[tokio::test]
    async fn test_ties_resolve_to_first_and_last_of_run() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        assert_eq!(resolver.first_block_at_or_after(130).await.unwrap(), 3);
        assert_eq!(resolver.last_block_at_or_before(130).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_out_of_range_targets_clamp() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        assert_eq!(resolver.first_block_at_or_after(0).await.unwrap(), 0);
        assert_eq!(resolver.first_block_at_or_after(10_000).await.unwrap(), 11);
        assert_eq!(resolver.last_block_at_or_before(0).await.unwrap(), 0);
        assert_eq!(resolver.last_block_at_or_before(10_000).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_search_cost_is_logarithmic() {
        let timestamps = (0..1_000_000u64).map(|n| 1_600_000_000 + n * 2).collect();
        let client = fast_client(FakeChain::with_timestamps(timestamps));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        let block = resolver
            .first_block_at_or_after(1_600_000_000 + 777_777)
            .await
            .unwrap();

        assert_eq!(block, 388_889);
        // earliest + latest + at most ceil(log2(1_000_000)) search steps
        assert!(client.transport().block_fetches() <= 2 + 20);
    }

    #[tokio::test]
    async fn test_resolve_range_defaults_to_whole_chain() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        let range = resolver.resolve_range(None, None).await.unwrap();

        assert_eq!(range, BlockRange { from: 0, to: 11 });
        assert_eq!(client.transport().block_fetches(), 2);
    }

    #[tokio::test]
    async fn test_resolve_range_inverted_is_empty_not_error() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        let range = resolver.resolve_range(Some(195), Some(140)).await.unwrap();

        assert_eq!(range, BlockRange { from: 9, to: 5 });
        assert!(range.is_empty());
    }

    #[tokio::test]
    async fn test_start_after_latest_block_is_empty() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        let range = resolver.resolve_range(Some(261), None).await.unwrap();
        assert!(range.is_empty());
        assert_eq!(range, BlockRange { from: 12, to: 11 });

        let range = resolver.resolve_range(Some(300), Some(400)).await.unwrap();
        assert!(range.is_empty());

        // Bounds only, no search.
        assert_eq!(client.transport().block_fetches(), 4);
    }

    #[tokio::test]
    async fn test_end_before_earliest_block_is_empty() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        let range = resolver.resolve_range(None, Some(99)).await.unwrap();
        assert!(range.is_empty());

        let range = resolver.resolve_range(Some(10), Some(50)).await.unwrap();
        assert!(range.is_empty());

        assert_eq!(client.transport().block_fetches(), 4);
    }

    #[tokio::test]
    async fn test_window_touching_chain_edges_is_not_empty() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        let range = resolver.resolve_range(Some(260), None).await.unwrap();
        assert_eq!(range, BlockRange { from: 11, to: 11 });

        let range = resolver.resolve_range(None, Some(100)).await.unwrap();
        assert_eq!(range, BlockRange { from: 0, to: 0 });
    }

    #[test]
    fn test_empty_after_last_possible_block() {
        let range = BlockRange::empty_after(u64::MAX);
        assert!(range.is_empty());
        assert_eq!(range.from, u64::MAX);
    }

    #[tokio::test]
    async fn test_missing_block_is_reported() {
        let chain = FakeChain::with_timestamps(irregular_timestamps()).hiding_block(5);
        let client = fast_client(chain);
        let cancel = CancelSignal::never();
        let resolver = BlockResolver::new(&client, &cancel);

        let error = resolver.first_block_at_or_after(131).await.unwrap_err();

        assert!(matches!(error, LookupError::BlockNotFound(tag) if tag == "5"));
    }

    #[tokio::test]
    async fn test_canceled_resolver_makes_no_calls() {
        let client = fast_client(FakeChain::with_timestamps(irregular_timestamps()));
        let (handle, cancel) = cancel_pair();
        handle.cancel();
        let resolver = BlockResolver::new(&client, &cancel);

        let error = resolver.resolve_range(Some(120), None).await.unwrap_err();

        assert!(matches!(error, LookupError::Canceled));
        assert_eq!(client.transport().block_fetches(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_block_lookup_retries() {
        let failures = (0..5)
            .map(|_| {
                Ok(HttpReply {
                    status: 503,
                    body: "busy".to_string(),
                })
            })
            .collect();
        let policy =
            RetryPolicy::new(5, Duration::from_millis(200)).with_max_jitter(Duration::ZERO);
        let client = RpcClient::new(ScriptedTransport::new(failures), policy);
        let (handle, cancel) = cancel_pair();
        let resolver = BlockResolver::new(&client, &cancel);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let error = resolver.resolve_range(None, None).await.unwrap_err();

        assert!(matches!(error, LookupError::Canceled), "got {error:?}");
        assert!(started.elapsed() < policy.minimum_total_delay());
        assert_eq!(client.transport().calls(), 1);
    }

    fn monotonic_timestamps() -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(0u64..5, 1..200).prop_map(|steps| {
            steps
                .into_iter()
                .scan(1_000u64, |ts, step| {
                    *ts += step;
                    Some(*ts)
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_binary_search_matches_linear_scan(
            timestamps in monotonic_timestamps(),
            offset in 0u64..1_000,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let target = 990 + offset;
            let client = fast_client(FakeChain::with_timestamps(timestamps.clone()));
            let cancel = CancelSignal::never();
            let resolver = BlockResolver::new(&client, &cancel);

            let (first, last) = runtime.block_on(async {
                (
                    resolver.first_block_at_or_after(target).await.unwrap(),
                    resolver.last_block_at_or_before(target).await.unwrap(),
                )
            });

            prop_assert_eq!(first, expected_first_at_or_after(&timestamps, target));
            prop_assert_eq!(last, expected_last_at_or_before(&timestamps, target));
        }
    }
}
