//! Catalog Query Engine
//!
//! Walks the backend catalog page by page for a set of volume IDs (or the
//! whole catalog when the set is empty). Pages are fetched sequentially: the
//! cursor is server-assigned and each request depends on the previous reply.
//!
//! Unlike discovery, this path is not failure tolerant. Any page error or a
//! cancellation fails the whole query and the pages already fetched are
//! dropped.

use crate::domain::ports::{Cursor, QueryFilter, QueryResult, VolumeManager};
use crate::error::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Build the first-page filter for a query sequence
pub fn initial_filter(volume_ids: &[String], cluster_id: Option<&str>, limit: u64) -> QueryFilter {
    QueryFilter {
        volume_ids: volume_ids.to_vec(),
        container_cluster_ids: cluster_id
            .filter(|id| !id.is_empty())
            .map(|id| vec![id.to_string()])
            .unwrap_or_default(),
        cursor: Cursor::first_page(limit),
    }
}

/// Fetch every page for `volume_ids` and return them in order.
///
/// The loop stops when the returned offset reaches the returned record
/// total, or when the backend returns no page (or an empty one).
pub async fn query_all_pages(
    volume_ids: &[String],
    cluster_id: Option<&str>,
    manager: &dyn VolumeManager,
    limit: u64,
    cancel: &CancellationToken,
) -> Result<Vec<QueryResult>> {
    let mut filter = initial_filter(volume_ids, cluster_id, limit);
    let mut pages = Vec::new();

    loop {
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(format!(
                    "catalog query at offset {}",
                    filter.cursor.offset
                )));
            }
            reply = manager.query_volume(&filter) => reply,
        };

        let page = match reply {
            Ok(Some(page)) if !page.volumes.is_empty() => page,
            Ok(_) => {
                debug!(offset = filter.cursor.offset, "FullSync: backend returned no more volumes");
                break;
            }
            Err(e) => {
                error!(
                    backend = manager.backend_name(),
                    offset = filter.cursor.offset,
                    error = %e,
                    "FullSync: QueryVolume failed"
                );
                return Err(e);
            }
        };

        let next = page.cursor;
        debug!(
            offset = next.offset,
            total_records = next.total_records,
            records = page.volumes.len(),
            "FullSync: fetched catalog page"
        );
        pages.push(page);

        if next.is_exhausted() {
            break;
        }
        if next.offset <= filter.cursor.offset {
            return Err(Error::CursorStalled {
                offset: next.offset,
                total_records: next.total_records,
            });
        }

        filter.cursor = Cursor {
            offset: next.offset,
            limit: if next.limit == 0 { limit } else { next.limit },
            total_records: next.total_records,
        };
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{CatalogVolume, VolumeSpec};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Serves `total` records `limit` at a time, optionally failing one call
    struct PagedCatalog {
        total: u64,
        fail_on_call: Option<usize>,
        /// Token cancelled once the given call has been answered
        cancel_after_call: Option<(usize, CancellationToken)>,
        stall: bool,
        calls: Mutex<Vec<QueryFilter>>,
    }

    impl PagedCatalog {
        fn new(total: u64) -> Self {
            Self {
                total,
                fail_on_call: None,
                cancel_after_call: None,
                stall: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl VolumeManager for PagedCatalog {
        async fn query_volume(&self, filter: &QueryFilter) -> Result<Option<QueryResult>> {
            let call = {
                let mut calls = self.calls.lock();
                calls.push(filter.clone());
                calls.len()
            };
            if self.fail_on_call == Some(call) {
                return Err(Error::QueryFailed {
                    backend: "fake".into(),
                    reason: "connection reset".into(),
                });
            }

            if let Some((after, token)) = &self.cancel_after_call {
                if *after == call {
                    token.cancel();
                }
            }

            let start = filter.cursor.offset;
            let end = (start + filter.cursor.limit).min(self.total);
            let volumes = (start..end)
                .map(|i| CatalogVolume {
                    volume_id: format!("vol-{}", i),
                    ..Default::default()
                })
                .collect();
            Ok(Some(QueryResult {
                volumes,
                cursor: Cursor {
                    offset: if self.stall { start } else { end },
                    limit: filter.cursor.limit,
                    total_records: self.total,
                },
            }))
        }

        async fn register_disk(&self, spec: &VolumeSpec) -> Result<String> {
            Ok(spec.volume_path.clone())
        }

        fn backend_name(&self) -> &str {
            "fake"
        }
    }

    fn ids(pages: &[QueryResult]) -> Vec<String> {
        pages
            .iter()
            .flat_map(|p| p.volumes.iter().map(|v| v.volume_id.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_pages_merged_until_offset_reaches_total() {
        let catalog = PagedCatalog::new(5);
        let token = CancellationToken::new();

        let pages = query_all_pages(&[], None, &catalog, 2, &token).await.unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(ids(&pages).len(), 5);
        assert_eq!(catalog.call_count(), 3);
        let offsets: Vec<u64> = catalog.calls.lock().iter().map(|f| f.cursor.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_page_error_aborts_query() {
        let mut catalog = PagedCatalog::new(5);
        catalog.fail_on_call = Some(2);
        let token = CancellationToken::new();

        let result = query_all_pages(&[], None, &catalog, 2, &token).await;

        assert_matches!(result, Err(Error::QueryFailed { .. }));
        assert_eq!(catalog.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_stops_without_error() {
        struct Empty;

        #[async_trait]
        impl VolumeManager for Empty {
            async fn query_volume(&self, _filter: &QueryFilter) -> Result<Option<QueryResult>> {
                Ok(None)
            }
            async fn register_disk(&self, _spec: &VolumeSpec) -> Result<String> {
                unreachable!()
            }
            fn backend_name(&self) -> &str {
                "empty"
            }
        }

        let token = CancellationToken::new();
        let pages = query_all_pages(&["vol-1".into()], None, &Empty, 10, &token)
            .await
            .unwrap();
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn test_filter_scoping() {
        let catalog = PagedCatalog::new(1);
        let token = CancellationToken::new();
        let wanted = vec!["vol-0".to_string()];

        query_all_pages(&wanted, Some("cluster-a"), &catalog, 10, &token)
            .await
            .unwrap();

        let calls = catalog.calls.lock();
        assert_eq!(calls[0].volume_ids, wanted);
        assert_eq!(calls[0].container_cluster_ids, vec!["cluster-a".to_string()]);
        assert!(!calls[0].is_whole_catalog());

        let whole = initial_filter(&[], Some(""), 10);
        assert!(whole.is_whole_catalog());
        assert!(whole.container_cluster_ids.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_cursor_is_an_error() {
        let mut catalog = PagedCatalog::new(5);
        catalog.stall = true;
        let token = CancellationToken::new();

        let result = query_all_pages(&[], None, &catalog, 2, &token).await;

        assert_matches!(result, Err(Error::CursorStalled { offset: 0, total_records: 5 }));
    }

    #[tokio::test]
    async fn test_cancellation_before_first_page() {
        let catalog = PagedCatalog::new(5);
        let token = CancellationToken::new();
        token.cancel();

        let result = query_all_pages(&[], None, &catalog, 2, &token).await;

        assert_matches!(result, Err(Error::Cancelled(_)));
        assert_eq!(catalog.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_discards_partial_pages() {
        let token = CancellationToken::new();
        let mut catalog = PagedCatalog::new(5);
        catalog.cancel_after_call = Some((1, token.clone()));

        let result = query_all_pages(&[], None, &catalog, 2, &token).await;

        // Page one was served, the query still fails as a whole
        assert_eq!(catalog.call_count(), 1);
        assert_matches!(result, Err(Error::Cancelled(reason)) if reason.contains("offset 2"));
    }
}
