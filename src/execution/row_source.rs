use crate::prelude::*;

use crate::base::row::Row;
use crate::execution::progress::{ProgressSink, progress_percent};
use std::fmt;

/// Cells of one row as produced by a [`RowFeed`]. `None` is a null cell.
pub type Cells = Vec<Option<String>>;

pub type BoxedRowSource = Box<dyn RowSource>;

/// Upper bound on the number of data rows a source delivers. The header row
/// is never counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLimit(u64);

impl RowLimit {
    pub const UNBOUNDED: RowLimit = RowLimit(u64::MAX);

    pub fn new(max_rows: u64) -> Self {
        Self(max_rows)
    }

    /// Any negative value means "no bound".
    pub fn from_i64(limit: i64) -> Self {
        u64::try_from(limit).map_or(Self::UNBOUNDED, RowLimit)
    }

    pub fn is_unbounded(&self) -> bool {
        self.0 == u64::MAX
    }

    pub fn get(&self) -> Option<u64> {
        (!self.is_unbounded()).then_some(self.0)
    }

    fn allows(&self, delivered: u64) -> bool {
        delivered < self.0
    }
}

impl Default for RowLimit {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

impl From<Option<u64>> for RowLimit {
    fn from(limit: Option<u64>) -> Self {
        limit.map_or(Self::UNBOUNDED, RowLimit)
    }
}

impl fmt::Display for RowLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(n) => write!(f, "{n}"),
            None => f.write_str("unbounded"),
        }
    }
}

/// The underlying source a [`LazyRows`] pulls from: an in-memory generator,
/// a database cursor, anything that yields rows one at a time.
#[async_trait]
pub trait RowFeed: Send {
    async fn column_names(&mut self) -> Result<Vec<String>>;

    /// Total number of data rows, when the feed can tell before streaming.
    /// Called at most once, before the first fetch. Failures are reported as `None`.
    async fn probe_total(&mut self) -> Option<u64> {
        None
    }

    /// Next row, or `None` once the feed is exhausted.
    async fn fetch_next(&mut self) -> Result<Option<Cells>>;

    /// Releases whatever the feed holds. Called at most once.
    async fn release(&mut self) -> Result<()>;
}

/// A lazy, single-pass, closeable sequence of rows produced for one request.
///
/// Not meant for concurrent use: one caller iterates, then calls
/// [`RowSource::close`] on every path.
#[async_trait]
pub trait RowSource: Send {
    /// Column names. Computed on first call and fixed afterwards.
    async fn headers(&mut self) -> Result<Vec<String>>;

    /// Whether another row is available. Repeated calls don't advance.
    async fn has_next(&mut self) -> Result<bool>;

    /// Next row. Fails with [`Error::IterationState`] when no row is available.
    async fn next_row(&mut self) -> Result<Row>;

    async fn try_next(&mut self) -> Result<Option<Row>> {
        if self.has_next().await? {
            self.next_row().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Releases the underlying resource. Idempotent; release failures are
    /// logged, never returned.
    async fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Parameters of one row request.
#[derive(Clone)]
pub struct RowRequest {
    /// When `false`, the first row produced is the header row.
    pub skip_headers: bool,
    pub limit: RowLimit,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl RowRequest {
    pub fn preview(limit: RowLimit) -> Self {
        Self {
            skip_headers: true,
            limit,
            progress: None,
        }
    }

    pub fn import(progress: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            skip_headers: true,
            limit: RowLimit::UNBOUNDED,
            progress,
        }
    }

    /// Header row plus at most one data row.
    pub fn column_definition() -> Self {
        Self {
            skip_headers: false,
            limit: RowLimit::new(1),
            progress: None,
        }
    }
}

impl fmt::Debug for RowRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowRequest")
            .field("skip_headers", &self.skip_headers)
            .field("limit", &self.limit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Streaming,
    Exhausted,
    Closed,
}

/// Generic [`RowSource`] over a [`RowFeed`], holding at most one row of lookahead.
pub struct LazyRows<F> {
    feed: F,
    skip_headers: bool,
    limit: RowLimit,
    progress: Option<Arc<dyn ProgressSink>>,
    headers: Option<Vec<String>>,
    phase: Phase,
    lookahead: Option<Cells>,
    /// Index of the next row handed out, header row included.
    position: usize,
    /// Data rows handed out so far.
    delivered: u64,
    total_rows: u64,
}

impl<F: RowFeed> LazyRows<F> {
    pub fn new(feed: F, request: RowRequest) -> Self {
        Self {
            feed,
            skip_headers: request.skip_headers,
            limit: request.limit,
            progress: request.progress,
            headers: None,
            phase: Phase::Created,
            lookahead: None,
            position: 0,
            delivered: 0,
            total_rows: 0,
        }
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Total reported by the feed's size probe; 0 when unknown or not probed.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn header_pending(&self) -> bool {
        !self.skip_headers && self.position == 0
    }

    async fn start(&mut self) {
        // The total only feeds progress reporting.
        if self.progress.is_some() {
            self.total_rows = self.feed.probe_total().await.unwrap_or(0);
        }
        self.phase = Phase::Streaming;
    }
}

#[async_trait]
impl<F: RowFeed> RowSource for LazyRows<F> {
    async fn headers(&mut self) -> Result<Vec<String>> {
        if let Some(headers) = &self.headers {
            return Ok(headers.clone());
        }
        if self.phase == Phase::Closed {
            return Err(Error::iteration_state(
                "Row source was closed before its headers were read",
            ));
        }
        let names = self.feed.column_names().await?;
        self.headers = Some(names.clone());
        Ok(names)
    }

    async fn has_next(&mut self) -> Result<bool> {
        match self.phase {
            Phase::Closed => return Ok(false),
            Phase::Created => self.start().await,
            Phase::Streaming | Phase::Exhausted => {}
        }
        if self.header_pending() || self.lookahead.is_some() {
            return Ok(true);
        }
        if self.phase == Phase::Exhausted || !self.limit.allows(self.delivered) {
            return Ok(false);
        }
        match self.feed.fetch_next().await? {
            Some(cells) => {
                self.lookahead = Some(cells);
                Ok(true)
            }
            None => {
                self.phase = Phase::Exhausted;
                if let Some(progress) = &self.progress {
                    progress.set(100);
                }
                Ok(false)
            }
        }
    }

    async fn next_row(&mut self) -> Result<Row> {
        if self.phase == Phase::Closed {
            return Err(Error::iteration_state("Row source is closed"));
        }
        if !self.has_next().await? {
            return Err(Error::iteration_state("No more rows"));
        }
        let index = self.position;
        if self.header_pending() {
            let headers = self.headers().await?;
            self.position += 1;
            return Ok(Row::header(index, &headers));
        }
        let cells = self
            .lookahead
            .take()
            .ok_or_else(|| Error::iteration_state("No more rows"))?;
        if let Some(progress) = &self.progress {
            progress.set(progress_percent(self.delivered, self.total_rows));
        }
        self.position += 1;
        self.delivered += 1;
        Ok(Row::new(index, cells))
    }

    async fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        self.lookahead = None;
        if let Err(err) = self.feed.release().await {
            warn!("Failed to release row source: {err}");
        }
    }

    fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }
}

/// Feeds every remaining row of `source` to `on_row`, then closes the source
/// whether iteration succeeded or not. Returns the number of rows seen.
pub async fn for_each_row<F>(mut source: BoxedRowSource, mut on_row: F) -> Result<u64>
where
    F: FnMut(Row) -> Result<()> + Send,
{
    let result = async {
        let mut count = 0;
        while let Some(row) = source.try_next().await? {
            on_row(row)?;
            count += 1;
        }
        Ok::<_, Error>(count)
    }
    .await;
    source.close().await;
    result
}

/// Collects every remaining row of `source` and closes it.
pub async fn read_all(source: BoxedRowSource) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for_each_row(source, |row| {
        rows.push(row);
        Ok(())
    })
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::progress::RecordingProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        column_names: AtomicUsize,
        fetches: AtomicUsize,
        releases: AtomicUsize,
    }

    struct VecFeed {
        rows: std::vec::IntoIter<Cells>,
        total: Option<u64>,
        fail_release: bool,
        calls: Arc<Calls>,
    }

    impl VecFeed {
        fn new(count: usize) -> (Self, Arc<Calls>) {
            let rows: Vec<Cells> = (1..=count)
                .map(|i| vec![Some(format!("r{i}")), None])
                .collect();
            let calls = Arc::new(Calls::default());
            let feed = VecFeed {
                rows: rows.into_iter(),
                total: Some(count as u64),
                fail_release: false,
                calls: calls.clone(),
            };
            (feed, calls)
        }
    }

    #[async_trait]
    impl RowFeed for VecFeed {
        async fn column_names(&mut self) -> Result<Vec<String>> {
            self.calls.column_names.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["name".to_string(), "note".to_string()])
        }

        async fn probe_total(&mut self) -> Option<u64> {
            self.total
        }

        async fn fetch_next(&mut self) -> Result<Option<Cells>> {
            self.calls.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.next())
        }

        async fn release(&mut self) -> Result<()> {
            self.calls.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                return Err(Error::Resource {
                    resource: "test feed",
                    source: sqlx::Error::PoolClosed,
                });
            }
            Ok(())
        }
    }

    async fn drain(rows: &mut LazyRows<VecFeed>) -> Vec<Row> {
        let mut out = Vec::new();
        while rows.has_next().await.unwrap() {
            out.push(rows.next_row().await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_headers_are_memoized() {
        let (feed, calls) = VecFeed::new(3);
        let mut rows = LazyRows::new(feed, RowRequest::preview(RowLimit::UNBOUNDED));
        let first = rows.headers().await.unwrap();
        drain(&mut rows).await;
        assert_eq!(rows.headers().await.unwrap(), first);
        rows.close().await;
        assert_eq!(rows.headers().await.unwrap(), first);
        assert_eq!(calls.column_names.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_limit_bounds_data_rows() {
        for (limit, total, expected) in [
            (RowLimit::new(0), 3, 0),
            (RowLimit::new(2), 3, 2),
            (RowLimit::new(3), 3, 3),
            (RowLimit::new(10), 3, 3),
            (RowLimit::UNBOUNDED, 4, 4),
            (RowLimit::UNBOUNDED, 0, 0),
        ] {
            let (feed, _) = VecFeed::new(total);
            let mut rows = LazyRows::new(feed, RowRequest::preview(limit));
            assert_eq!(drain(&mut rows).await.len(), expected, "limit {limit}, total {total}");
        }
    }

    #[tokio::test]
    async fn test_limit_stops_fetching() {
        let (feed, calls) = VecFeed::new(10);
        let mut rows = LazyRows::new(feed, RowRequest::preview(RowLimit::new(2)));
        drain(&mut rows).await;
        assert_eq!(calls.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_has_next_is_idempotent() {
        let (feed, calls) = VecFeed::new(2);
        let mut rows = LazyRows::new(feed, RowRequest::preview(RowLimit::UNBOUNDED));
        assert!(rows.has_next().await.unwrap());
        assert!(rows.has_next().await.unwrap());
        assert!(rows.has_next().await.unwrap());
        assert_eq!(calls.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(rows.next_row().await.unwrap().value(0), Some("r1"));
        assert_eq!(rows.next_row().await.unwrap().value(0), Some("r2"));
    }

    #[tokio::test]
    async fn test_next_after_end_fails() {
        let (feed, _) = VecFeed::new(1);
        let mut rows = LazyRows::new(feed, RowRequest::preview(RowLimit::UNBOUNDED));
        drain(&mut rows).await;
        assert!(!rows.has_next().await.unwrap());
        for _ in 0..2 {
            let err = rows.next_row().await.unwrap_err();
            assert!(matches!(err, Error::IterationState(_)), "{err:?}");
        }
        assert!(rows.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (feed, calls) = VecFeed::new(2);
        let mut rows = LazyRows::new(feed, RowRequest::preview(RowLimit::UNBOUNDED));
        assert!(rows.has_next().await.unwrap());
        rows.close().await;
        rows.close().await;
        assert!(rows.is_closed());
        assert_eq!(calls.releases.load(Ordering::SeqCst), 1);
        assert!(!rows.has_next().await.unwrap());
        assert!(matches!(
            rows.next_row().await.unwrap_err(),
            Error::IterationState(_)
        ));
    }

    #[tokio::test]
    async fn test_close_before_iteration_and_release_failure() {
        let (mut feed, calls) = VecFeed::new(2);
        feed.fail_release = true;
        let mut rows = LazyRows::new(feed, RowRequest::import(None));
        rows.close().await;
        rows.close().await;
        assert_eq!(calls.releases.load(Ordering::SeqCst), 1);
        assert_eq!(calls.fetches.load(Ordering::SeqCst), 0);
        assert!(rows.headers().await.is_err());
    }

    #[tokio::test]
    async fn test_index_sequencing_with_header_row() {
        let (feed, _) = VecFeed::new(3);
        let request = RowRequest {
            skip_headers: false,
            limit: RowLimit::UNBOUNDED,
            progress: None,
        };
        let mut rows = LazyRows::new(feed, request);
        let out = drain(&mut rows).await;
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Row::header(0, &["name".to_string(), "note".to_string()]));
        for (k, row) in out.iter().enumerate().skip(1) {
            assert_eq!(row.index(), k);
            assert_eq!(row.value(0), Some(format!("r{k}").as_str()));
        }
    }

    #[tokio::test]
    async fn test_index_sequencing_without_header_row() {
        let (feed, _) = VecFeed::new(3);
        let mut rows = LazyRows::new(feed, RowRequest::preview(RowLimit::UNBOUNDED));
        let out = drain(&mut rows).await;
        for (k, row) in out.iter().enumerate() {
            assert_eq!(row.index(), k);
            assert_eq!(row.value(0), Some(format!("r{}", k + 1).as_str()));
            assert_eq!(row.value(1), None);
        }
    }

    #[tokio::test]
    async fn test_column_definition_yields_header_and_one_row() {
        let (feed, _) = VecFeed::new(5);
        let mut rows = LazyRows::new(feed, RowRequest::column_definition());
        let out = drain(&mut rows).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value(0), Some("name"));
        assert_eq!(out[1].value(0), Some("r1"));
    }

    #[tokio::test]
    async fn test_progress_against_probed_total() {
        let (feed, _) = VecFeed::new(4);
        let progress = Arc::new(RecordingProgress::new());
        let mut rows = LazyRows::new(feed, RowRequest::import(Some(progress.clone())));
        drain(&mut rows).await;
        assert_eq!(rows.total_rows(), 4);
        assert_eq!(progress.reported(), vec![0, 25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_failed_size_probe_still_streams_everything() {
        let (mut feed, _) = VecFeed::new(3);
        feed.total = None;
        let progress = Arc::new(RecordingProgress::new());
        let mut rows = LazyRows::new(feed, RowRequest::import(Some(progress.clone())));
        assert_eq!(drain(&mut rows).await.len(), 3);
        assert_eq!(rows.total_rows(), 0);
        assert_eq!(progress.reported(), vec![0, 0, 0, 100]);
    }

    #[tokio::test]
    async fn test_limited_read_stops_short_of_completion() {
        let (feed, _) = VecFeed::new(4);
        let progress = Arc::new(RecordingProgress::new());
        let mut rows = LazyRows::new(
            feed,
            RowRequest {
                skip_headers: true,
                limit: RowLimit::new(2),
                progress: Some(progress.clone()),
            },
        );
        assert_eq!(drain(&mut rows).await.len(), 2);
        assert_eq!(progress.reported(), vec![0, 25]);
    }

    #[tokio::test]
    async fn test_for_each_row_closes_on_error() {
        let (feed, calls) = VecFeed::new(3);
        let source: BoxedRowSource =
            Box::new(LazyRows::new(feed, RowRequest::preview(RowLimit::UNBOUNDED)));
        let err = for_each_row(source, |row| {
            if row.index() == 1 {
                return Err(Error::configuration("stop"));
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "stop");
        assert_eq!(calls.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_all() {
        let (feed, calls) = VecFeed::new(2);
        let source: BoxedRowSource =
            Box::new(LazyRows::new(feed, RowRequest::preview(RowLimit::UNBOUNDED)));
        let rows = read_all(source).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(calls.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_row_limit() {
        assert!(RowLimit::from_i64(-1).is_unbounded());
        assert_eq!(RowLimit::from_i64(5).get(), Some(5));
        assert_eq!(RowLimit::from(None), RowLimit::UNBOUNDED);
        assert_eq!(RowLimit::default().to_string(), "unbounded");
    }
}
