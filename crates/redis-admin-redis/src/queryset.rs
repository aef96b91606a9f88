//! Queryset over one keyspace
//!
//! A `Queryset` is what an admin list or detail view talks to. It holds one
//! key condition (as a glob), one window, and at most one cached page. Any
//! change to the condition or the window drops the page; reading records
//! again then costs a new scan.

use crate::fetcher::{self, PageWindow};
use crate::keyspace::Keyspace;
use redis_admin_core::{
    AdminError, DecoderSettings, KeyRecord, Lookup, MATCH_ALL, Result, pattern_for,
};
use std::sync::Arc;

/// Lazily fetched, single-page view of the keys matching one pattern
pub struct Queryset {
    conn: Arc<dyn Keyspace>,
    settings: Arc<DecoderSettings>,
    slice_limit: usize,
    pattern: String,
    filtered: bool,
    window: PageWindow,
    page: Option<Vec<KeyRecord>>,
    filtered_count: Option<usize>,
    got: Option<(String, KeyRecord)>,
}

impl Queryset {
    /// A queryset over every key. `slice_limit` bounds both the default
    /// window and filtered counts.
    pub fn new(conn: Arc<dyn Keyspace>, settings: Arc<DecoderSettings>, slice_limit: usize) -> Self {
        Self {
            conn,
            settings,
            slice_limit,
            pattern: MATCH_ALL.to_string(),
            filtered: false,
            window: PageWindow::new(0, slice_limit),
            page: None,
            filtered_count: None,
            got: None,
        }
    }

    /// Restrict the queryset to keys satisfying `lookups`.
    ///
    /// At most one condition is accepted. An empty set removes the filter.
    pub fn filter(&mut self, lookups: impl IntoIterator<Item = Lookup>) -> Result<&mut Self> {
        let lookups: Vec<Lookup> = lookups.into_iter().collect();
        match pattern_for(&lookups)? {
            Some(pattern) => {
                self.pattern = pattern;
                self.filtered = true;
            }
            None => {
                self.pattern = MATCH_ALL.to_string();
                self.filtered = false;
            }
        }
        self.page = None;
        self.filtered_count = None;
        Ok(self)
    }

    /// Select the matches at positions `start..stop` every `step`
    pub fn slice(&mut self, start: usize, stop: usize, step: usize) -> Result<&mut Self> {
        self.window = PageWindow::with_step(start, stop, step)?;
        self.page = None;
        Ok(self)
    }

    /// Number of keys.
    ///
    /// Without a filter this is the server's own key count for the database,
    /// which is approximate and costs no scan. With a filter the keys are
    /// scanned, but never more than the slice limit, so large result sets are
    /// undercounted.
    pub async fn count(&mut self) -> Result<usize> {
        if !self.filtered {
            let count = fetcher::approximate_count(self.conn.as_ref()).await?;
            return Ok(usize::try_from(count).unwrap_or(usize::MAX));
        }

        if let Some(count) = self.filtered_count {
            return Ok(count);
        }

        let count = fetcher::count_matches(
            self.conn.as_ref(),
            &self.pattern,
            self.slice_limit,
            self.slice_limit,
        )
        .await?;
        self.filtered_count = Some(count);
        Ok(count)
    }

    /// Records in the current window, fetched on first access
    pub async fn records(&mut self) -> Result<&[KeyRecord]> {
        let page = match self.page.take() {
            Some(page) => page,
            None => {
                let scan_count = self.window.stop.min(self.slice_limit);
                self.fetch(&self.pattern, self.window, scan_count).await?
            }
        };
        Ok(self.page.insert(page).as_slice())
    }

    /// The single key matching `lookups`, or the current filter when
    /// `lookups` is empty.
    ///
    /// Zero matches is `NotFound`, more than one is
    /// `MultipleObjectsReturned`. The result is cached apart from the page.
    pub async fn get(&mut self, lookups: impl IntoIterator<Item = Lookup>) -> Result<KeyRecord> {
        let lookups: Vec<Lookup> = lookups.into_iter().collect();
        let pattern = pattern_for(&lookups)?.unwrap_or_else(|| self.pattern.clone());

        if let Some((cached, record)) = &self.got {
            if *cached == pattern {
                return Ok(record.clone());
            }
        }

        // two rows tell one match from many; the scan still walks the
        // keyspace in slice-limit steps
        let mut records = self
            .fetch(&pattern, PageWindow::new(0, 2), self.slice_limit)
            .await?;
        match records.len() {
            0 => Err(AdminError::NotFound(format!("no key matches {:?}", pattern))),
            1 => {
                let record = records.remove(0);
                self.got = Some((pattern, record.clone()));
                Ok(record)
            }
            count => Err(AdminError::MultipleObjectsReturned { pattern, count }),
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.page.is_some()
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// The SCAN glob in effect
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn window(&self) -> PageWindow {
        self.window
    }

    pub fn slice_limit(&self) -> usize {
        self.slice_limit
    }

    async fn fetch(
        &self,
        pattern: &str,
        window: PageWindow,
        scan_count: usize,
    ) -> Result<Vec<KeyRecord>> {
        let conn = self.conn.as_ref();

        let mut records = fetcher::fetch_page(conn, pattern, window, scan_count.max(1)).await?;
        fetcher::fill_values(conn, &mut records).await?;
        fetcher::decode_records(&mut records, &self.settings);
        Ok(records)
    }
}

impl std::fmt::Debug for Queryset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queryset")
            .field("pattern", &self.pattern)
            .field("filtered", &self.filtered)
            .field("window", &self.window)
            .field("slice_limit", &self.slice_limit)
            .field("fetched", &self.is_fetched())
            .finish()
    }
}
