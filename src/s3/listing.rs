//! Forward-only crawlers over `ListObjects` (v1, marker based) and
//! `ListObjectsV2` (continuation-token based).
//!
//! A crawler fetches one page per call and checks the pagination contract as
//! it goes: keys ascend within and across pages, truncated pages carry a
//! usable cursor and the final page carries none. Any violation stops the
//! crawl.

use futures::stream::{self, Stream};
use std::fmt;
use thiserror::Error;
use tracing::instrument;
use typed_builder::TypedBuilder;

use super::api::{ListQuery, ListingPage, S3Api, S3ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingProtocol {
    V1,
    V2,
}

impl fmt::Display for ListingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListingProtocol::V1 => "ListObjects",
            ListingProtocol::V2 => "ListObjectsV2",
        })
    }
}

/// Parameters of one crawl.
///
/// `start` is sent as `marker` by v1 crawls and as `start-after` by v2 crawls.
/// Prefix and delimiter are passed through verbatim, including empty or
/// unusual delimiters.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CrawlRequest {
    #[builder(setter(into))]
    pub bucket: String,
    #[builder(default, setter(strip_option, into))]
    pub prefix: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub delimiter: Option<String>,
    #[builder(default, setter(strip_option))]
    pub max_keys: Option<i32>,
    #[builder(default, setter(strip_option, into))]
    pub start: Option<String>,
}

/// What a test expects one page to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedPage {
    pub keys: Vec<String>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
}

impl ExpectedPage {
    pub fn new(keys: &[&str], prefixes: &[&str], is_truncated: bool) -> Self {
        Self {
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            prefixes: prefixes.iter().map(|p| (*p).to_owned()).collect(),
            is_truncated,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageMismatch {
    #[error("expected keys {expected:?}, found {actual:?}")]
    Keys {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("expected common prefixes {expected:?}, found {actual:?}")]
    Prefixes {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("expected is_truncated = {expected}, found {actual}")]
    Truncation { expected: bool, actual: bool },
}

impl ListingPage {
    /// Ordered comparison of keys and common prefixes, then the truncation flag.
    pub fn check(&self, expected: &ExpectedPage) -> Result<(), PageMismatch> {
        if self.keys != expected.keys {
            return Err(PageMismatch::Keys {
                expected: expected.keys.clone(),
                actual: self.keys.clone(),
            });
        }
        if self.common_prefixes != expected.prefixes {
            return Err(PageMismatch::Prefixes {
                expected: expected.prefixes.clone(),
                actual: self.common_prefixes.clone(),
            });
        }
        if self.is_truncated != expected.is_truncated {
            return Err(PageMismatch::Truncation {
                expected: expected.is_truncated,
                actual: self.is_truncated,
            });
        }
        Ok(())
    }

    /// The lexicographically last key or common prefix on the page.
    pub fn last_entry(&self) -> Option<&str> {
        let key = self.keys.last().map(String::as_str);
        let prefix = self.common_prefixes.last().map(String::as_str);
        key.max(prefix)
    }
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("{protocol} request for page {page} failed")]
    Request {
        protocol: ListingProtocol,
        page: usize,
        #[source]
        source: S3ApiError,
    },
    #[error("{protocol} page {page}: {reason}")]
    PaginationInconsistency {
        protocol: ListingProtocol,
        page: usize,
        reason: &'static str,
    },
    #[error("page {page}: key {key:?} does not sort after {previous:?}")]
    OutOfOrder {
        page: usize,
        previous: String,
        key: String,
    },
    #[error("page {page} did not match the expected page")]
    Unexpected {
        page: usize,
        #[source]
        source: PageMismatch,
    },
    #[error("expected {expected} pages, the crawl returned {actual}")]
    PageCountMismatch { expected: usize, actual: usize },
}

/// Every key and common prefix of a finished crawl, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub keys: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub pages: usize,
}

/// Lazily walks the pages of one bucket listing.
///
/// ```no_run
/// use s3_conformance::s3::{CrawlRequest, ListingCrawler};
///
/// # async fn crawl(client: &aws_sdk_s3::Client) -> anyhow::Result<()> {
/// let request = CrawlRequest::builder().bucket("my-bucket").max_keys(1).build();
/// let mut crawler = ListingCrawler::v2(client, request);
/// while let Some(page) = crawler.next_page().await? {
///     println!("{:?} -> {:?}", page.keys, crawler.continuation_token());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ListingCrawler<'a, A: S3Api + ?Sized> {
    client: &'a A,
    protocol: ListingProtocol,
    request: CrawlRequest,
    token: Option<String>,
    last_key: Option<String>,
    pages: usize,
    finished: bool,
}

impl<A: S3Api + ?Sized> fmt::Debug for ListingCrawler<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingCrawler")
            .field("protocol", &self.protocol)
            .field("request", &self.request)
            .field("token", &self.token)
            .field("pages", &self.pages)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<'a, A: S3Api + ?Sized> ListingCrawler<'a, A> {
    pub fn new(client: &'a A, protocol: ListingProtocol, request: CrawlRequest) -> Self {
        Self {
            client,
            protocol,
            request,
            token: None,
            last_key: None,
            pages: 0,
            finished: false,
        }
    }

    /// Crawls with `ListObjects`, threading `NextMarker` between pages.
    pub fn v1(client: &'a A, request: CrawlRequest) -> Self {
        Self::new(client, ListingProtocol::V1, request)
    }

    /// Crawls with `ListObjectsV2`, threading `NextContinuationToken` between pages.
    pub fn v2(client: &'a A, request: CrawlRequest) -> Self {
        Self::new(client, ListingProtocol::V2, request)
    }

    pub fn protocol(&self) -> ListingProtocol {
        self.protocol
    }

    /// The cursor the next request will send, if any.
    pub fn continuation_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn query(&self) -> ListQuery {
        let base = ListQuery {
            bucket: self.request.bucket.clone(),
            prefix: self.request.prefix.clone(),
            delimiter: self.request.delimiter.clone(),
            max_keys: self.request.max_keys,
            ..Default::default()
        };
        match self.protocol {
            ListingProtocol::V1 => ListQuery {
                marker: self.token.clone().or_else(|| self.request.start.clone()),
                ..base
            },
            ListingProtocol::V2 => ListQuery {
                continuation_token: self.token.clone(),
                start_after: self.request.start.clone(),
                ..base
            },
        }
    }

    fn inconsistency(&self, page: usize, reason: &'static str) -> ListingError {
        ListingError::PaginationInconsistency {
            protocol: self.protocol,
            page,
            reason,
        }
    }

    fn check_order(&self, page: usize, listing: &ListingPage) -> Result<(), ListingError> {
        let previous = self.last_key.iter().map(String::as_str);
        let keys = listing.keys.iter().map(String::as_str);
        let mut ordered = previous.chain(keys).peekable();
        while let Some(key) = ordered.next() {
            if let Some(next) = ordered.peek() {
                if key >= *next {
                    return Err(ListingError::OutOfOrder {
                        page,
                        previous: key.to_owned(),
                        key: (*next).to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The cursor for the page after `listing`, or `None` when it is the last.
    fn next_token(&self, page: usize, listing: &ListingPage) -> Result<Option<String>, ListingError> {
        if !listing.is_truncated {
            return match listing.continuation_token {
                Some(_) => Err(self.inconsistency(page, "final page carries a continuation token")),
                None => Ok(None),
            };
        }
        let token = match self.protocol {
            ListingProtocol::V1 => listing
                .continuation_token
                .clone()
                .or_else(|| listing.last_entry().map(str::to_owned))
                .ok_or_else(|| self.inconsistency(page, "truncated page has no marker and no entries"))?,
            ListingProtocol::V2 => listing
                .continuation_token
                .clone()
                .ok_or_else(|| self.inconsistency(page, "truncated page has no continuation token"))?,
        };
        if self.token.as_deref() == Some(token.as_str()) {
            return Err(self.inconsistency(page, "continuation token did not advance"));
        }
        Ok(Some(token))
    }

    /// Fetches the next page, or `None` once the final page has been returned.
    ///
    /// After an error the crawler is finished.
    #[instrument(skip(self), fields(protocol = %self.protocol, page = self.pages))]
    pub async fn next_page(&mut self) -> Result<Option<ListingPage>, ListingError> {
        if self.finished {
            return Ok(None);
        }
        let page = self.pages;
        self.pages += 1;
        // Fail closed: only a fully validated page leaves the crawler open.
        self.finished = true;

        let listing = match self.protocol {
            ListingProtocol::V1 => self.client.list_objects(&self.query()).await,
            ListingProtocol::V2 => self.client.list_objects_v2(&self.query()).await,
        }
        .map_err(|source| ListingError::Request {
            protocol: self.protocol,
            page,
            source,
        })?;
        tracing::debug!(
            keys = listing.keys.len(),
            prefixes = listing.common_prefixes.len(),
            is_truncated = listing.is_truncated,
            "Fetched page"
        );

        self.check_order(page, &listing)?;
        let token = self.next_token(page, &listing)?;

        if let Some(key) = listing.keys.last() {
            self.last_key = Some(key.clone());
        }
        self.finished = token.is_none();
        self.token = token;
        Ok(Some(listing))
    }

    /// Adapts the crawler into a stream of pages that ends after the final
    /// page or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<ListingPage, ListingError>> + 'a {
        stream::unfold(self, |mut crawler| async move {
            match crawler.next_page().await {
                Ok(Some(page)) => Some((Ok(page), crawler)),
                Ok(None) => None,
                Err(e) => Some((Err(e), crawler)),
            }
        })
    }

    /// Crawls to the end, concatenating keys and prefixes in page order.
    pub async fn collect_all(mut self) -> Result<CrawlSummary, ListingError> {
        let mut summary = CrawlSummary::default();
        while let Some(page) = self.next_page().await? {
            summary.keys.extend(page.keys);
            summary.common_prefixes.extend(page.common_prefixes);
            summary.pages += 1;
        }
        Ok(summary)
    }

    /// Crawls to the end, checking page `i` against `expected[i]`.
    pub async fn crawl_expecting(
        mut self,
        expected: &[ExpectedPage],
    ) -> Result<Vec<ListingPage>, ListingError> {
        let mut pages = vec![];
        while let Some(page) = self.next_page().await? {
            let index = pages.len();
            if let Some(expected) = expected.get(index) {
                page.check(expected)
                    .map_err(|source| ListingError::Unexpected {
                        page: index,
                        source,
                    })?;
            }
            pages.push(page);
        }
        if pages.len() != expected.len() {
            return Err(ListingError::PageCountMismatch {
                expected: expected.len(),
                actual: pages.len(),
            });
        }
        Ok(pages)
    }
}
