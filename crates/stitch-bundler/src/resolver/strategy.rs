use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::uri::{LogicalUri, UriScheme};

/// What a strategy knows about a URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStat {
    File,
    Directory,
    Missing,
}

/// Raw module content plus the URI it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub uri: LogicalUri,
    pub bytes: Bytes,
}

impl FileContent {
    pub fn text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }
}

/// A backing store the compound resolver can probe.
///
/// Each strategy owns exactly one URI scheme. Probing goes through `stat`
/// so the resolver can check candidates without downloading them.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn scheme(&self) -> UriScheme;

    /// Outermost directory a manifest search starting at `uri` may reach.
    fn boundary(&self, uri: &LogicalUri) -> LogicalUri;

    async fn stat(&self, uri: &LogicalUri, token: &CancellationToken) -> Result<FileStat>;

    async fn read(&self, uri: &LogicalUri, token: &CancellationToken) -> Result<FileContent>;

    /// Root directory of package `name`, or `None` when this strategy has no
    /// such package.
    async fn package_root(
        &self,
        name: &str,
        range: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Option<LogicalUri>>;
}
