use time::OffsetDateTime;

/// One commit as read from a repository's history.
///
/// `committed_at` is the committer timestamp normalized to UTC; the
/// incremental ingestion cursor is derived from it, not from the author
/// timestamp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitRecord {
    pub hash: String,
    pub author_email: String,
    pub committed_at: OffsetDateTime,
}
