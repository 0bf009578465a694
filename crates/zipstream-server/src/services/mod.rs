pub mod archive;
pub mod download_service;
pub mod fetcher;

pub use archive::{ArchiveError, ArchiveSink, ArchiveWriter};
pub use download_service::{DownloadReport, DownloadService, OmittedMember};
pub use fetcher::{FetchError, MemberFetcher, RemoteFetcher};
