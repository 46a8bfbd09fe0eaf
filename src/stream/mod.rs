//! Streaming cores: range plumbing, direct range proxy, the single-session
//! torrent stream and the HLS transcode pipeline.

pub mod direct;
pub mod range;
pub mod torrent_stream;
pub mod transcode;

pub use direct::DirectStreamer;
pub use range::{ByteRange, parse_range};
pub use torrent_stream::{StartStreamOptions, TorrentStreamer};
pub use transcode::Transcoder;
