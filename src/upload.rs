//! Resumable proof upload: announce a file by size and MD5, then send the
//! byte ranges the server still needs in bounded, individually hashed chunks.

pub mod client;
pub mod proof;
pub mod protocol;

pub use client::ProofUploader;
pub use proof::{file_digest, parse_header, proof_files};
pub use protocol::{AnnounceReply, ChunkReply, NeedInterval, UploadError, CHUNK_SIZE};
