//! Wire-level pieces of the resumable upload: reply decoding, the `need`
//! interval and its forward-progress checks.

use serde_json::Value;
use std::fmt;

/// Largest chunk sent in one POST.
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;
const ALREADY_UPLOADED: i64 = 409;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The server answered with an `error_status`.
    Server { status: i64, body: String },
    MissingField { field: &'static str, body: String },
    /// `need` entry not in `pos <= end < size`.
    InvalidNeed { pos: u64, end: u64, size: u64 },
    /// A chunk was accepted but the next `need` did not move forward.
    NoProgress { previous: u64, next: u64 },
    Http { status: u16 },
    Malformed { message: String },
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server { status, body } => {
                write!(f, "upload rejected with status {status}: {body}")
            }
            Self::MissingField { field, body } => {
                write!(f, "upload reply is missing {field}: {body}")
            }
            Self::InvalidNeed { pos, end, size } => write!(
                f,
                "need interval [{pos}, {end}] is outside a file of {size} bytes"
            ),
            Self::NoProgress { previous, next } => write!(
                f,
                "sending data did not advance the need list ({previous} -> {next})"
            ),
            Self::Http { status } => write!(f, "upload request returned HTTP {status}"),
            Self::Malformed { message } => write!(f, "malformed upload reply: {message}"),
        }
    }
}

impl std::error::Error for UploadError {}

/// Bytes `pos..=end` the server still wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedInterval {
    pub pos: u64,
    pub end: u64,
}

impl NeedInterval {
    /// Lowest-offset entry of a `need` object such as `{"0": 999}`. Keys
    /// are compared as numbers, not in the map's string order.
    pub fn from_reply(reply: &Value) -> Result<Self, UploadError> {
        let mut lowest: Option<Self> = None;
        for (pos, end) in reply.get("need").and_then(Value::as_object).into_iter().flatten() {
            let interval = Self::entry(pos, end)?;
            if lowest.map_or(true, |current| interval.pos < current.pos) {
                lowest = Some(interval);
            }
        }
        lowest.ok_or_else(|| UploadError::MissingField {
            field: "need",
            body: reply.to_string(),
        })
    }

    fn entry(pos: &str, end: &Value) -> Result<Self, UploadError> {
        let pos = pos.parse().map_err(|_| UploadError::Malformed {
            message: format!("need offset {pos:?} is not a number"),
        })?;
        let end = match end {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| UploadError::Malformed {
            message: format!("need end {end} is not a number"),
        })?;
        Ok(Self { pos, end })
    }

    pub fn check(self, size: u64) -> Result<Self, UploadError> {
        if self.pos > self.end || self.end >= size {
            return Err(UploadError::InvalidNeed {
                pos: self.pos,
                end: self.end,
                size,
            });
        }
        Ok(self)
    }

    /// Length of the chunk starting at `pos`.
    pub fn chunk_len(self, chunk_size: u64) -> u64 {
        (self.end - self.pos + 1).min(chunk_size)
    }

    /// The interval after a chunk; it must start past `previous`.
    pub fn advance(previous: u64, next: Self, size: u64) -> Result<Self, UploadError> {
        if next.pos <= previous {
            return Err(UploadError::NoProgress {
                previous,
                next: next.pos,
            });
        }
        next.check(size)
    }
}

fn error_status(reply: &Value) -> Option<i64> {
    reply.get("error_status").map(|status| {
        status
            .as_i64()
            .or_else(|| status.as_str().and_then(|text| text.parse().ok()))
            .unwrap_or(-1)
    })
}

fn server_error(reply: &Value, status: i64) -> UploadError {
    UploadError::Server {
        status,
        body: reply.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceReply {
    AlreadyUploaded,
    Upload { url: String, need: NeedInterval },
}

impl AnnounceReply {
    pub fn decode(reply: &Value, size: u64) -> Result<Self, UploadError> {
        match error_status(reply) {
            Some(ALREADY_UPLOADED) => return Ok(Self::AlreadyUploaded),
            Some(status) => return Err(server_error(reply, status)),
            None => {}
        }
        let url = reply
            .get("URLToUse")
            .and_then(Value::as_str)
            .ok_or_else(|| UploadError::MissingField {
                field: "URLToUse",
                body: reply.to_string(),
            })?;
        let need = NeedInterval::from_reply(reply)?.check(size)?;
        Ok(Self::Upload {
            url: url.to_owned(),
            need,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkReply {
    Uploaded,
    Need(NeedInterval),
}

impl ChunkReply {
    pub fn decode(reply: &Value) -> Result<Self, UploadError> {
        if let Some(status) = error_status(reply) {
            return Err(server_error(reply, status));
        }
        if reply.get("FileUploaded").is_some() {
            return Ok(Self::Uploaded);
        }
        NeedInterval::from_reply(reply).map(Self::Need)
    }
}

/// Rewrites a plain `http:` target to `https:`.
pub fn upgrade_to_https(url: &str) -> String {
    match url.strip_prefix("http:") {
        Some(rest) => format!("https:{rest}"),
        None => url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn announce_reply_yields_url_and_need() {
        let reply = json!({"URLToUse": "http://mersenne.org/upload/abc", "need": {"0": 999}});
        assert_eq!(
            AnnounceReply::decode(&reply, 1000),
            Ok(AnnounceReply::Upload {
                url: "http://mersenne.org/upload/abc".to_owned(),
                need: NeedInterval { pos: 0, end: 999 },
            })
        );
    }

    #[test]
    fn conflict_means_already_uploaded() {
        let reply = json!({"error_status": 409, "error_description": "exists"});
        assert_eq!(AnnounceReply::decode(&reply, 1000), Ok(AnnounceReply::AlreadyUploaded));

        let reply = json!({"error_status": 401});
        assert!(matches!(
            AnnounceReply::decode(&reply, 1000),
            Err(UploadError::Server { status: 401, .. })
        ));
    }

    #[test]
    fn need_must_fit_inside_the_file() {
        let reply = json!({"URLToUse": "https://x/", "need": {"0": 1000}});
        assert_eq!(
            AnnounceReply::decode(&reply, 1000),
            Err(UploadError::InvalidNeed { pos: 0, end: 1000, size: 1000 })
        );
        let reply = json!({"URLToUse": "https://x/"});
        assert!(matches!(
            AnnounceReply::decode(&reply, 1000),
            Err(UploadError::MissingField { field: "need", .. })
        ));
    }

    #[test]
    fn chunk_replies() {
        assert_eq!(ChunkReply::decode(&json!({"FileUploaded": true})), Ok(ChunkReply::Uploaded));
        assert_eq!(
            ChunkReply::decode(&json!({"need": {"500": "999"}})),
            Ok(ChunkReply::Need(NeedInterval { pos: 500, end: 999 }))
        );
    }

    #[test]
    fn need_picks_numerically_lowest_offset() {
        let reply = json!({"need": {"10485760": 20971519, "9437184": 10485759}});
        assert_eq!(
            NeedInterval::from_reply(&reply),
            Ok(NeedInterval { pos: 9_437_184, end: 10_485_759 })
        );
        assert!(matches!(
            NeedInterval::from_reply(&json!({"need": {}})),
            Err(UploadError::MissingField { field: "need", .. })
        ));
    }

    #[test]
    fn progress_must_move_forward() {
        let next = NeedInterval { pos: 100, end: 999 };
        assert_eq!(NeedInterval::advance(0, next, 1000), Ok(next));
        assert_eq!(
            NeedInterval::advance(100, next, 1000),
            Err(UploadError::NoProgress { previous: 100, next: 100 })
        );
    }

    #[test]
    fn chunks_are_capped() {
        let need = NeedInterval { pos: 0, end: 999 };
        assert_eq!(need.chunk_len(CHUNK_SIZE), 1000);
        assert_eq!(need.chunk_len(256), 256);
        let big = NeedInterval { pos: 0, end: 20 * 1024 * 1024 };
        assert_eq!(big.chunk_len(CHUNK_SIZE), CHUNK_SIZE);
    }

    #[test]
    fn https_upgrade_only_touches_plain_http() {
        assert_eq!(upgrade_to_https("http://a/b"), "https://a/b");
        assert_eq!(upgrade_to_https("https://a/b"), "https://a/b");
    }
}
