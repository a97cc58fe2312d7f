//! Byte channel sources the raw stream is read from.

use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ChannelError;

/// Where the raw stream comes from.
///
/// String forms: `fifo:/tmp/pipe`, `file:/data/raw.yuv` (or a bare path),
/// `follow:/data/raw.yuv`, `tcp://127.0.0.1:9000`, `unix:/run/feed.sock`, `-` or `stdin`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelId {
    /// Named pipe, opened before or after its writer.
    Fifo(PathBuf),
    /// Regular file, read once to its end.
    File(PathBuf),
    /// File that is still being written; reaching its end means "wait for more".
    Follow(PathBuf),
    Tcp(String),
    Unix(PathBuf),
    Stdin,
}

impl FromStr for ChannelId {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let non_empty = |rest: &str| {
            if rest.is_empty() {
                Err(ChannelError::InvalidId(s.to_string()))
            } else {
                Ok(rest.to_string())
            }
        };

        if s.is_empty() {
            return Err(ChannelError::InvalidId(s.to_string()));
        }
        if s == "-" || s == "stdin" {
            return Ok(ChannelId::Stdin);
        }
        if let Some(rest) = s.strip_prefix("tcp://") {
            return non_empty(rest).map(ChannelId::Tcp);
        }
        if let Some(rest) = s.strip_prefix("fifo:") {
            return non_empty(rest).map(|p| ChannelId::Fifo(p.into()));
        }
        if let Some(rest) = s.strip_prefix("follow:") {
            return non_empty(rest).map(|p| ChannelId::Follow(p.into()));
        }
        if let Some(rest) = s.strip_prefix("unix:") {
            return non_empty(rest).map(|p| ChannelId::Unix(p.into()));
        }
        if let Some(rest) = s.strip_prefix("file:") {
            return non_empty(rest).map(|p| ChannelId::File(p.into()));
        }
        if s.contains("://") {
            return Err(ChannelError::InvalidId(s.to_string()));
        }
        Ok(ChannelId::File(s.into()))
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            ChannelId::Fifo(path) => write!(f, "fifo:{}", path.display()),
            ChannelId::File(path) => write!(f, "file:{}", path.display()),
            ChannelId::Follow(path) => write!(f, "follow:{}", path.display()),
            ChannelId::Tcp(addr) => write!(f, "tcp://{}", addr),
            ChannelId::Unix(path) => write!(f, "unix:{}", path.display()),
            ChannelId::Stdin => f.write_str("stdin"),
        }
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How a zero-length read is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Zero bytes means the writer is gone.
    Stream,
    /// Zero bytes means "no writer yet" until the first byte arrives, end-of-stream after.
    Fifo,
    /// Zero bytes always means "nothing new yet".
    Follow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRead {
    Data(usize),
    /// Nothing available right now, more may come.
    Idle,
    Closed,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

pub struct ByteChannel {
    name: String,
    kind: ChannelKind,
    reader: Option<BoxedReader>,
    seen_data: bool,
}

impl ByteChannel {
    pub async fn open(id: &ChannelId) -> Result<Self, ChannelError> {
        let name = id.to_string();
        let open_err = |source| ChannelError::Open {
            id: name.clone(),
            source,
        };

        let (reader, kind): (BoxedReader, ChannelKind) = match id {
            ChannelId::File(path) => (
                Box::new(tokio::fs::File::open(path).await.map_err(open_err)?),
                ChannelKind::Stream,
            ),
            ChannelId::Follow(path) => (
                Box::new(tokio::fs::File::open(path).await.map_err(open_err)?),
                ChannelKind::Follow,
            ),
            ChannelId::Tcp(addr) => (
                Box::new(
                    tokio::net::TcpStream::connect(addr.as_str())
                        .await
                        .map_err(open_err)?,
                ),
                ChannelKind::Stream,
            ),
            ChannelId::Stdin => (Box::new(tokio::io::stdin()), ChannelKind::Stream),
            #[cfg(unix)]
            ChannelId::Fifo(path) => (
                Box::new(
                    tokio::net::unix::pipe::OpenOptions::new()
                        .open_receiver(path)
                        .map_err(open_err)?,
                ),
                ChannelKind::Fifo,
            ),
            #[cfg(unix)]
            ChannelId::Unix(path) => (
                Box::new(
                    tokio::net::UnixStream::connect(path)
                        .await
                        .map_err(open_err)?,
                ),
                ChannelKind::Stream,
            ),
            #[cfg(not(unix))]
            ChannelId::Fifo(_) | ChannelId::Unix(_) => {
                return Err(ChannelError::Unsupported { id: name });
            }
        };

        log::info!("channel: opened {}", name);
        Ok(Self {
            name,
            kind,
            reader: Some(reader),
            seen_data: false,
        })
    }

    /// Wraps an already connected reader.
    pub fn from_reader<R>(reader: R, kind: ChannelKind) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            name: "reader".to_string(),
            kind,
            reader: Some(Box::new(reader)),
            seen_data: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Reads up to `buf.len()` bytes. May wait until the writer produces something.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ChannelRead, ChannelError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(ChannelRead::Closed);
        };
        if buf.is_empty() {
            return Ok(ChannelRead::Data(0));
        }

        let n = match reader.read(buf).await {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(ChannelRead::Idle),
            Err(e) => return Err(ChannelError::Read(e)),
        };
        if n > 0 {
            self.seen_data = true;
            return Ok(ChannelRead::Data(n));
        }

        Ok(match self.kind {
            ChannelKind::Stream => ChannelRead::Closed,
            ChannelKind::Fifo if self.seen_data => ChannelRead::Closed,
            ChannelKind::Fifo | ChannelKind::Follow => ChannelRead::Idle,
        })
    }

    /// Releases the underlying resource. Safe to call more than once.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            log::debug!("channel: closed {}", self.name);
        }
    }
}

impl Drop for ByteChannel {
    fn drop(&mut self) {
        self.close();
    }
}
