use tokio::io::{AsyncRead, AsyncReadExt};

/// Byte buffer with a hard ceiling.
///
/// Bytes past `limit` are counted but dropped; the rendered text then ends
/// with a single truncation marker.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        let take = room.min(bytes.len());
        self.data.extend_from_slice(&bytes[..take]);
        self.dropped += bytes.len() - take;
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Drains `reader` to EOF, keeping at most `limit` bytes.
    pub async fn fill_from<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> std::io::Result<()> {
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            self.push(&chunk[..n]);
        }
    }

    pub fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.dropped > 0 {
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!(
                "[output truncated after {} bytes]\n",
                self.limit
            ));
        }
        text
    }

    /// Bounds an already-captured string.
    pub fn bounded(text: &str, limit: usize) -> String {
        let mut buffer = OutputBuffer::new(limit);
        buffer.push(text.as_bytes());
        buffer.into_string()
    }
}
