use std::io;

use thiserror::Error;

use crate::buffer::ByteBuffer;

/// BIO 垫片返回的非致命信号。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BioError {
    /// 入站视图已经读完，需要调用方提供更多字节。
    #[error("no unread inbound bytes")]
    WouldBlock,
    /// 出站缓冲已满，需要调用方先取走密文。
    #[error("outbound buffer is full")]
    BufferFull,
}

/// TLS 引擎的传输垫片：引擎从这里拉取对端字节、向这里推送待发字节。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让引擎完全不感知套接字：入站是调用方本次交来的只读视图，出站是上下文持有的有界缓冲；
/// - 把“等待对端数据”“输出已满”都表达成显式返回值，整个 TSI 因而保持同步、非阻塞。
///
/// ## 逻辑（How）
/// - `pull` 从入站视图的当前偏移拷贝数据并推进偏移，视图读尽后返回 [`BioError::WouldBlock`]；
/// - `push` 追加到出站 [`ByteBuffer`]，最多写满剩余容量，满时返回 [`BioError::BufferFull`]；
/// - 同时实现 `io::Read`/`io::Write`，两种信号都映射为 `ErrorKind::WouldBlock`，供 `rustls` 的
///   `read_tls`/`write_tls` 直接使用。
///
/// ## 契约（What）
/// - 单次握手推进或保护调用中可反复调用，既不凭空产生数据也不丢弃数据；
/// - [`Bio::consumed`] 报告引擎实际拉走的入站字节数，调用方据此返回“已消费”长度。
pub struct Bio<'a> {
    inbound: &'a [u8],
    offset: usize,
    outbound: &'a mut ByteBuffer,
}

impl<'a> Bio<'a> {
    pub fn new(inbound: &'a [u8], outbound: &'a mut ByteBuffer) -> Self {
        Self {
            inbound,
            offset: 0,
            outbound,
        }
    }

    /// 拉取最多 `buf.len()` 个入站字节。
    pub fn pull(&mut self, buf: &mut [u8]) -> Result<usize, BioError> {
        let unread = &self.inbound[self.offset..];
        if unread.is_empty() {
            return Err(BioError::WouldBlock);
        }
        let take = unread.len().min(buf.len());
        buf[..take].copy_from_slice(&unread[..take]);
        self.offset += take;
        Ok(take)
    }

    /// 推送出站字节，返回实际写入的长度。
    pub fn push(&mut self, data: &[u8]) -> Result<usize, BioError> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.outbound.append(data) {
            0 => Err(BioError::BufferFull),
            written => Ok(written),
        }
    }

    /// 引擎已经拉走的入站字节数。
    pub fn consumed(&self) -> usize {
        self.offset
    }

    pub fn has_unread(&self) -> bool {
        self.offset < self.inbound.len()
    }
}

impl io::Read for Bio<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.pull(buf)
            .map_err(|_| io::Error::from(io::ErrorKind::WouldBlock))
    }
}

impl io::Write for Bio<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf)
            .map_err(|_| io::Error::from(io::ErrorKind::WouldBlock))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn pull_advances_and_signals_exhaustion() {
        let mut outbound = ByteBuffer::with_capacity(4);
        let mut bio = Bio::new(b"abcde", &mut outbound);
        let mut buf = [0u8; 3];
        assert_eq!(bio.pull(&mut buf), Ok(3));
        assert_eq!(&buf, b"abc");
        assert_eq!(bio.pull(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"de");
        assert_eq!(bio.pull(&mut buf), Err(BioError::WouldBlock));
        assert_eq!(bio.consumed(), 5);
        assert!(!bio.has_unread());
    }

    #[test]
    fn push_fills_then_reports_full() {
        let mut outbound = ByteBuffer::with_capacity(4);
        {
            let mut bio = Bio::new(&[], &mut outbound);
            assert_eq!(bio.push(b"abc"), Ok(3));
            assert_eq!(bio.push(b"de"), Ok(1));
            assert_eq!(bio.push(b"f"), Err(BioError::BufferFull));
        }
        assert_eq!(outbound.unread(), 4);
    }

    #[test]
    fn io_adapters_map_signals_to_would_block() {
        let mut outbound = ByteBuffer::with_capacity(1);
        let mut bio = Bio::new(&[], &mut outbound);
        let mut buf = [0u8; 2];
        let err = bio.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(bio.write(b"xy").unwrap(), 1);
        let err = bio.write(b"z").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
