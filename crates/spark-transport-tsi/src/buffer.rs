use bytes::Buf;

/// 固定容量的 FIFO 字节暂存区，用于在 TLS 引擎与调用方之间搬运密文。
///
/// # 设计动机（Why）
/// - 引擎写出的记录需要先落到有界缓冲，再由调用方按自身输出容量分批取走，
///   从而把“输出缓冲已满”表达为显式的背压信号，而不是无限增长；
/// - 与 `bytes::Buf` 对齐，调用方可以直接使用 `chunk`/`copy_to_slice` 等熟悉的读取接口。
///
/// # 契约（What）
/// - 始终满足 `read_offset ≤ len ≤ capacity`；
/// - `read_offset == len` 即视为空，此时两者同时复位为 0；
/// - `append` 只写入剩余容量（`capacity - len`），既不扩容也不阻塞；
/// - 在完全排空之前不会整理（compact）已读区域。
///
/// # 风险与权衡（Trade-offs）
/// - 不做整理意味着部分读取后可写空间暂时变小，换来的是零拷贝的顺序语义；
///   引擎侧未写出的数据会保留在引擎内部，排空后再补齐。
#[derive(Debug)]
pub struct ByteBuffer {
    storage: Box<[u8]>,
    len: usize,
    read_offset: usize,
}

impl ByteBuffer {
    /// 创建容量为 `capacity` 的空缓冲。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            read_offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// 尚未读取的字节数。
    pub fn unread(&self) -> usize {
        self.len - self.read_offset
    }

    /// 还能追加的字节数。
    pub fn spare_capacity(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.read_offset == self.len
    }

    /// 追加数据，返回实际写入的字节数（可能小于 `data.len()`）。
    pub fn append(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.spare_capacity());
        self.storage[self.len..self.len + take].copy_from_slice(&data[..take]);
        self.len += take;
        take
    }

    /// 将未读数据拷贝进 `out`，返回拷贝的字节数。
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let take = out.len().min(self.unread());
        out[..take].copy_from_slice(&self.storage[self.read_offset..self.read_offset + take]);
        self.advance(take);
        take
    }

    /// 丢弃全部内容并复位偏移。
    pub fn clear(&mut self) {
        self.len = 0;
        self.read_offset = 0;
    }
}

impl Buf for ByteBuffer {
    fn remaining(&self) -> usize {
        self.unread()
    }

    fn chunk(&self) -> &[u8] {
        &self.storage[self.read_offset..self.len]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.unread(),
            "cannot advance past the unread region of a ByteBuffer"
        );
        self.read_offset += cnt;
        if self.read_offset == self.len {
            self.clear();
        }
    }
}
