use std::fmt;

use tracing::warn;

use crate::{
    context::EngineContext,
    engine::EngineError,
    error::{TsiError, TsiResult, record_read_failure, record_write_failure},
};

/// 受保护帧大小的下界。
pub const MIN_FRAME_SIZE: usize = 1024;
/// 受保护帧大小的上界，也是未指定时的缺省值。
pub const MAX_FRAME_SIZE: usize = 16 * 1024;
/// 为记录头、认证标签等膨胀预留的字节数。
pub const PROTECTION_OVERHEAD: usize = 100;

/// `protect` / `unprotect` 的进度。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// 从输入中消费的字节数。
    pub consumed: usize,
    /// 写入输出区的字节数。
    pub produced: usize,
}

/// `flush` 的进度。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushProgress {
    pub produced: usize,
    /// 仍有未取走的密文。
    pub still_pending: bool,
}

/// 握手完成后的流式加解密器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把应用明文攒成不超过帧上限的块再交给引擎加密，减少小记录带来的膨胀；
/// - 输出区不足时以 `consumed = 0` 表达背压，调用方取走密文后用同一份输入重试即可。
///
/// ## 逻辑（How）
/// 1. `protect`：若出站仍有上次未取走的密文，只排空并返回；否则把输入攒进明文暂存区，
///    暂存区满时整块写入引擎，再排空到输出区；
/// 2. `flush`：把暂存区剩余明文写入引擎并排空，报告是否仍有密文待取；
/// 3. `unprotect`：以入参为入站视图反复读取记录，直到无更多明文、缺密文或输出区写满。
///
/// ## 契约（What）
/// - 写方向的 `WouldBlock` 意味着引擎要求重新握手，返回 `Unimplemented`；
/// - 其余引擎失败返回 `DataCorrupted`；
/// - 失败对本实例是致命的：锁存后每次调用都返回同一错误。
pub struct FrameProtector {
    context: EngineContext,
    plaintext: Box<[u8]>,
    filled: usize,
    max_frame_size: usize,
    failure: Option<TsiError>,
}

impl FrameProtector {
    pub(crate) fn new(context: EngineContext, requested_max_frame_size: Option<usize>) -> Self {
        let max_frame_size = requested_max_frame_size
            .map_or(MAX_FRAME_SIZE, |size| size.clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE));
        Self {
            context,
            plaintext: vec![0u8; max_frame_size - PROTECTION_OVERHEAD].into_boxed_slice(),
            filled: 0,
            max_frame_size,
            failure: None,
        }
    }

    /// 夹取后的有效帧上限。
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// 加密 `input` 并把密文写入 `out`。
    pub fn protect(&mut self, input: &[u8], out: &mut [u8]) -> TsiResult<Progress> {
        self.check_ready(out)?;
        if self.context.has_pending_output() {
            let produced = self.drain(out)?;
            return Ok(Progress {
                consumed: 0,
                produced,
            });
        }

        let space = self.plaintext.len() - self.filled;
        if input.len() < space {
            self.plaintext[self.filled..self.filled + input.len()].copy_from_slice(input);
            self.filled += input.len();
            return Ok(Progress {
                consumed: input.len(),
                produced: 0,
            });
        }

        self.plaintext[self.filled..].copy_from_slice(&input[..space]);
        self.filled = self.plaintext.len();
        self.write_buffered()?;
        let produced = self.drain(out)?;
        Ok(Progress {
            consumed: space,
            produced,
        })
    }

    /// 加密暂存区中剩余的明文并排空密文。
    pub fn flush(&mut self, out: &mut [u8]) -> TsiResult<FlushProgress> {
        self.check_ready(out)?;
        if self.filled > 0 {
            self.write_buffered()?;
        }
        let produced = self.drain(out)?;
        Ok(FlushProgress {
            produced,
            still_pending: self.context.has_pending_output(),
        })
    }

    /// 解密 `input` 中的记录，把明文写入 `out`。
    pub fn unprotect(&mut self, input: &[u8], out: &mut [u8]) -> TsiResult<Progress> {
        self.check_ready(out)?;
        let (outcome, consumed) = self.context.drive(input, |engine, bio| {
            let mut produced = 0;
            while produced < out.len() {
                match engine.record_read(&mut out[produced..], bio) {
                    Ok(0) | Err(EngineError::WouldBlock) => break,
                    Ok(read) => produced += read,
                    Err(error) => return Err(error),
                }
            }
            Ok(produced)
        });
        match outcome {
            Ok(produced) => Ok(Progress { consumed, produced }),
            Err(error) => Err(self.latch(record_read_failure(error))),
        }
    }

    fn write_buffered(&mut self) -> TsiResult<()> {
        let plaintext = &self.plaintext[..self.filled];
        let (outcome, _) = self.context.drive(&[], |engine, bio| {
            let mut written = 0;
            while written < plaintext.len() {
                match engine.record_write(&plaintext[written..], bio)? {
                    0 => return Err(EngineError::WouldBlock),
                    accepted => written += accepted,
                }
            }
            Ok(())
        });
        self.filled = 0;
        outcome.map_err(|error| self.latch(record_write_failure(error)))
    }

    fn drain(&mut self, out: &mut [u8]) -> TsiResult<usize> {
        self.context
            .drain_outbound(out)
            .map_err(|error| self.latch(record_write_failure(error)))
    }

    fn check_ready(&self, out: &[u8]) -> TsiResult<()> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if out.is_empty() {
            return Err(TsiError::invalid_argument("output buffer is empty"));
        }
        Ok(())
    }

    fn latch(&mut self, error: TsiError) -> TsiError {
        warn!(code = error.code(), error = %error, "frame protector failed");
        self.failure = Some(error.clone());
        error
    }
}

impl fmt::Debug for FrameProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameProtector")
            .field("max_frame_size", &self.max_frame_size)
            .field("buffered_plaintext", &self.filled)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
