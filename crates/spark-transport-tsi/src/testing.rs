//! 单元测试专用的脚本化引擎替身。

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    bio::Bio,
    engine::{EngineError, FailureClass, HandshakeState, TlsEngine},
};

/// 握手脚本中的一步。
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// 从入站视图拉取至多 `n` 字节。
    Consume(usize),
    /// 向引擎队列追加待发字节。
    Emit(Vec<u8>),
    /// 标记握手完成，但继续执行后续步骤。
    Complete,
    WantRead,
    Done,
    Fail,
}

/// 按脚本推进握手、以恒等变换充当记录层的引擎。
pub(crate) struct ScriptedEngine {
    script: VecDeque<Step>,
    queued: Vec<u8>,
    complete: bool,
    peer_certificate: Option<Vec<u8>>,
    alpn: Option<Vec<u8>>,
    write_error: Option<EngineError>,
    read_error: Option<EngineError>,
    drops: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub(crate) fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            queued: Vec::new(),
            complete: false,
            peer_certificate: None,
            alpn: None,
            write_error: None,
            read_error: None,
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_queued_output(mut self, bytes: Vec<u8>) -> Self {
        self.queued = bytes;
        self
    }

    pub(crate) fn with_peer_certificate(mut self, der: Vec<u8>) -> Self {
        self.peer_certificate = Some(der);
        self
    }

    pub(crate) fn with_alpn(mut self, protocol: &[u8]) -> Self {
        self.alpn = Some(protocol.to_vec());
        self
    }

    pub(crate) fn failing_writes(mut self, error: EngineError) -> Self {
        self.write_error = Some(error);
        self
    }

    pub(crate) fn failing_reads(mut self, error: EngineError) -> Self {
        self.read_error = Some(error);
        self
    }

    /// 引擎被释放的次数计数器。
    pub(crate) fn drop_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.drops)
    }

    fn flush(&mut self, bio: &mut Bio<'_>) -> usize {
        if self.queued.is_empty() {
            return 0;
        }
        let pushed = bio.push(&self.queued).unwrap_or(0);
        self.queued.drain(..pushed);
        pushed
    }
}

impl TlsEngine for ScriptedEngine {
    fn handshake_step(&mut self, bio: &mut Bio<'_>) -> Result<HandshakeState, EngineError> {
        loop {
            self.flush(bio);
            if !self.queued.is_empty() {
                return Ok(HandshakeState::WantWrite);
            }
            match self.script.pop_front() {
                None | Some(Step::Done) => {
                    self.complete = true;
                    return Ok(HandshakeState::Done);
                }
                Some(Step::Consume(n)) => {
                    let mut scratch = vec![0u8; n];
                    let mut taken = 0;
                    while taken < n {
                        match bio.pull(&mut scratch[taken..]) {
                            Ok(read) => taken += read,
                            Err(_) => break,
                        }
                    }
                }
                Some(Step::Emit(bytes)) => self.queued.extend_from_slice(&bytes),
                Some(Step::Complete) => self.complete = true,
                Some(Step::WantRead) => return Ok(HandshakeState::WantRead),
                Some(Step::Fail) => {
                    return Err(EngineError::fatal(
                        FailureClass::Integrity,
                        "scripted handshake failure",
                    ));
                }
            }
        }
    }

    fn is_handshake_complete(&self) -> bool {
        self.complete
    }

    fn write_pending(&mut self, bio: &mut Bio<'_>) -> Result<usize, EngineError> {
        Ok(self.flush(bio))
    }

    fn has_pending_output(&self) -> bool {
        !self.queued.is_empty()
    }

    fn record_write(&mut self, plaintext: &[u8], bio: &mut Bio<'_>) -> Result<usize, EngineError> {
        if let Some(error) = self.write_error.clone() {
            return Err(error);
        }
        self.queued.extend_from_slice(plaintext);
        self.flush(bio);
        Ok(plaintext.len())
    }

    fn record_read(&mut self, out: &mut [u8], bio: &mut Bio<'_>) -> Result<usize, EngineError> {
        if let Some(error) = self.read_error.clone() {
            return Err(error);
        }
        bio.pull(out).map_err(|_| EngineError::WouldBlock)
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.peer_certificate.clone()
    }

    fn negotiated_alpn(&self) -> Option<Vec<u8>> {
        self.alpn.clone()
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}
