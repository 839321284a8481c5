//! 集成测试共享的 PKI 生成与内存握手驱动。

#![allow(dead_code)]

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use rustls_pki_types::{CertificateDer, pem::PemObject};
use spark_transport_tsi::{
    FrameProtector, HandshakeResult, Handshaker, PemKeyCertPair, Role, TsiError, TsiResult,
};

/// 测试用的根 CA。
pub struct TestCa {
    pub pem: String,
    certificate: Certificate,
    key: KeyPair,
}

/// 由 [`TestCa`] 签发的叶子证书。
pub struct IssuedCert {
    pub pair: PemKeyCertPair,
    pub der: Vec<u8>,
}

impl TestCa {
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new()).context("构造 CA 参数失败")?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().context("生成 CA 私钥失败")?;
        let certificate = params.self_signed(&key).context("签发 CA 证书失败")?;
        Ok(Self {
            pem: certificate.pem(),
            certificate,
            key,
        })
    }

    pub fn issue_server(&self, common_name: &str, sans: &[&str]) -> Result<IssuedCert> {
        self.issue(common_name, sans, ExtendedKeyUsagePurpose::ServerAuth)
    }

    pub fn issue_client(&self, common_name: &str) -> Result<IssuedCert> {
        self.issue(common_name, &[], ExtendedKeyUsagePurpose::ClientAuth)
    }

    fn issue(
        &self,
        common_name: &str,
        sans: &[&str],
        usage: ExtendedKeyUsagePurpose,
    ) -> Result<IssuedCert> {
        let sans: Vec<String> = sans.iter().map(|san| san.to_string()).collect();
        let mut params = CertificateParams::new(sans).context("构造证书参数失败")?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.extended_key_usages = vec![usage];
        let key = KeyPair::generate().context("生成证书私钥失败")?;
        let certificate = params
            .signed_by(&key, &self.certificate, &self.key)
            .context("签发叶子证书失败")?;
        Ok(IssuedCert {
            pair: PemKeyCertPair::new(key.serialize_pem(), certificate.pem()),
            der: certificate.der().to_vec(),
        })
    }
}

/// 把 PEM 文本解析回 DER，用于比对 `x509-pem-cert` 属性。
pub fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>> {
    let certificate = CertificateDer::pem_slice_iter(pem)
        .next()
        .context("PEM 中没有证书")?
        .map_err(|err| anyhow::anyhow!("解析 PEM 失败: {err}"))?;
    Ok(certificate.as_ref().to_vec())
}

/// 握手失败的一方及其错误。
#[derive(Debug)]
pub struct SideFailure {
    pub role: Role,
    pub error: TsiError,
}

/// 握手完成后仍留在各方接收队列中的字节（例如 TLS1.3 会话票据），需交给保护器。
#[derive(Debug, Default)]
pub struct Leftovers {
    pub to_client: Vec<u8>,
    pub to_server: Vec<u8>,
}

/// 以 `out_capacity` 为单次输出上限，在内存中来回搬运字节直到双方握手完成。
pub fn drive_handshake(
    client: &mut Handshaker,
    server: &mut Handshaker,
    out_capacity: usize,
) -> Result<Leftovers, SideFailure> {
    let mut leftovers = Leftovers::default();
    for _ in 0..256 {
        let client_sent = pump(client, &mut leftovers.to_server, out_capacity)
            .map_err(|error| SideFailure { role: Role::Client, error })?;
        feed(server, &mut leftovers.to_server)
            .map_err(|error| SideFailure { role: Role::Server, error })?;
        let server_sent = pump(server, &mut leftovers.to_client, out_capacity)
            .map_err(|error| SideFailure { role: Role::Server, error })?;
        feed(client, &mut leftovers.to_client)
            .map_err(|error| SideFailure { role: Role::Client, error })?;

        let done = client.result() == HandshakeResult::Ok
            && server.result() == HandshakeResult::Ok;
        if done && client_sent == 0 && server_sent == 0 {
            return Ok(leftovers);
        }
    }
    panic!("handshake did not converge");
}

fn pump(handshaker: &mut Handshaker, wire: &mut Vec<u8>, out_capacity: usize) -> TsiResult<usize> {
    let mut out = vec![0u8; out_capacity];
    let mut total = 0;
    loop {
        let chunk = handshaker.get_bytes_to_send_to_peer(&mut out)?;
        wire.extend_from_slice(&out[..chunk.written]);
        total += chunk.written;
        if !chunk.more_pending {
            return Ok(total);
        }
    }
}

fn feed(handshaker: &mut Handshaker, wire: &mut Vec<u8>) -> TsiResult<()> {
    while !wire.is_empty() && handshaker.result() == HandshakeResult::InProgress {
        let consumed = handshaker.process_bytes_from_peer(wire)?;
        wire.drain(..consumed);
        if consumed == 0 {
            break;
        }
    }
    Ok(())
}

/// 以受限输出区反复调用 `protect`，最后 `flush`，返回完整密文。
pub fn protect_all(
    protector: &mut FrameProtector,
    plaintext: &[u8],
    out_capacity: usize,
) -> TsiResult<Vec<u8>> {
    let mut wire = Vec::new();
    let mut out = vec![0u8; out_capacity];
    let mut offset = 0;
    while offset < plaintext.len() {
        let progress = protector.protect(&plaintext[offset..], &mut out)?;
        offset += progress.consumed;
        wire.extend_from_slice(&out[..progress.produced]);
    }
    loop {
        let flushed = protector.flush(&mut out)?;
        wire.extend_from_slice(&out[..flushed.produced]);
        if !flushed.still_pending {
            return Ok(wire);
        }
    }
}

/// 以 `in_chunk` 大小分批投递密文，收集全部明文。
pub fn unprotect_all(
    protector: &mut FrameProtector,
    wire: &[u8],
    in_chunk: usize,
    out_capacity: usize,
) -> TsiResult<Vec<u8>> {
    let mut plaintext = Vec::new();
    let mut out = vec![0u8; out_capacity];
    let mut offset = 0;
    for _ in 0..1_000_000 {
        let end = (offset + in_chunk).min(wire.len());
        let progress = protector.unprotect(&wire[offset..end], &mut out)?;
        offset += progress.consumed;
        plaintext.extend_from_slice(&out[..progress.produced]);
        if offset == wire.len() && progress.produced == 0 {
            return Ok(plaintext);
        }
    }
    panic!("unprotect did not converge");
}
