//! 从真实证书提取对端身份的属性顺序与取值。

mod common;

use anyhow::{Context, Result};
use common::{TestCa, pem_to_der};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use spark_transport_tsi::peer::{
    self, CERTIFICATE_TYPE_PROPERTY, PEM_CERT_PROPERTY, SUBJECT_ALTERNATIVE_NAME_PROPERTY,
    SUBJECT_COMMON_NAME_PROPERTY,
};

#[test]
fn properties_follow_fixed_order() -> Result<()> {
    let ca = TestCa::new("Identity CA")?;
    let issued = ca.issue_server(
        "svc.spark.test",
        &["svc.spark.test", "10.0.0.7", "*.svc.spark.test"],
    )?;

    let identity = peer::extract(&issued.der, true)?;
    let names: Vec<&str> = identity.properties().iter().map(|p| p.name()).collect();
    // IP 类型的 SAN 被跳过。
    assert_eq!(
        names,
        [
            CERTIFICATE_TYPE_PROPERTY,
            SUBJECT_COMMON_NAME_PROPERTY,
            PEM_CERT_PROPERTY,
            SUBJECT_ALTERNATIVE_NAME_PROPERTY,
            SUBJECT_ALTERNATIVE_NAME_PROPERTY,
        ]
    );
    let sans: Vec<&str> = identity
        .properties_named(SUBJECT_ALTERNATIVE_NAME_PROPERTY)
        .filter_map(|p| p.value_str())
        .collect();
    assert_eq!(sans, ["svc.spark.test", "*.svc.spark.test"]);
    assert_eq!(identity.properties()[0].value(), b"X509");
    assert_eq!(identity.properties()[1].value(), b"svc.spark.test");

    let pem = identity
        .property(PEM_CERT_PROPERTY)
        .and_then(|p| p.value_str())
        .context("缺少 PEM 属性")?;
    assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
    assert!(pem.lines().all(|line| line.len() <= 64));
    assert_eq!(pem_to_der(pem.as_bytes())?, issued.der);
    Ok(())
}

#[test]
fn pem_extraction_omits_certificate_type() -> Result<()> {
    let ca = TestCa::new("Identity CA")?;
    let issued = ca.issue_server("pem.spark.test", &["pem.spark.test"])?;
    let identity = peer::extract_from_pem(issued.pair.cert_chain.as_bytes())?;
    assert_eq!(identity.len(), 3);
    assert!(identity.property(CERTIFICATE_TYPE_PROPERTY).is_none());
    assert!(identity.matches_name("pem.spark.test"));
    Ok(())
}

#[test]
fn missing_common_name_is_empty_not_error() -> Result<()> {
    let mut params = CertificateParams::new(vec!["nocn.spark.test".to_string()])?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Spark");
    params.distinguished_name = dn;
    let key = KeyPair::generate()?;
    let certificate = params.self_signed(&key)?;

    let identity = peer::extract(certificate.der(), false)?;
    let common_name = identity
        .property(SUBJECT_COMMON_NAME_PROPERTY)
        .context("缺少 CN 属性")?;
    assert!(common_name.value().is_empty());
    assert_eq!(identity.len(), 3);
    Ok(())
}

#[test]
fn common_name_is_cut_at_next_attribute() -> Result<()> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "first.spark.test");
    dn.push(DnType::OrganizationName, "Spark");
    params.distinguished_name = dn;
    let key = KeyPair::generate()?;
    let certificate = params.self_signed(&key)?;

    let identity = peer::extract(certificate.der(), false)?;
    assert_eq!(
        identity
            .property(SUBJECT_COMMON_NAME_PROPERTY)
            .and_then(|p| p.value_str()),
        Some("first.spark.test")
    );
    assert_eq!(identity.len(), 2);
    Ok(())
}
