//! Fixtures shared by unit tests: self-signed identities, provisioning
//! profiles and minimal IPAs.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use plist::{Dictionary, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub struct CertSpec {
    pub common_name: &'static str,
    pub organization: Option<&'static str>,
    pub team_id: Option<&'static str>,
    pub valid_from_days: i64,
    pub valid_to_days: i64,
}

impl Default for CertSpec {
    fn default() -> Self {
        Self {
            common_name: "iPhone Distribution: Example Corp",
            organization: Some("Example Corp"),
            team_id: Some("ABC123"),
            valid_from_days: -1,
            valid_to_days: 365,
        }
    }
}

pub fn generate_ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn days_from_now(days: i64) -> Asn1Time {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    Asn1Time::from_unix(now + days * 86_400).unwrap()
}

pub fn self_signed_cert(key: &PKey<Private>, spec: &CertSpec) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", spec.common_name).unwrap();
    if let Some(org) = spec.organization {
        name.append_entry_by_text("O", org).unwrap();
    }
    if let Some(team) = spec.team_id {
        name.append_entry_by_text("OU", team).unwrap();
    }
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&days_from_now(spec.valid_from_days))
        .unwrap();
    builder
        .set_not_after(&days_from_now(spec.valid_to_days))
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn make_p12(key: &PKey<Private>, cert: &X509, password: &str) -> Vec<u8> {
    Pkcs12::builder()
        .name("test identity")
        .pkey(key)
        .cert(cert)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap()
}

/// Provisioning profile bytes: an XML plist wrapped in fake CMS framing.
pub fn make_profile(team_id: &str, expires_in_days: Option<i64>, certs: &[&X509]) -> Vec<u8> {
    let mut entitlements = Dictionary::new();
    entitlements.insert(
        "application-identifier".into(),
        Value::String(format!("{}.com.example.demo", team_id)),
    );
    entitlements.insert("get-task-allow".into(), Value::Boolean(false));

    let mut dict = Dictionary::new();
    dict.insert("AppIDName".into(), Value::String("Demo App".into()));
    dict.insert("Name".into(), Value::String("Demo Distribution".into()));
    dict.insert(
        "UUID".into(),
        Value::String("8C1F9E4A-1B2C-4D3E-9F00-112233445566".into()),
    );
    dict.insert(
        "TeamIdentifier".into(),
        Value::Array(vec![Value::String(team_id.into())]),
    );
    dict.insert(
        "ProvisionedDevices".into(),
        Value::Array(vec![Value::String("00008030-001A2B3C4D5E6F70".into())]),
    );
    dict.insert(
        "DeveloperCertificates".into(),
        Value::Array(
            certs
                .iter()
                .map(|c| Value::Data(c.to_der().unwrap()))
                .collect(),
        ),
    );
    dict.insert("Entitlements".into(), Value::Dictionary(entitlements));
    if let Some(days) = expires_in_days {
        let at = if days >= 0 {
            SystemTime::now() + Duration::from_secs(days as u64 * 86_400)
        } else {
            SystemTime::now() - Duration::from_secs(days.unsigned_abs() * 86_400)
        };
        dict.insert("ExpirationDate".into(), Value::Date(at.into()));
    }

    let mut xml = Vec::new();
    Value::Dictionary(dict).to_writer_xml(&mut xml).unwrap();

    let mut wrapped = b"0\x82\x1f\x00\x06\x09*\x86H\x86\xf7\r\x01\x07\x02".to_vec();
    wrapped.extend_from_slice(&xml);
    wrapped.extend_from_slice(b"\xa0\x82\x0b\x00trailing-signature-bytes");
    wrapped
}

/// Minimal IPA with `Payload/Demo.app/{Info.plist,Demo}`.
pub fn make_ipa(dir: &Path, bundle_id: &str, version: &str) -> PathBuf {
    let mut info = Dictionary::new();
    info.insert("CFBundleIdentifier".into(), Value::String(bundle_id.into()));
    info.insert("CFBundleVersion".into(), Value::String(version.into()));
    info.insert("CFBundleName".into(), Value::String("Demo".into()));
    info.insert("CFBundleExecutable".into(), Value::String("Demo".into()));
    let mut info_bytes = Vec::new();
    Value::Dictionary(info).to_writer_xml(&mut info_bytes).unwrap();

    fs::create_dir_all(dir).unwrap();
    let ipa_path = dir.join("demo.ipa");
    let mut zip = ZipWriter::new(File::create(&ipa_path).unwrap());
    let options = SimpleFileOptions::default();

    zip.add_directory("Payload/", options).unwrap();
    zip.add_directory("Payload/Demo.app/", options).unwrap();
    zip.start_file("Payload/Demo.app/Info.plist", options).unwrap();
    zip.write_all(&info_bytes).unwrap();
    zip.start_file("Payload/Demo.app/Demo", options.unix_permissions(0o755))
        .unwrap();
    zip.write_all(&[0xcf, 0xfa, 0xed, 0xfe, 0, 0, 0, 0]).unwrap();
    zip.finish().unwrap();

    ipa_path
}
