//! Shared fixtures: a self-signed identity, a provisioning profile and a
//! minimal IPA, staged in a temporary job input directory.

#![allow(dead_code)]

use ipasign::engine::{SigningInputFiles, SigningParams};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use plist::{Dictionary, Value};
use secrecy::SecretString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const PASSWORD: &str = "secret";

pub struct Fixture {
    pub dir: TempDir,
    pub files: SigningInputFiles,
}

impl Fixture {
    /// Identity with team `cert_team`, profile with team `profile_team`.
    pub fn new(cert_team: &str, profile_team: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(&input).unwrap();

        let key = generate_key();
        let cert = self_signed_cert(&key, cert_team);

        let p12 = input.join("identity.p12");
        fs::write(&p12, make_p12(&key, &cert)).unwrap();

        let provision = input.join("profile.mobileprovision");
        fs::write(&provision, make_profile(profile_team, &cert)).unwrap();

        let ipa = make_ipa(&input, "com.example.demo", "1.0");

        Self {
            dir,
            files: SigningInputFiles {
                ipa: Some(ipa),
                p12: Some(p12),
                provision: Some(provision),
                ..SigningInputFiles::default()
            },
        }
    }

    pub fn matching() -> Self {
        Self::new("ABC123", "ABC123")
    }

    pub fn work_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn input(&self, name: &str) -> PathBuf {
        self.dir.path().join("input").join(name)
    }
}

pub fn params() -> SigningParams {
    SigningParams {
        password: Some(SecretString::new(PASSWORD.into())),
        ..SigningParams::default()
    }
}

fn generate_key() -> PKey<Private> {
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

fn self_signed_cert(key: &PKey<Private>, team_id: &str) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "iPhone Distribution: Example Corp")
        .unwrap();
    name.append_entry_by_text("O", "Example Corp").unwrap();
    name.append_entry_by_text("OU", team_id).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&days_from_now(-1)).unwrap();
    builder.set_not_after(&days_from_now(365)).unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn make_p12(key: &PKey<Private>, cert: &X509) -> Vec<u8> {
    Pkcs12::builder()
        .name("fixture")
        .pkey(key)
        .cert(cert)
        .build2(PASSWORD)
        .unwrap()
        .to_der()
        .unwrap()
}

fn make_profile(team_id: &str, cert: &X509) -> Vec<u8> {
    let mut entitlements = Dictionary::new();
    entitlements.insert(
        "application-identifier".into(),
        Value::String(format!("{}.com.example.demo", team_id)),
    );

    let mut dict = Dictionary::new();
    dict.insert("AppIDName".into(), Value::String("Demo App".into()));
    dict.insert("Name".into(), Value::String("Demo Distribution".into()));
    dict.insert("UUID".into(), Value::String("F1XTURE-0000".into()));
    dict.insert(
        "TeamIdentifier".into(),
        Value::Array(vec![Value::String(team_id.into())]),
    );
    dict.insert(
        "DeveloperCertificates".into(),
        Value::Array(vec![Value::Data(cert.to_der().unwrap())]),
    );
    dict.insert("Entitlements".into(), Value::Dictionary(entitlements));
    dict.insert(
        "ExpirationDate".into(),
        Value::Date((SystemTime::now() + Duration::from_secs(30 * 86_400)).into()),
    );

    let mut xml = Vec::new();
    Value::Dictionary(dict).to_writer_xml(&mut xml).unwrap();

    let mut wrapped = b"0\x82\x10\x00\x06\x09*\x86H\x86\xf7\r\x01\x07\x02".to_vec();
    wrapped.extend_from_slice(&xml);
    wrapped.extend_from_slice(b"\xa0\x82signature");
    wrapped
}

/// `Payload/Demo.app/{Info.plist,Demo}` zipped into `dir/demo.ipa`.
pub fn make_ipa(dir: &Path, bundle_id: &str, version: &str) -> PathBuf {
    let mut info = Dictionary::new();
    info.insert("CFBundleIdentifier".into(), Value::String(bundle_id.into()));
    info.insert("CFBundleVersion".into(), Value::String(version.into()));
    info.insert("CFBundleName".into(), Value::String("Demo".into()));
    info.insert("CFBundleExecutable".into(), Value::String("Demo".into()));
    let mut info_bytes = Vec::new();
    Value::Dictionary(info).to_writer_xml(&mut info_bytes).unwrap();

    let path = dir.join("demo.ipa");
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    zip.add_directory("Payload/", options).unwrap();
    zip.add_directory("Payload/Demo.app/", options).unwrap();
    zip.start_file("Payload/Demo.app/Info.plist", options).unwrap();
    zip.write_all(&info_bytes).unwrap();
    zip.start_file("Payload/Demo.app/Demo", options.unix_permissions(0o755))
        .unwrap();
    zip.write_all(&[0xcf, 0xfa, 0xed, 0xfe, 0x0c, 0, 0, 0x01]).unwrap();
    zip.finish().unwrap();

    path
}

/// A ZIP that is not an IPA.
pub fn make_plain_zip(dir: &Path) -> PathBuf {
    let path = dir.join("plain.zip");
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    zip.start_file("readme.txt", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"hello").unwrap();
    zip.finish().unwrap();
    path
}

/// Answer exactly one HTTP request with `status_line` and `body`; returns the URL.
pub fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 {
            if line == "\r\n" {
                break;
            }
            line.clear();
        }
        let header = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status_line,
            body.len()
        );
        stream.write_all(header.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
    });

    format!("http://{}/demo.ipa", addr)
}

/// A URL on a port nothing listens on.
pub fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/demo.ipa", addr)
}
