//! Multipart parsing for job submission.
//!
//! File parts are written under the job's input directory as
//! `{input}/{field}/{file name}` (`{input}/{field}/{n}/{file name}` for the
//! repeated fields); text parts become [`SigningParams`]. File parts under
//! any other field name are dropped unread.
//!
//! | Field | Kind | Maps to |
//! |-------|------|---------|
//! | `ipa` | file | [`SigningInputFiles::ipa`] |
//! | `p12` | file | [`SigningInputFiles::p12`] |
//! | `mp` | file | [`SigningInputFiles::provision`] |
//! | `tweakFiles` | file, repeated | [`SigningInputFiles::tweaks`] |
//! | `resourceFiles` | file, repeated | [`SigningInputFiles::resources`] |
//! | `iconFile` / `plistFile` / `entitlementsFile` | file | icon / custom plist / entitlements |
//! | `ipaurl`, `pass`, `entitlements`, `zipLevel` | text | URL, P12 password, entitlements text, compression |
//! | `bundleId` / `cyanBundleId` | text | bundle identifier override (`cyan*` wins) |
//! | `bundleName` / `cyanAppName` | text | display name override |
//! | `bundleVersion` / `cyanVersion` | text | version override |
//! | `cyanMinimumOS` | text | minimum OS override |
//! | `removeWatch`, `removeExtensions`, `removeSupportedDevices`, `enableDocuments`, `thinBinaries`, `weak`, `adhoc`, `debug` | text | flags, set when `"true"` |

use crate::error::ApiError;
use axum::extract::Multipart;
use ipasign::engine::{SigningInputFiles, SigningParams};
use ipasign::Error;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Multipart fields that carry files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileField {
    Ipa,
    P12,
    Provision,
    Tweak,
    Resource,
    Icon,
    CustomPlist,
    Entitlements,
}

impl FileField {
    const ALL: [FileField; 8] = [
        FileField::Ipa,
        FileField::P12,
        FileField::Provision,
        FileField::Tweak,
        FileField::Resource,
        FileField::Icon,
        FileField::CustomPlist,
        FileField::Entitlements,
    ];

    fn name(self) -> &'static str {
        match self {
            FileField::Ipa => "ipa",
            FileField::P12 => "p12",
            FileField::Provision => "mp",
            FileField::Tweak => "tweakFiles",
            FileField::Resource => "resourceFiles",
            FileField::Icon => "iconFile",
            FileField::CustomPlist => "plistFile",
            FileField::Entitlements => "entitlementsFile",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }
}

/// Submission form as received.
#[derive(Default)]
pub struct SignForm {
    pub files: SigningInputFiles,
    text: Vec<(String, String)>,
}

impl SignForm {
    /// Read every part of `multipart`, storing files below `input_dir`.
    ///
    /// Only the file fields in the table above are written, each under a
    /// directory named after the field. Repeated fields get one numbered
    /// subdirectory per upload so equal file names do not collide.
    pub async fn read(mut multipart: Multipart, input_dir: &Path) -> Result<Self, ApiError> {
        let mut form = SignForm::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            let Some(file_name) = field.file_name().map(str::to_string) else {
                let value = field.text().await?;
                form.text.push((name, value));
                continue;
            };

            let Some(file_field) = FileField::from_name(&name) else {
                debug!(field = %name, "Ignoring unknown file field");
                continue;
            };

            let data = field.bytes().await?;
            if data.is_empty() {
                continue;
            }

            let path = form.upload_path(input_dir, file_field, &file_name);
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&path, &data).await?;
            debug!(field = file_field.name(), path = %path.display(), bytes = data.len(), "Stored upload");

            form.attach(file_field, path);
        }

        Ok(form)
    }

    fn upload_path(&self, input_dir: &Path, field: FileField, file_name: &str) -> PathBuf {
        let dir = input_dir.join(field.name());
        let dir = match field {
            FileField::Tweak => dir.join(self.files.tweaks.len().to_string()),
            FileField::Resource => dir.join(self.files.resources.len().to_string()),
            _ => dir,
        };
        dir.join(sanitize_file_name(file_name, field.name()))
    }

    fn attach(&mut self, field: FileField, path: PathBuf) {
        let files = &mut self.files;
        match field {
            FileField::Ipa => files.ipa = Some(path),
            FileField::P12 => files.p12 = Some(path),
            FileField::Provision => files.provision = Some(path),
            FileField::Tweak => files.tweaks.push(path),
            FileField::Resource => files.resources.push(path),
            FileField::Icon => files.icon = Some(path),
            FileField::CustomPlist => files.custom_plist = Some(path),
            FileField::Entitlements => files.entitlements = Some(path),
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        self.text
            .iter()
            .rev()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.trim().to_string())
    }

    fn flag(&self, key: &str) -> bool {
        self.text(key).is_some_and(|v| v == "true")
    }

    /// Split into the library's input types.
    pub fn into_request(self) -> Result<(SigningInputFiles, SigningParams), ApiError> {
        let zip_level = self
            .text("zipLevel")
            .map(|v| {
                v.parse::<u32>()
                    .map_err(|_| Error::Validation(format!("Invalid zipLevel: {}", v)))
            })
            .transpose()?;

        let params = SigningParams {
            ipa_url: self.text("ipaurl"),
            password: self.text("pass").map(SecretString::new),
            bundle_id: self.text("cyanBundleId").or_else(|| self.text("bundleId")),
            bundle_name: self.text("cyanAppName").or_else(|| self.text("bundleName")),
            bundle_version: self.text("cyanVersion").or_else(|| self.text("bundleVersion")),
            minimum_os_version: self.text("cyanMinimumOS"),
            entitlements: self.text("entitlements"),
            zip_level,
            remove_watch: self.flag("removeWatch"),
            remove_extensions: self.flag("removeExtensions"),
            remove_supported_devices: self.flag("removeSupportedDevices"),
            enable_documents: self.flag("enableDocuments"),
            thin_binaries: self.flag("thinBinaries"),
            weak: self.flag("weak"),
            adhoc: self.flag("adhoc"),
            debug: self.flag("debug"),
        };

        Ok((self.files, params))
    }
}

/// Base name of an uploaded file, restricted to `[A-Za-z0-9._-]`.
fn sanitize_file_name(raw: &str, fallback: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn form(text: &[(&str, &str)]) -> SignForm {
        SignForm {
            files: SigningInputFiles::default(),
            text: text
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_cyan_fields_win() {
        let (_, params) = form(&[
            ("bundleId", "com.example.basic"),
            ("cyanBundleId", "com.example.cyan"),
            ("bundleName", "Basic"),
            ("cyanVersion", ""),
            ("bundleVersion", "3.1"),
        ])
        .into_request()
        .unwrap();

        assert_eq!(params.bundle_id.as_deref(), Some("com.example.cyan"));
        assert_eq!(params.bundle_name.as_deref(), Some("Basic"));
        assert_eq!(params.bundle_version.as_deref(), Some("3.1"));
    }

    #[test]
    fn test_flags_and_password() {
        let (_, params) = form(&[
            ("removeWatch", "true"),
            ("weak", "false"),
            ("thinBinaries", "on"),
            ("pass", "s3cret"),
            ("zipLevel", "0"),
        ])
        .into_request()
        .unwrap();

        assert!(params.remove_watch);
        assert!(!params.weak);
        assert!(!params.thin_binaries);
        assert_eq!(params.password.unwrap().expose_secret(), "s3cret");
        assert_eq!(params.zip_level, Some(0));
    }

    #[test]
    fn test_invalid_zip_level() {
        let result = form(&[("zipLevel", "fast")]).into_request();
        assert!(matches!(result, Err(ApiError(Error::Validation(_)))));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("My App.ipa", "ipa"), "My_App.ipa");
        assert_eq!(sanitize_file_name("../../etc/passwd", "ipa"), "passwd");
        assert_eq!(sanitize_file_name("C:\\x\\id.p12", "p12"), "id.p12");
        assert_eq!(sanitize_file_name("..", "mp"), "mp");
    }

    #[test]
    fn test_only_known_file_fields() {
        assert_eq!(FileField::from_name("mp"), Some(FileField::Provision));
        assert_eq!(FileField::from_name("tweakFiles"), Some(FileField::Tweak));
        assert_eq!(FileField::from_name("/tmp/escaped"), None);
        assert_eq!(FileField::from_name("../ipa"), None);
        assert_eq!(FileField::from_name("mystery"), None);
    }

    #[test]
    fn test_repeated_uploads_do_not_collide() {
        let input = Path::new("/data/jobs/j/input");
        let mut form = SignForm::default();

        let first = form.upload_path(input, FileField::Tweak, "hook.dylib");
        form.attach(FileField::Tweak, first.clone());
        let second = form.upload_path(input, FileField::Tweak, "hook.dylib");
        form.attach(FileField::Tweak, second.clone());

        assert_eq!(first, input.join("tweakFiles/0/hook.dylib"));
        assert_eq!(second, input.join("tweakFiles/1/hook.dylib"));
        assert_eq!(form.files.tweaks, [first, second]);
        assert_eq!(
            form.upload_path(input, FileField::Ipa, "../My App.ipa"),
            input.join("ipa/My_App.ipa")
        );
    }
}
