//! clouds.yaml discovery and file-backed profile storage.

use std::{
    fs::Permissions,
    io,
    path::{Path, PathBuf},
};

use log::debug;
use serde_yaml::{Mapping, Value};
use tokio::{fs, io::AsyncWriteExt};

use crate::{credentials::Profile, error::Error};

const CLOUDS: &str = "clouds";
const FILE_NAMES: [&str; 2] = ["clouds.yml", "clouds.yaml"];

/// Locates the clouds.yaml to operate on.
///
/// An explicit override may name the file itself or a directory to search.
/// After that the current directory, `~/.config/openstack` and the system-wide
/// directory are searched, trying `clouds.yml` before `clouds.yaml` in each.
pub fn find_config_file(override_path: Option<&Path>) -> Result<PathBuf, Error> {
    let mut search_dirs = Vec::new();
    if let Some(path) = override_path {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        search_dirs.push(path.to_path_buf());
    }
    search_dirs.extend(std::env::current_dir().ok());
    search_dirs.extend(dirs::home_dir().map(|home| home.join(".config").join("openstack")));
    search_dirs.push(system_config_dir());

    search(&search_dirs)
}

fn system_config_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:/ProgramData/openstack")
    } else {
        PathBuf::from("/etc/openstack")
    }
}

fn search(search_dirs: &[PathBuf]) -> Result<PathBuf, Error> {
    search_dirs
        .iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| Error::ConfigNotFound {
            searched: search_dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn temp_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clouds.yaml".to_string());
    target.with_file_name(format!(".{file_name}.os-mfa.tmp"))
}

/// Creates a fresh temporary file that is never more readable than the file
/// it replaces, before any content is written. New files get 0600.
async fn create_temp(tmp: &Path, permissions: Option<&Permissions>) -> io::Result<fs::File> {
    let _ = fs::remove_file(tmp).await;
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options.mode(permissions.map_or(0o600, |p| p.mode() & 0o777));
    }
    #[cfg(not(unix))]
    let _ = permissions;
    options.open(tmp).await
}

/// The whole parsed clouds.yaml. Everything outside `clouds:` is carried
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudsDocument(Mapping);

impl CloudsDocument {
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_yaml::from_str::<Value>(content)? {
            Value::Null => Ok(Self::default()),
            Value::Mapping(mapping) => Ok(Self(mapping)),
            _ => Err(<serde_yaml::Error as serde::de::Error>::custom(
                "expected a mapping at the top level",
            )),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.0)
    }

    fn clouds(&self) -> Option<&Mapping> {
        self.0.get(CLOUDS).and_then(Value::as_mapping)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clouds().is_some_and(|clouds| clouds.contains_key(name))
    }

    pub fn profile(&self, name: &str) -> Option<Profile> {
        self.clouds()
            .and_then(|clouds| clouds.get(name))
            .and_then(Value::as_mapping)
            .cloned()
            .map(Profile::from_mapping)
    }

    pub fn insert(&mut self, name: &str, profile: Profile) {
        let mut clouds = self.clouds().cloned().unwrap_or_default();
        clouds.insert(
            Value::from(name),
            Value::Mapping(profile.as_mapping().clone()),
        );
        self.0.insert(Value::from(CLOUDS), Value::Mapping(clouds));
    }
}

/// File-backed store for the profiles in one clouds.yaml.
///
/// The file is read once and memoized. Every write replaces the whole file
/// (last writer wins); out-of-band edits made after the first read are lost.
#[derive(Debug)]
pub struct CloudsConfig {
    path: PathBuf,
    document: Option<CloudsDocument>,
}

impl CloudsConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&mut self) -> Result<&CloudsDocument, Error> {
        let document = match self.document.take() {
            Some(document) => document,
            None => self.read().await?,
        };
        Ok(self.document.insert(document))
    }

    async fn read(&self) -> Result<CloudsDocument, Error> {
        debug!("Reading {}", self.path.display());
        let content = fs::read_to_string(&self.path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                Error::ConfigNotFound {
                    searched: self.path.display().to_string(),
                }
            } else {
                Error::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        CloudsDocument::parse(&content).map_err(|source| Error::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the file with `document` and makes it the cached copy.
    ///
    /// The content goes to a temporary file beside the real target (symlinks
    /// are followed), created with the permissions of the current file, and
    /// is then renamed over it. A crash never leaves a truncated clouds.yaml.
    pub async fn save(&mut self, document: CloudsDocument) -> Result<(), Error> {
        let content = document.to_yaml().map_err(|source| Error::Parse {
            path: self.path.clone(),
            source,
        })?;
        let target = fs::canonicalize(&self.path)
            .await
            .unwrap_or_else(|_| self.path.clone());
        let tmp = temp_path(&target);

        let written: io::Result<()> = async {
            let permissions = fs::metadata(&target).await.ok().map(|m| m.permissions());
            let mut file = create_temp(&tmp, permissions.as_ref()).await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            if let Some(permissions) = permissions {
                fs::set_permissions(&tmp, permissions).await?;
            }
            fs::rename(&tmp, &target).await
        }
        .await;
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Io {
                path: target,
                source,
            });
        }

        debug!("Wrote {}", target.display());
        self.document = Some(document);
        Ok(())
    }

    pub async fn exists(&mut self, name: &str) -> Result<bool, Error> {
        Ok(self.load().await?.contains(name))
    }

    /// Returns the named profile, or an empty one when it does not exist.
    pub async fn get_by_name(&mut self, name: &str) -> Result<Profile, Error> {
        Ok(self.load().await?.profile(name).unwrap_or_default())
    }

    pub async fn put_by_name(&mut self, name: &str, profile: Profile) -> Result<(), Error> {
        self.put_profiles([(name.to_string(), profile)]).await
    }

    /// Inserts or overwrites several profiles and saves them in one write.
    pub async fn put_profiles(
        &mut self,
        profiles: impl IntoIterator<Item = (String, Profile)>,
    ) -> Result<(), Error> {
        let mut document = self.load().await?.clone();
        for (name, profile) in profiles {
            document.insert(&name, profile);
        }
        self.save(document).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const CLOUDS_YAML: &str = r#"clouds:
  catalyst:
    auth:
      auth_url: https://api.nz-hlz-1.catalystcloud.io:5000
      project_id: 1238a098c1273d409812409812
      project_name: john-doe
      username: john.doe@example.com
      password: notaverygoodpassword123
    auth_type: password
    identity_api_version: 3
    interface: public
    region_name: nz-hlz-1
  other:
    region_name: RegionOne
ansible:
  use_hostnames: true
"#;

    fn write_clouds(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn document_round_trips() {
        let document = CloudsDocument::parse(CLOUDS_YAML).unwrap();
        let reparsed = CloudsDocument::parse(&document.to_yaml().unwrap()).unwrap();

        assert_eq!(document, reparsed);
        assert_eq!(document.to_yaml().unwrap(), reparsed.to_yaml().unwrap());
    }

    #[test]
    fn empty_document_has_no_profiles() {
        let document = CloudsDocument::parse("").unwrap();
        assert!(!document.contains("catalyst"));
    }

    #[test]
    fn scalar_root_is_rejected() {
        assert!(CloudsDocument::parse("just a string").is_err());
        assert!(CloudsDocument::parse("clouds: [unterminated").is_err());
    }

    #[test]
    fn insert_creates_clouds_section() {
        let mut document = CloudsDocument::parse("ansible: {}\n").unwrap();
        let profile: Profile = serde_yaml::from_str("region_name: r1").unwrap();
        document.insert("fresh", profile.clone());

        assert_eq!(document.profile("fresh"), Some(profile));
    }

    #[tokio::test]
    async fn lookup_by_exact_name() {
        let dir = TempDir::new().unwrap();
        let mut store = CloudsConfig::new(write_clouds(&dir, "clouds.yaml", CLOUDS_YAML));

        assert!(store.exists("catalyst").await.unwrap());
        assert!(!store.exists("Catalyst").await.unwrap());
        assert!(!store.exists("catalyst-long-term").await.unwrap());

        let profile = store.get_by_name("catalyst").await.unwrap();
        assert_eq!(profile.auth_str("username").as_deref(), Some("john.doe@example.com"));
    }

    #[tokio::test]
    async fn missing_profile_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut store = CloudsConfig::new(write_clouds(&dir, "clouds.yaml", CLOUDS_YAML));

        assert_eq!(store.get_by_name("nope").await.unwrap(), Profile::default());
    }

    #[tokio::test]
    async fn load_is_memoized() {
        let dir = TempDir::new().unwrap();
        let path = write_clouds(&dir, "clouds.yaml", CLOUDS_YAML);
        let mut store = CloudsConfig::new(&path);

        assert!(store.exists("other").await.unwrap());
        std::fs::write(&path, "clouds: {}\n").unwrap();
        assert!(store.exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut store = CloudsConfig::new(dir.path().join("clouds.yaml"));

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let mut store = CloudsConfig::new(write_clouds(&dir, "clouds.yaml", "clouds: [oops"));

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::Parse { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn save_of_loaded_document_is_equivalent() {
        let dir = TempDir::new().unwrap();
        let path = write_clouds(&dir, "clouds.yaml", CLOUDS_YAML);
        let mut store = CloudsConfig::new(&path);

        let document = store.load().await.unwrap().clone();
        store.save(document.clone()).await.unwrap();

        let on_disk = CloudsDocument::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, document);
    }

    #[tokio::test]
    async fn put_by_name_writes_through() {
        let dir = TempDir::new().unwrap();
        let path = write_clouds(&dir, "clouds.yaml", CLOUDS_YAML);
        let mut store = CloudsConfig::new(&path);
        let profile: Profile = serde_yaml::from_str("region_name: r2").unwrap();

        store.put_by_name("other", profile.clone()).await.unwrap();

        assert_eq!(store.get_by_name("other").await.unwrap(), profile);
        let mut fresh = CloudsConfig::new(&path);
        assert_eq!(fresh.get_by_name("other").await.unwrap(), profile);
        assert!(fresh.exists("catalyst").await.unwrap());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("use_hostnames"));
        assert!(!dir.path().join(".clouds.yaml.os-mfa.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = write_clouds(&dir, "clouds.yaml", CLOUDS_YAML);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let mut store = CloudsConfig::new(&path);

        store.put_by_name("x", Profile::default()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_writes_through_symlink() {
        let dir = TempDir::new().unwrap();
        let real = write_clouds(&dir, "dotfiles-clouds.yaml", CLOUDS_YAML);
        let link = dir.path().join("clouds.yaml");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let mut store = CloudsConfig::new(&link);

        store.put_by_name("b", Profile::default()).await.unwrap();

        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let mut fresh = CloudsConfig::new(&real);
        assert!(fresh.exists("b").await.unwrap());
        assert!(fresh.exists("catalyst").await.unwrap());
        assert!(!dir.path().join(".dotfiles-clouds.yaml.os-mfa.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn temp_file_is_restricted_before_content_is_written() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join(".clouds.yaml.os-mfa.tmp");
        std::fs::write(&tmp, "stale").unwrap();
        std::fs::set_permissions(&tmp, Permissions::from_mode(0o644)).unwrap();

        let file = create_temp(&tmp, None).await.unwrap();
        drop(file);

        let metadata = std::fs::metadata(&tmp).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        assert_eq!(metadata.len(), 0);
    }

    #[test]
    fn search_prefers_earlier_dirs_and_yml() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_clouds(&second, "clouds.yaml", CLOUDS_YAML);
        let yml = write_clouds(&second, "clouds.yml", CLOUDS_YAML);

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(search(&dirs).unwrap(), yml);

        let preferred = write_clouds(&first, "clouds.yaml", CLOUDS_YAML);
        assert_eq!(search(&dirs).unwrap(), preferred);
    }

    #[test]
    fn search_reports_locations_when_nothing_found() {
        let empty = TempDir::new().unwrap();
        let err = search(&[empty.path().to_path_buf()]).unwrap_err();

        match err {
            Error::ConfigNotFound { searched } => {
                assert!(searched.contains(&empty.path().display().to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn override_file_wins() {
        let dir = TempDir::new().unwrap();
        let path = write_clouds(&dir, "my-clouds.yaml", CLOUDS_YAML);

        assert_eq!(find_config_file(Some(path.as_path())).unwrap(), path);
    }

    #[test]
    fn override_dir_is_searched_first() {
        let dir = TempDir::new().unwrap();
        let path = write_clouds(&dir, "clouds.yaml", CLOUDS_YAML);

        assert_eq!(find_config_file(Some(dir.path())).unwrap(), path);
    }
}
