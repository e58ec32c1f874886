// Configuration file and credential resolution.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wp_office_publish::{Credentials, NormalizeOptions, WpConfig, DEFAULT_BACKUP_FILE};

pub const ENV_URL: &str = "WP_URL";
pub const ENV_USERNAME: &str = "WP_USERNAME";
pub const ENV_SECRET: &str = "WP_APP_PASSWORD";

pub const DEFAULT_EXPORT_WORKDIR: &str = "_tmp_export";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    pub site: Option<SiteConfig>,
    pub publish: Option<PublishConfig>,
    pub normalize: Option<NormalizeConfig>,
    pub export: Option<ExportConfig>,
}

/// Where to publish. The application password is deliberately not a field.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct SiteConfig {
    pub url: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct PublishConfig {
    pub backup_file: Option<PathBuf>,
    pub read_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
    pub per_page: Option<u32>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct NormalizeConfig {
    /// Empty string disables the default.
    pub default_line_height: Option<String>,
    pub pt_to_px: Option<bool>,
    pub map_font_families: Option<bool>,
    pub clamp_hairline_borders: Option<bool>,
    pub max_width_px: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct ExportConfig {
    pub soffice: Option<PathBuf>,
    pub workdir: Option<PathBuf>,
}

impl Config {
    pub fn backup_file(&self) -> PathBuf {
        self.publish
            .as_ref()
            .and_then(|p| p.backup_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_FILE))
    }

    pub fn wp_config(&self) -> WpConfig {
        let mut wp = WpConfig::default();
        if let Some(p) = &self.publish {
            if let Some(secs) = p.read_timeout_secs {
                wp.read_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = p.write_timeout_secs {
                wp.write_timeout = Duration::from_secs(secs);
            }
            if let Some(n) = p.per_page {
                wp.per_page = n.clamp(1, 100);
            }
            if let Some(ua) = &p.user_agent {
                wp.user_agent = ua.clone();
            }
        }
        wp
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        let mut opts = NormalizeOptions::default();
        let Some(n) = &self.normalize else {
            return opts;
        };
        if let Some(lh) = &n.default_line_height {
            let lh = lh.trim();
            opts.default_line_height = (!lh.is_empty()).then(|| lh.to_string());
        }
        if let Some(v) = n.pt_to_px {
            opts.pt_to_px = v;
        }
        if let Some(v) = n.map_font_families {
            opts.map_font_families = v;
        }
        if let Some(v) = n.clamp_hairline_borders {
            opts.clamp_hairline_borders = v;
        }
        if let Some(v) = n.max_width_px {
            opts.max_width_px = v;
        }
        opts
    }

    pub fn soffice(&self) -> Option<PathBuf> {
        self.export.as_ref().and_then(|e| e.soffice.clone())
    }

    pub fn export_workdir(&self) -> PathBuf {
        self.export
            .as_ref()
            .and_then(|e| e.workdir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_WORKDIR))
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "wp-office-publish")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}

/// Store site url and username for next time. Other sections are kept.
pub fn remember_site(path: &Path, url: &str, username: &str) -> Result<()> {
    let mut config = load_config(path)?;
    config.site = Some(SiteConfig {
        url: Some(url.to_string()),
        username: Some(username.to_string()),
    });
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let text = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Flags first, then environment, then the config file. The secret only
/// ever comes from the environment.
pub fn resolve_credentials(
    flag_url: Option<&str>,
    flag_username: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    config: &Config,
) -> Result<Credentials> {
    let site = config.site.clone().unwrap_or_default();
    let pick = |flag: Option<&str>, var: &str, file: Option<String>| {
        flag.map(str::to_string)
            .or_else(|| env(var))
            .filter(|v| !v.trim().is_empty())
            .or(file)
            .filter(|v| !v.trim().is_empty())
    };
    let url = pick(flag_url, ENV_URL, site.url)
        .ok_or_else(|| anyhow!("no site URL: pass --url, set {ENV_URL}, or add [site] url to the config file"))?;
    let username = pick(flag_username, ENV_USERNAME, site.username)
        .ok_or_else(|| anyhow!("no username: pass --username, set {ENV_USERNAME}, or add [site] username to the config file"))?;
    let secret = env(ENV_SECRET)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("no application password: set {ENV_SECRET}"))?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(anyhow!("site URL must start with http:// or https://: {url}"));
    }
    Ok(Credentials::new(url, username, secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backup_file(), PathBuf::from("temp_backup.html"));
        assert_eq!(config.export_workdir(), PathBuf::from("_tmp_export"));
        assert_eq!(config.wp_config().read_timeout, Duration::from_secs(20));
        assert_eq!(config.wp_config().write_timeout, Duration::from_secs(30));
        assert_eq!(config.normalize_options(), NormalizeOptions::default());
    }

    #[test]
    fn test_parse_sections() {
        let config: Config = toml::from_str(
            r#"
[site]
url = "https://example.org"
username = "editor"
password = "ignored"

[publish]
backup_file = "/tmp/wp-backup.html"
write_timeout_secs = 60
per_page = 500

[normalize]
default_line_height = ""
pt_to_px = true
max_width_px = 1200

[export]
soffice = "/opt/libreoffice/program/soffice"
"#,
        )
        .unwrap();
        assert_eq!(config.backup_file(), PathBuf::from("/tmp/wp-backup.html"));
        let wp = config.wp_config();
        assert_eq!(wp.write_timeout, Duration::from_secs(60));
        assert_eq!(wp.per_page, 100);
        let opts = config.normalize_options();
        assert_eq!(opts.default_line_height, None);
        assert!(opts.pt_to_px);
        assert_eq!(opts.max_width_px, 1200);
        assert!(opts.map_font_families);
        assert_eq!(
            config.soffice(),
            Some(PathBuf::from("/opt/libreoffice/program/soffice"))
        );
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[site\nurl = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_remember_keeps_other_sections_and_no_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[normalize]\npt_to_px = true\n").unwrap();

        remember_site(&path, "https://example.org", "editor").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("password"));
        let config = load_config(&path).unwrap();
        let site = config.site.clone().unwrap();
        assert_eq!(site.url.as_deref(), Some("https://example.org"));
        assert_eq!(site.username.as_deref(), Some("editor"));
        assert!(config.normalize_options().pt_to_px);
    }

    #[test]
    fn test_credential_precedence() {
        let config = Config {
            site: Some(SiteConfig {
                url: Some("https://file.example".to_string()),
                username: Some("file-user".to_string()),
            }),
            ..Default::default()
        };
        let env = env_of(&[
            (ENV_URL, "https://env.example/"),
            (ENV_SECRET, "abcd efgh"),
        ]);

        let creds = resolve_credentials(None, None, &env, &config).unwrap();
        assert_eq!(creds.site_url, "https://env.example");
        assert_eq!(creds.username, "file-user");
        assert_eq!(creds.secret, "abcd efgh");

        let creds =
            resolve_credentials(Some("https://flag.example"), Some("flag-user"), &env, &config)
                .unwrap();
        assert_eq!(creds.site_url, "https://flag.example");
        assert_eq!(creds.username, "flag-user");
    }

    #[test]
    fn test_secret_is_required() {
        let config = Config::default();
        let env = env_of(&[(ENV_URL, "https://x.example"), (ENV_USERNAME, "u")]);
        let err = resolve_credentials(None, None, env, &config).unwrap_err();
        assert!(err.to_string().contains(ENV_SECRET));
    }

    #[test]
    fn test_url_scheme_is_checked() {
        let env = env_of(&[(ENV_SECRET, "s")]);
        let err = resolve_credentials(Some("example.org"), Some("u"), env, &Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("http"));
    }
}
