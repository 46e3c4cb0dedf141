//! Turns persisted settings into engine invocation descriptors.

use std::path::{Path, PathBuf};

use super::FormatSelector;
use crate::config::{Config, CookieSource, ProxyMode};

pub const DEFAULT_SOCKET_TIMEOUT_SECS: u32 = 60;

/// Bind address that forces outgoing connections over IPv4.
pub const IPV4_BIND_ADDRESS: &str = "0.0.0.0";

pub const OUTPUT_NAME_TEMPLATE: &str = "%(title)s.%(ext)s";

const PROXY_ENV_VARS: &[&str] = &[
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
    "ALL_PROXY",
    "all_proxy",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieArgs {
    File(PathBuf),
    Browser {
        browser: String,
        profile: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferArgs {
    pub format: FormatSelector,
    pub output_template: PathBuf,
    pub merge_output_format: String,
}

/// Everything the engine is told about one invocation.
///
/// Metadata lookups carry no `transfer` part; transfers always do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationDescriptor {
    pub socket_timeout: u32,
    pub source_address: Option<String>,
    pub proxy: Option<String>,
    pub cookies: Option<CookieArgs>,
    pub no_playlist: bool,
    pub transfer: Option<TransferArgs>,
}

impl InvocationDescriptor {
    pub fn is_transfer(&self) -> bool {
        self.transfer.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    system_proxy: Option<String>,
}

impl OptionsBuilder {
    /// Resolves the platform proxy once from the environment.
    pub fn new() -> Self {
        Self {
            system_proxy: system_proxy_from_env(),
        }
    }

    pub fn with_system_proxy(mut self, proxy: Option<String>) -> Self {
        self.system_proxy = proxy;
        self
    }

    pub fn metadata(&self, config: &Config) -> InvocationDescriptor {
        self.base(config)
    }

    pub fn transfer(&self, config: &Config, selector: &FormatSelector) -> InvocationDescriptor {
        let mut descriptor = self.base(config);
        descriptor.transfer = Some(TransferArgs {
            format: selector.clone(),
            output_template: Path::new(&config.general.download_dir).join(OUTPUT_NAME_TEMPLATE),
            merge_output_format: config.general.merge_output_format.clone(),
        });
        descriptor
    }

    /// The proxy actually forwarded for `config`, if any.
    pub fn proxy(&self, config: &Config) -> Option<String> {
        let network = &config.network;
        match network.proxy_mode {
            ProxyMode::None => None,
            ProxyMode::System => self.system_proxy.clone(),
            ProxyMode::Manual => {
                let address = network.proxy_address.trim();
                (!address.is_empty()).then(|| address.to_string())
            }
        }
    }

    fn base(&self, config: &Config) -> InvocationDescriptor {
        InvocationDescriptor {
            socket_timeout: parse_timeout(&config.network.socket_timeout),
            source_address: config
                .network
                .force_ipv4
                .then(|| IPV4_BIND_ADDRESS.to_string()),
            proxy: self.proxy(config),
            cookies: cookie_args(config),
            no_playlist: true,
            transfer: None,
        }
    }
}

/// Positive integer seconds, or the default for anything else.
pub fn parse_timeout(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(secs) if secs > 0 => secs,
        _ => DEFAULT_SOCKET_TIMEOUT_SECS,
    }
}

fn cookie_args(config: &Config) -> Option<CookieArgs> {
    let cookies = &config.cookies;
    if !cookies.enabled {
        return None;
    }

    match cookies.source {
        CookieSource::File => {
            let path = cookies.file_path.trim();
            // Checked once here; a file deleted later is the engine's problem.
            (!path.is_empty() && Path::new(path).exists())
                .then(|| CookieArgs::File(PathBuf::from(path)))
        }
        CookieSource::Browser => {
            let browser = cookies.browser.trim();
            if browser.is_empty() {
                return None;
            }
            let profile = cookies.profile.trim();
            Some(CookieArgs::Browser {
                browser: browser.to_string(),
                profile: (!profile.is_empty()).then(|| profile.to_string()),
            })
        }
    }
}

fn system_proxy_from_env() -> Option<String> {
    PROXY_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::format::BEST_AVAILABLE;
    use std::io::Write;

    fn builder() -> OptionsBuilder {
        OptionsBuilder::default().with_system_proxy(Some("http://proxy.corp:3128".into()))
    }

    #[test]
    fn valid_timeouts_are_kept() {
        for (raw, expected) in [("1", 1), ("60", 60), ("300", 300), (" 45 ", 45)] {
            assert_eq!(parse_timeout(raw), expected, "input {raw:?}");
        }
    }

    #[test]
    fn invalid_timeouts_fall_back_to_default() {
        for raw in ["", "abc", "0", "-5", "1.5", "12s", "99999999999"] {
            assert_eq!(parse_timeout(raw), 60, "input {raw:?}");
        }
    }

    #[test]
    fn lenient_defaults_scenario() {
        let mut config = Config::default();
        config.network.socket_timeout = "abc".into();
        config.network.force_ipv4 = false;
        config.network.proxy_mode = ProxyMode::None;
        config.cookies.enabled = false;

        let descriptor = builder().metadata(&config);
        assert_eq!(descriptor.socket_timeout, 60);
        assert_eq!(descriptor.proxy, None);
        assert_eq!(descriptor.cookies, None);
        assert_eq!(descriptor.source_address, None);
    }

    #[test]
    fn disabled_cookies_are_never_forwarded() {
        let cookie_file = tempfile::NamedTempFile::new().unwrap();

        for source in [CookieSource::File, CookieSource::Browser] {
            let mut config = Config::default();
            config.cookies.enabled = false;
            config.cookies.source = source;
            config.cookies.file_path = cookie_file.path().to_string_lossy().into_owned();
            config.cookies.browser = "firefox".into();
            config.cookies.profile = "default".into();

            assert_eq!(builder().metadata(&config).cookies, None);
            assert_eq!(builder().transfer(&config, &BEST_AVAILABLE.selector()).cookies, None);
        }
    }

    #[test]
    fn cookie_file_must_exist() {
        let mut cookie_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(cookie_file, "# Netscape HTTP Cookie File").unwrap();

        let mut config = Config::default();
        config.cookies.enabled = true;
        config.cookies.source = CookieSource::File;
        config.cookies.file_path = cookie_file.path().to_string_lossy().into_owned();
        assert_eq!(
            builder().metadata(&config).cookies,
            Some(CookieArgs::File(cookie_file.path().to_path_buf()))
        );

        config.cookies.file_path = cookie_file.path().with_extension("missing").to_string_lossy().into_owned();
        assert_eq!(builder().metadata(&config).cookies, None);

        config.cookies.file_path = String::new();
        assert_eq!(builder().metadata(&config).cookies, None);
    }

    #[test]
    fn browser_profile_is_optional() {
        let mut config = Config::default();
        config.cookies.enabled = true;
        config.cookies.source = CookieSource::Browser;
        config.cookies.browser = "firefox".into();
        config.cookies.profile = "   ".into();

        assert_eq!(
            builder().metadata(&config).cookies,
            Some(CookieArgs::Browser {
                browser: "firefox".into(),
                profile: None
            })
        );

        config.cookies.profile = "work".into();
        assert_eq!(
            builder().metadata(&config).cookies,
            Some(CookieArgs::Browser {
                browser: "firefox".into(),
                profile: Some("work".into())
            })
        );
    }

    #[test]
    fn proxy_modes() {
        let mut config = Config::default();

        config.network.proxy_mode = ProxyMode::System;
        assert_eq!(builder().metadata(&config).proxy.as_deref(), Some("http://proxy.corp:3128"));
        assert_eq!(
            OptionsBuilder::default().metadata(&config).proxy,
            None,
            "no platform proxy resolved"
        );

        config.network.proxy_mode = ProxyMode::Manual;
        config.network.proxy_address = "  socks5://127.0.0.1:1080 ".into();
        assert_eq!(builder().metadata(&config).proxy.as_deref(), Some("socks5://127.0.0.1:1080"));

        config.network.proxy_address = "   ".into();
        assert_eq!(builder().metadata(&config).proxy, None);

        config.network.proxy_mode = ProxyMode::None;
        config.network.proxy_address = "http://ignored:1".into();
        assert_eq!(builder().metadata(&config).proxy, None);
    }

    #[test]
    fn force_ipv4_sets_bind_hint_only_when_true() {
        let mut config = Config::default();
        assert_eq!(builder().metadata(&config).source_address, None);

        config.network.force_ipv4 = true;
        assert_eq!(builder().metadata(&config).source_address.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn metadata_and_transfer_descriptors_differ_only_in_transfer_part() {
        let mut config = Config::default();
        config.general.download_dir = "/data/videos".into();
        config.general.merge_output_format = "mkv".into();

        let metadata = builder().metadata(&config);
        assert!(!metadata.is_transfer());
        assert!(metadata.no_playlist);

        let selector = BEST_AVAILABLE.selector();
        let transfer = builder().transfer(&config, &selector);
        let args = transfer.transfer.clone().unwrap();
        assert_eq!(args.format, selector);
        assert_eq!(args.output_template, Path::new("/data/videos").join("%(title)s.%(ext)s"));
        assert_eq!(args.merge_output_format, "mkv");

        assert_eq!(InvocationDescriptor { transfer: None, ..transfer }, metadata);
    }
}
