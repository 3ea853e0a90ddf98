//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Derivation of effective runtime settings from the project file."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
//! Everything in here is a pure function of [`ProjectConfig`]. The only state a
//! resolver carries is the remote-console password it generated, so that every
//! view derived from one resolver agrees on it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::{engine::general_purpose, Engine as _};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{ConfigValue, ProjectConfig, WORK_DIR_NAME};
use crate::service::Service;

/// Game port baked into the server image.
pub const GAME_PORT: u16 = 25565;
/// Remote-console port baked into the server image.
pub const RCON_PORT: u16 = 25575;
pub const QUERY_PORT: u16 = 25565;
/// Port the management API listens on inside its container.
pub const MANAGEMENT_PORT: u16 = 80;
/// Must match the world volume mount point.
pub const WORLD_NAME: &str = "world";
pub const PROPERTIES_MOUNT: &str = "/mc/server.properties";
pub const PROPERTIES_HOST_PATH: &str = ".tmp/server.properties";

pub const KEY_SERVER_PORT: &str = "server-port";
pub const KEY_LEVEL_NAME: &str = "level-name";
pub const KEY_ENABLE_FLIGHT: &str = "enable-flight";
pub const KEY_ENABLE_RCON: &str = "enable-rcon";
pub const KEY_RCON_PORT: &str = "rcon.port";
pub const KEY_RCON_PASSWORD: &str = "rcon.password";
pub const KEY_ENABLE_QUERY: &str = "enable-query";
pub const KEY_QUERY_PORT: &str = "query.port";

const JSON_STATE_FILES: [&str; 4] = [
    "banned-ips.json",
    "banned-players.json",
    "ops.json",
    "whitelist.json",
];

const PASSWORD_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// An externally published port with its protocol tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Udp,
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol.as_str())
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, protocol) = match s.split_once('/') {
            Some((port, "tcp")) => (port, Protocol::Tcp),
            Some((port, "udp")) => (port, Protocol::Udp),
            Some((_, other)) => return Err(format!("unknown protocol: {}", other)),
            None => (s, Protocol::Tcp),
        };
        let port = port
            .trim()
            .parse()
            .map_err(|_| format!("invalid port: {}", port))?;
        Ok(Self { port, protocol })
    }
}

/// Target of a published port inside the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortTarget {
    pub service: Service,
    pub internal: u16,
}

impl PortTarget {
    pub fn new(service: Service, internal: u16) -> Self {
        Self { service, internal }
    }
}

/// A volume mount; `host` is `None` when the engine should pick an ephemeral path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub host: Option<PathBuf>,
    pub mount: String,
}

impl VolumeSpec {
    fn new(host: Option<&str>, mount: impl Into<String>) -> Self {
        Self {
            host: host.map(PathBuf::from),
            mount: mount.into(),
        }
    }

    /// Host path relative to the project root, falling back to the ephemeral default.
    pub fn host_or_default(&self) -> PathBuf {
        self.host
            .clone()
            .unwrap_or_else(|| ephemeral_host_path(&self.mount))
    }
}

/// Derived runtime settings for one project.
#[derive(Debug)]
pub struct ConfigResolver<'a> {
    config: &'a ProjectConfig,
    preserved_password: Option<String>,
    generated_password: OnceCell<String>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(config: &'a ProjectConfig) -> Self {
        Self {
            config,
            preserved_password: None,
            generated_password: OnceCell::new(),
        }
    }

    /// Reuse a password from an earlier rendering instead of generating one.
    ///
    /// Only consulted when the project file does not set `rcon.password` itself.
    pub fn with_preserved_password(mut self, password: Option<String>) -> Self {
        self.preserved_password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        self.config
    }

    pub fn server_build_args(&self) -> IndexMap<String, String> {
        self.config
            .server
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect()
    }

    pub fn management_build_args(&self) -> IndexMap<String, String> {
        let plugins = serde_json::to_string(&self.config.management.plugins)
            .unwrap_or_else(|_| "null".to_owned());
        let mut args = IndexMap::new();
        args.insert("extra_pkgs".to_owned(), plugins);
        args
    }

    /// Effective `server.properties`, which can differ from what the user declared.
    pub fn server_properties(&self) -> IndexMap<String, ConfigValue> {
        let mut props = self.config.properties.clone();
        props.insert(KEY_SERVER_PORT.to_owned(), GAME_PORT.into());
        props.insert(KEY_LEVEL_NAME.to_owned(), WORLD_NAME.into());
        props
            .entry(KEY_ENABLE_FLIGHT.to_owned())
            .or_insert(ConfigValue::Bool(true));
        // The tooling talks to the server over rcon, so it is never optional.
        props.insert(KEY_ENABLE_RCON.to_owned(), ConfigValue::Bool(true));
        props.insert(KEY_RCON_PORT.to_owned(), RCON_PORT.into());
        if !props.contains_key(KEY_RCON_PASSWORD) {
            props.insert(
                KEY_RCON_PASSWORD.to_owned(),
                ConfigValue::Text(self.rcon_password().to_owned()),
            );
        }
        props
    }

    fn rcon_password(&self) -> &str {
        match &self.preserved_password {
            Some(password) => password,
            None => self.generated_password.get_or_init(generate_token),
        }
    }

    /// Ports published by the pod, keyed by external port.
    pub fn exposed_ports(&self) -> IndexMap<PortSpec, PortTarget> {
        let props = &self.config.properties;
        let mut ports = IndexMap::new();

        let game_port = props
            .get(KEY_SERVER_PORT)
            .and_then(ConfigValue::as_port)
            .unwrap_or(GAME_PORT);
        ports.insert(
            PortSpec::tcp(game_port),
            PortTarget::new(Service::Server, GAME_PORT),
        );

        if self.rcon_enabled() {
            let rcon_port = props
                .get(KEY_RCON_PORT)
                .and_then(ConfigValue::as_port)
                .unwrap_or(RCON_PORT);
            ports.insert(
                PortSpec::tcp(rcon_port),
                PortTarget::new(Service::Server, RCON_PORT),
            );
        }

        let query_enabled = props
            .get(KEY_ENABLE_QUERY)
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false);
        if query_enabled {
            let query_port = props
                .get(KEY_QUERY_PORT)
                .and_then(ConfigValue::as_port)
                .unwrap_or(QUERY_PORT);
            ports.insert(
                PortSpec::udp(query_port),
                PortTarget::new(Service::Server, query_port),
            );
        }

        if let Some(port) = self.config.management.server_port {
            ports.insert(
                PortSpec::tcp(port),
                PortTarget::new(Service::Manager, MANAGEMENT_PORT),
            );
        }

        ports
    }

    fn rcon_enabled(&self) -> bool {
        self.server_properties()
            .get(KEY_ENABLE_RCON)
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false)
    }

    /// Built-in volumes followed by the user's, with no duplicate mount points.
    pub fn volumes(&self) -> Vec<VolumeSpec> {
        let mut volumes = vec![
            VolumeSpec::new(Some("live"), "/mc/world"),
            VolumeSpec::new(Some("snapshot"), "/mc/snapshot"),
            VolumeSpec::new(Some(PROPERTIES_HOST_PATH), PROPERTIES_MOUNT),
            VolumeSpec::new(None, "/run/podman"),
            VolumeSpec::new(Some("logs"), "/mc/logs"),
            VolumeSpec::new(None, "/mc/crash-reports"),
        ];
        for file in JSON_STATE_FILES {
            volumes.push(VolumeSpec::new(Some(file), format!("/mc/{}", file)));
        }
        let builtin_count = volumes.len();

        for (name, mount) in &self.config.volumes {
            match volumes.iter().position(|v| &v.mount == mount) {
                Some(index) => {
                    if index < builtin_count {
                        warn!(
                            volume = %name,
                            mount = %mount,
                            "user volume overrides a built-in mount"
                        );
                    }
                    volumes[index].host = Some(PathBuf::from(name));
                }
                None => volumes.push(VolumeSpec::new(Some(name), mount.clone())),
            }
        }
        volumes
    }
}

/// Ephemeral host path for a mount point without a declared host path.
pub fn ephemeral_host_path(mount: &str) -> PathBuf {
    Path::new(WORK_DIR_NAME).join(mount.replace('/', "_"))
}

/// Render properties as `key=value` lines, sorted for stable output.
pub fn render_properties(props: &IndexMap<String, ConfigValue>) -> String {
    let mut keys: Vec<&String> = props.keys().collect();
    keys.sort();
    let mut out = String::new();
    for key in keys {
        out.push_str(key);
        out.push('=');
        out.push_str(&props[key].to_string());
        out.push('\n');
    }
    out
}

/// Parse `key=value` lines, skipping blanks and `#` comments.
pub fn parse_properties(text: &str) -> IndexMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .collect()
}

fn generate_token() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(text: &str) -> ProjectConfig {
        text.parse().unwrap()
    }

    #[test]
    fn server_properties_pins_fixed_fields() {
        let cfg = config(
            r#"
            [properties]
            server-port = 1234
            level-name = "elsewhere"
            enable-flight = false
            enable-rcon = false
            motd = "hi"
            "#,
        );
        let props = ConfigResolver::new(&cfg).server_properties();
        assert_eq!(props[KEY_SERVER_PORT], ConfigValue::Integer(25565));
        assert_eq!(props[KEY_LEVEL_NAME], ConfigValue::from("world"));
        assert_eq!(props[KEY_ENABLE_FLIGHT], ConfigValue::Bool(false));
        assert_eq!(props[KEY_ENABLE_RCON], ConfigValue::Bool(true));
        assert_eq!(props[KEY_RCON_PORT], ConfigValue::Integer(25575));
        assert_eq!(props["motd"], ConfigValue::from("hi"));
    }

    #[test]
    fn flight_defaults_to_enabled() {
        let cfg = config("");
        let props = ConfigResolver::new(&cfg).server_properties();
        assert_eq!(props[KEY_ENABLE_FLIGHT], ConfigValue::Bool(true));
    }

    #[test]
    fn server_properties_is_idempotent() {
        let cfg = config("[properties]\nmotd = \"x\"\n");
        let resolver = ConfigResolver::new(&cfg);
        let first = resolver.server_properties();
        let second = resolver.server_properties();
        assert_eq!(first, second);

        let rewritten = ProjectConfig {
            properties: first.clone(),
            ..cfg.clone()
        };
        let third = ConfigResolver::new(&rewritten).server_properties();
        assert_eq!(third[KEY_RCON_PASSWORD], first[KEY_RCON_PASSWORD]);
        assert_eq!(third[KEY_SERVER_PORT], first[KEY_SERVER_PORT]);
        assert_eq!(third[KEY_LEVEL_NAME], first[KEY_LEVEL_NAME]);
        assert_eq!(third[KEY_RCON_PORT], first[KEY_RCON_PORT]);
    }

    #[test]
    fn user_password_is_kept() {
        let cfg = config("[properties]\n\"rcon.password\" = \"hunter2\"\n");
        let props = ConfigResolver::new(&cfg)
            .with_preserved_password(Some("older".into()))
            .server_properties();
        assert_eq!(props[KEY_RCON_PASSWORD], ConfigValue::from("hunter2"));
    }

    #[test]
    fn preserved_password_wins_over_generation() {
        let cfg = config("");
        let props = ConfigResolver::new(&cfg)
            .with_preserved_password(Some("older".into()))
            .server_properties();
        assert_eq!(props[KEY_RCON_PASSWORD], ConfigValue::from("older"));
    }

    #[test]
    fn generated_password_is_url_safe() {
        let cfg = config("");
        let props = ConfigResolver::new(&cfg).server_properties();
        let ConfigValue::Text(password) = &props[KEY_RCON_PASSWORD] else {
            panic!("password must be text");
        };
        assert_eq!(password.len(), 43);
        assert!(password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn rcon_port_is_exposed_even_when_not_requested() {
        let cfg = config("");
        let resolver = ConfigResolver::new(&cfg);
        let ports = resolver.exposed_ports();
        assert_eq!(
            ports.get(&PortSpec::tcp(RCON_PORT)),
            Some(&PortTarget::new(Service::Server, RCON_PORT))
        );
        assert_eq!(
            resolver.server_properties()[KEY_ENABLE_RCON],
            ConfigValue::Bool(true)
        );
    }

    #[test]
    fn exposed_ports_scenario() {
        let cfg = config(
            r#"
            [management]
            server-port = 8080

            [properties]
            server-port = 1234
            enable-rcon = false
            enable-query = false
            "#,
        );
        let ports = ConfigResolver::new(&cfg).exposed_ports();
        assert_eq!(ports.len(), 3);
        assert_eq!(
            ports[&PortSpec::tcp(1234)],
            PortTarget::new(Service::Server, GAME_PORT)
        );
        assert_eq!(
            ports[&PortSpec::tcp(8080)],
            PortTarget::new(Service::Manager, MANAGEMENT_PORT)
        );
        assert_eq!(
            ports[&PortSpec::tcp(RCON_PORT)],
            PortTarget::new(Service::Server, RCON_PORT)
        );
    }

    #[test]
    fn query_port_is_udp() {
        let cfg = config("[properties]\nenable-query = true\n\"query.port\" = 25570\n");
        let ports = ConfigResolver::new(&cfg).exposed_ports();
        assert_eq!(
            ports[&PortSpec::udp(25570)],
            PortTarget::new(Service::Server, 25570)
        );
    }

    #[test]
    fn volumes_list_builtins_first_without_duplicates() {
        let cfg = config(
            r#"
            [volumes]
            plugins = "/mc/plugins"
            "custom-logs" = "/mc/logs"
            "#,
        );
        let volumes = ConfigResolver::new(&cfg).volumes();
        assert_eq!(volumes[0].mount, "/mc/world");
        assert_eq!(volumes[2].mount, PROPERTIES_MOUNT);
        assert_eq!(volumes.last().unwrap().mount, "/mc/plugins");

        let logs = volumes.iter().find(|v| v.mount == "/mc/logs").unwrap();
        assert_eq!(logs.host, Some(PathBuf::from("custom-logs")));

        let mut mounts: Vec<&str> = volumes.iter().map(|v| v.mount.as_str()).collect();
        let total = mounts.len();
        mounts.sort();
        mounts.dedup();
        assert_eq!(mounts.len(), total);
    }

    #[test]
    fn ephemeral_paths_live_under_work_dir() {
        assert_eq!(
            ephemeral_host_path("/mc/crash-reports"),
            PathBuf::from(".tmp/_mc_crash-reports")
        );
        let cfg = config("");
        let bridge = ConfigResolver::new(&cfg)
            .volumes()
            .into_iter()
            .find(|v| v.mount == "/run/podman")
            .unwrap();
        assert_eq!(bridge.host_or_default(), PathBuf::from(".tmp/_run_podman"));
    }

    #[test]
    fn management_build_args_serialize_plugins() {
        let cfg = config("[management]\nplugins = [\"a\", \"b\"]\n");
        let args = ConfigResolver::new(&cfg).management_build_args();
        assert_eq!(args["extra_pkgs"], r#"["a","b"]"#);

        let empty = config("");
        assert_eq!(
            ConfigResolver::new(&empty).management_build_args()["extra_pkgs"],
            "null"
        );
    }

    #[test]
    fn properties_render_and_parse_back() {
        let cfg = config("[properties]\npvp = false\n");
        let props = ConfigResolver::new(&cfg).server_properties();
        let text = render_properties(&props);
        assert!(text.contains("pvp=false\n"));
        assert!(text.contains("enable-rcon=true\n"));
        let parsed = parse_properties(&text);
        assert_eq!(parsed[KEY_RCON_PASSWORD], props[KEY_RCON_PASSWORD].to_string());
    }
}
