use std::{collections::HashSet, env, net::IpAddr, str::FromStr, time::Duration};
use tracing::warn;

// Runtime/server constants and environment-driven settings.

pub const DEFAULT_WEB_SOCKET_PORT: u16 = 3002;
pub const DEFAULT_TCP_PORT: u16 = 3001;
pub const DEFAULT_TARGET_FPS: u32 = 24;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 4;
pub const DEFAULT_DEMO_SHUTDOWN: Duration = Duration::from_secs(10);
pub const DEFAULT_TICK_BUDGET: u64 = 5000;

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_host: IpAddr,
    pub web_socket_port: u16,
    pub tcp_port: u16,
    pub target_fps: u32,
    // Capacity of each broker's broadcast queue and of the shared response queue.
    pub queue_capacity: usize,
    pub client_queue_capacity: usize,
    pub one_browser_per_ip: bool,
    pub trusted_browser_ips: HashSet<IpAddr>,
    // None disables the timed shutdown.
    pub demo_shutdown_after: Option<Duration>,
    // None lets the tick loop run until the brokers quit.
    pub tick_budget: Option<u64>,
    pub log_commands: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::from([127, 0, 0, 1]),
            web_socket_port: DEFAULT_WEB_SOCKET_PORT,
            tcp_port: DEFAULT_TCP_PORT,
            target_fps: DEFAULT_TARGET_FPS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            one_browser_per_ip: false,
            trusted_browser_ips: HashSet::new(),
            demo_shutdown_after: Some(DEFAULT_DEMO_SHUTDOWN),
            tick_budget: Some(DEFAULT_TICK_BUDGET),
            log_commands: false,
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let demo_secs = env_or(
            "DEMO_SHUTDOWN_SECS",
            defaults.demo_shutdown_after.map_or(0, |d| d.as_secs()),
        );
        let tick_budget = env_or("TICK_BUDGET", defaults.tick_budget.unwrap_or(0));

        Self {
            bind_host: env_or("BIND_HOST", defaults.bind_host),
            web_socket_port: env_or("WEB_SOCKET_PORT", defaults.web_socket_port),
            tcp_port: env_or("TCP_PORT", defaults.tcp_port),
            target_fps: env_or("TARGET_FPS", defaults.target_fps),
            queue_capacity: env_or("QUEUE_CAPACITY", defaults.queue_capacity),
            client_queue_capacity: env_or("CLIENT_QUEUE_CAPACITY", defaults.client_queue_capacity),
            one_browser_per_ip: env_flag("ONE_BROWSER_PER_IP", defaults.one_browser_per_ip),
            trusted_browser_ips: env::var("TRUSTED_BROWSER_IPS")
                .map(|raw| parse_ip_list(&raw))
                .unwrap_or_default(),
            // Zero disables both limits.
            demo_shutdown_after: (demo_secs > 0).then(|| Duration::from_secs(demo_secs)),
            tick_budget: (tick_budget > 0).then_some(tick_budget),
            log_commands: env_flag("COMMAND_LOG", defaults.log_commands),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "invalid setting; using default");
            default
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    parse_flag(&raw).unwrap_or_else(|| {
        warn!(key, value = %raw, "invalid flag; using default");
        default
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_ip_list(raw: &str) -> HashSet<IpAddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(value = part, "ignoring invalid trusted ip");
                None
            }
        })
        .collect()
}
