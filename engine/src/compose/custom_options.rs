//! Custom `docker run` options translated to compose keys

use serde_yaml::{Mapping, Value};
use tracing::debug;

/// Compose fragment parsed from a custom `docker run` option string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomOptions {
    /// Service level keys, deep-merged into the generated service
    pub fragment: Mapping,
    pub ip: Option<String>,
    pub ip6: Option<String>,
}

impl CustomOptions {
    pub fn requests_static_ip(&self) -> bool {
        self.ip.is_some() || self.ip6.is_some()
    }
}

/// Whether the options pin a static container address, which rules out
/// starting a second container next to the running one
pub fn requests_static_ip(raw: &str) -> bool {
    parse(raw).requests_static_ip()
}

/// Split a command line into words, honouring single and double quotes
pub fn tokenize(raw: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn push_to_list(fragment: &mut Mapping, name: &str, value: &str) {
    let entry = fragment
        .entry(key(name))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if let Value::Sequence(items) = entry {
        let value = Value::String(value.to_string());
        if !items.contains(&value) {
            items.push(value);
        }
    }
}

fn insert_in_map(fragment: &mut Mapping, name: &str, map_key: &str, value: Value) {
    let entry = fragment
        .entry(key(name))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if let Value::Mapping(map) = entry {
        map.insert(key(map_key), value);
    }
}

fn ulimit_value(limits: &str) -> Value {
    let number = |s: &str| {
        s.parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(s.to_string()))
    };
    match limits.split_once(':') {
        Some((soft, hard)) => {
            let mut map = Mapping::new();
            map.insert(key("soft"), number(soft));
            map.insert(key("hard"), number(hard));
            Value::Mapping(map)
        }
        None => number(limits),
    }
}

fn gpu_reservation(value: &str) -> Value {
    let mut device = Mapping::new();
    device.insert(key("driver"), key("nvidia"));
    device.insert(key("capabilities"), Value::Sequence(vec![key("gpu")]));
    match value.strip_prefix("device=") {
        Some(ids) => {
            let ids = ids
                .trim_matches('"')
                .split(',')
                .map(|id| key(id.trim()))
                .collect();
            device.insert(key("device_ids"), Value::Sequence(ids));
        }
        None => {
            let count = value
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| key(value));
            device.insert(key("count"), count);
        }
    }

    let mut reservations = Mapping::new();
    reservations.insert(key("devices"), Value::Sequence(vec![Value::Mapping(device)]));
    let mut resources = Mapping::new();
    resources.insert(key("reservations"), Value::Mapping(reservations));
    let mut deploy = Mapping::new();
    deploy.insert(key("resources"), Value::Mapping(resources));
    Value::Mapping(deploy)
}

/// Flags taking no value
const SWITCHES: &[&str] = &["--init", "--privileged"];

/// Parse an option string such as `--cap-add SYS_ADMIN --init --ip 10.0.0.5`
pub fn parse(raw: &str) -> CustomOptions {
    let mut options = CustomOptions::default();
    let words = tokenize(raw);
    let mut i = 0;

    while i < words.len() {
        let word = &words[i];
        i += 1;

        let (flag, inline) = match word.split_once('=') {
            Some((flag, value)) if flag.starts_with('-') => (flag.to_string(), Some(value.to_string())),
            _ => (word.clone(), None),
        };
        if !flag.starts_with('-') {
            debug!("Ignoring stray docker run argument {}", flag);
            continue;
        }
        if SWITCHES.contains(&flag.as_str()) {
            let enabled = inline.as_deref().map(|v| v != "false").unwrap_or(true);
            options
                .fragment
                .insert(key(flag.trim_start_matches('-')), Value::Bool(enabled));
            continue;
        }

        let value = match inline {
            Some(value) => value,
            None => match words.get(i) {
                Some(next) if !next.starts_with("--") => {
                    i += 1;
                    next.clone()
                }
                _ => {
                    debug!("Docker run option {} has no value", flag);
                    continue;
                }
            },
        };

        let fragment = &mut options.fragment;
        match flag.as_str() {
            "--cap-add" => push_to_list(fragment, "cap_add", &value),
            "--cap-drop" => push_to_list(fragment, "cap_drop", &value),
            "--security-opt" => push_to_list(fragment, "security_opt", &value),
            "--device" => push_to_list(fragment, "devices", &value),
            "--add-host" => push_to_list(fragment, "extra_hosts", &value),
            "--dns" => push_to_list(fragment, "dns", &value),
            "--tmpfs" => push_to_list(fragment, "tmpfs", &value),
            "--group-add" => push_to_list(fragment, "group_add", &value),
            "--sysctl" => {
                if let Some((name, setting)) = value.split_once('=') {
                    insert_in_map(fragment, "sysctls", name, key(setting));
                }
            }
            "--ulimit" => {
                if let Some((name, limits)) = value.split_once('=') {
                    insert_in_map(fragment, "ulimits", name, ulimit_value(limits));
                }
            }
            "--shm-size" => {
                fragment.insert(key("shm_size"), key(&value));
            }
            "--hostname" | "-h" => {
                fragment.insert(key("hostname"), key(&value));
            }
            "--entrypoint" => {
                fragment.insert(key("entrypoint"), key(&value));
            }
            "--mac-address" => {
                fragment.insert(key("mac_address"), key(&value));
            }
            "--pid" => {
                fragment.insert(key("pid"), key(&value));
            }
            "--gpus" => {
                fragment.insert(key("deploy"), gpu_reservation(&value));
            }
            "--ip" => options.ip = Some(value),
            "--ip6" => options.ip6 = Some(value),
            other => debug!("Unsupported docker run option {}", other),
        }
    }
    options
}
