//! Node.js version reconciliation for Nixpacks builds

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

/// Node builds shipped by the pinned Nixpacks release, per major
const NIXPACKS_NODE_PINS: &[(u32, &str)] = &[
    (16, "16.20.2"),
    (18, "18.20.4"),
    (20, "20.15.1"),
    (22, "22.3.0"),
];

/// A requested Node.js version; minor and patch are absent when unspecified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeVersion {
    pub major: u32,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
}

impl NodeVersion {
    pub fn major(major: u32) -> Self {
        Self {
            major,
            minor: None,
            patch: None,
        }
    }

    /// Parse the first version number in a spec such as `v20.11.1`,
    /// `>=18.17` or `^20`
    pub fn parse(spec: &str) -> Option<Self> {
        let start = spec.find(|c: char| c.is_ascii_digit())?;
        let rest = &spec[start..];
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let mut parts = rest[..end].split('.').filter(|p| !p.is_empty());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok());
        let patch = parts.next().and_then(|p| p.parse().ok());
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// Exact version string when fully specified
    pub fn exact(&self) -> Option<String> {
        match (self.minor, self.patch) {
            (Some(minor), Some(patch)) => Some(format!("{}.{}.{}", self.major, minor, patch)),
            _ => None,
        }
    }

    fn cmp_specified(&self, other: &NodeVersion) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.unwrap_or(0).cmp(&other.minor.unwrap_or(0)))
            .then(self.patch.unwrap_or(0).cmp(&other.patch.unwrap_or(0)))
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
        }
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        Ok(())
    }
}

/// Minimum Node major implied by a framework dependency, given the major of
/// its version spec (`None` when unparseable, treated as newest)
fn framework_minimum(name: &str, major: Option<u32>) -> Option<u32> {
    let at_least = |threshold: u32| major.map(|m| m >= threshold).unwrap_or(true);
    match name {
        "next" => Some(if at_least(16) { 20 } else { 18 }),
        "vite" => Some(if at_least(7) { 20 } else { 18 }),
        "astro" => Some(18),
        "nuxt" => Some(20),
        "svelte" | "@sveltejs/kit" => Some(20),
        "@angular/core" => Some(20),
        _ => None,
    }
}

/// Highest minimum across known frameworks in dependencies and devDependencies
pub fn framework_requirement(package_json: &Value) -> Option<u32> {
    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|section| package_json.get(section).and_then(Value::as_object))
        .flat_map(|deps| deps.iter())
        .filter_map(|(name, spec)| {
            let major = spec
                .as_str()
                .and_then(NodeVersion::parse)
                .map(|v| v.major);
            framework_minimum(name, major)
        })
        .max()
}

/// Desired Node version: `.nvmrc`, then `engines.node`, then frameworks
pub fn resolve(nvmrc: Option<&str>, package_json: Option<&Value>) -> Option<NodeVersion> {
    if let Some(version) = nvmrc.and_then(NodeVersion::parse) {
        return Some(version);
    }
    let package_json = package_json?;
    if let Some(version) = package_json
        .get("engines")
        .and_then(|e| e.get("node"))
        .and_then(Value::as_str)
        .and_then(NodeVersion::parse)
    {
        return Some(version);
    }
    framework_requirement(package_json).map(NodeVersion::major)
}

/// Whether the Nixpacks Node build cannot satisfy `version`
pub fn needs_override(version: &NodeVersion) -> bool {
    let Some((_, pinned)) = NIXPACKS_NODE_PINS.iter().find(|(m, _)| *m == version.major) else {
        return true;
    };
    match NodeVersion::parse(pinned) {
        Some(pinned) => version.cmp_specified(&pinned) == Ordering::Greater,
        None => true,
    }
}

/// Dockerfile `RUN` replacing the Nix provided `node` binary with the
/// official build
pub fn install_instruction(version: &NodeVersion) -> String {
    let resolve = match version.exact() {
        Some(exact) => format!("NODE_VERSION=v{exact}"),
        None => format!(
            "NODE_VERSION=$(curl -fsSL https://nodejs.org/dist/latest-v{}.x/SHASUMS256.txt | grep -o 'node-v[0-9.]*' | head -n1 | cut -d- -f2)",
            version.major
        ),
    };
    format!(
        "RUN set -eux; {resolve}; \
case \"$(uname -m)\" in aarch64) NODE_ARCH=arm64 ;; *) NODE_ARCH=x64 ;; esac; \
curl -fsSL \"https://nodejs.org/dist/${{NODE_VERSION}}/node-${{NODE_VERSION}}-linux-${{NODE_ARCH}}.tar.gz\" | tar -xz -C /tmp; \
NODE_BIN=$(readlink -f \"$(command -v node)\"); \
cp \"/tmp/node-${{NODE_VERSION}}-linux-${{NODE_ARCH}}/bin/node\" \"$NODE_BIN\"; \
rm -rf \"/tmp/node-${{NODE_VERSION}}-linux-${{NODE_ARCH}}\"; node --version"
    )
}

/// Insert the install instruction after the Nix package installation,
/// or after the first `FROM` when there is none
pub fn patch_dockerfile(contents: &str, version: &NodeVersion) -> String {
    let lines: Vec<&str> = contents.lines().collect();
    let anchor = lines
        .iter()
        .position(|l| l.trim_start().starts_with("RUN nix-env"))
        .or_else(|| {
            lines
                .iter()
                .position(|l| l.trim_start().to_ascii_uppercase().starts_with("FROM "))
        });

    let instruction = install_instruction(version);
    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    match anchor {
        Some(index) => out.insert(index + 1, instruction),
        None => out.push(instruction),
    }

    let mut result = out.join("\n");
    if contents.ends_with('\n') {
        result.push('\n');
    }
    result
}
