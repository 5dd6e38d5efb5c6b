// ── Dialect detection ──
//
// middlewared changed the shape of a few calls over the years (sudo fields
// on users, NFS share paths and protocol flags, duplicate gids, dataset
// ancestors). The product name, type and version are read once per session
// and every such branch is answered by `Capabilities`.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

/// A parsed product version such as `13.0-U5` or `24.10.2`.
///
/// Only the leading dotted numeric components are compared; suffixes like
/// `-U5` or `-RC.1` are ignored. A version with no numeric part compares
/// false against everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<u64>>,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        let mut parts = Vec::new();
        let numeric = raw
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .next()
            .unwrap_or_default();
        for piece in numeric.split('.') {
            match piece.parse::<u64>() {
                Ok(n) => parts.push(n),
                Err(_) => break,
            }
        }
        Self {
            raw: raw.to_owned(),
            parts: (!parts.is_empty()).then_some(parts),
        }
    }

    fn compare(&self, other: &[u64]) -> Option<Ordering> {
        let parts = self.parts.as_ref()?;
        let len = parts.len().max(other.len());
        let pad = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
        Some(
            (0..len)
                .map(|i| pad(parts, i).cmp(&pad(other, i)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal),
        )
    }

    /// `self >= other`; false when unparseable.
    pub fn at_least(&self, other: &[u64]) -> bool {
        matches!(self.compare(other), Some(Ordering::Greater | Ordering::Equal))
    }

    /// `self < other`; false when unparseable.
    pub fn below(&self, other: &[u64]) -> bool {
        matches!(self.compare(other), Some(Ordering::Less))
    }

    /// `low <= self < high`.
    pub fn within(&self, low: &[u64], high: &[u64]) -> bool {
        self.at_least(low) && self.below(high)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Product identity as reported by `system.product_name`,
/// `system.product_type` and `system.version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dialect {
    pub product_name: String,
    pub product_type: String,
    pub version: Version,
}

impl Dialect {
    /// Build from raw strings, stripping `<name>-` and `<type>-` prefixes
    /// from the version (`TrueNAS-SCALE-24.10.2` becomes `24.10.2`).
    pub fn from_parts(product_name: &str, product_type: &str, sys_version: &str) -> Self {
        let mut rest = sys_version.trim();
        if let Some(stripped) = rest.strip_prefix(product_name).and_then(|r| r.strip_prefix('-')) {
            rest = stripped;
        }
        if let Some(stripped) = rest.strip_prefix(product_type).and_then(|r| r.strip_prefix('-')) {
            rest = stripped;
        }
        Self {
            product_name: product_name.to_owned(),
            product_type: product_type.to_owned(),
            version: Version::parse(rest),
        }
    }

    pub fn is_core(&self) -> bool {
        self.product_type.eq_ignore_ascii_case("CORE")
    }

    pub fn is_scale(&self) -> bool {
        self.product_type.eq_ignore_ascii_case("SCALE")
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from(self)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.product_name, self.product_type, self.version)
    }
}

// ── Capabilities ─────────────────────────────────────────────────────

/// Dialect flags derived once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Users take `sudo_commands` / `sudo_commands_nopasswd` lists instead
    /// of the `sudo` / `sudo_nopasswd` booleans.
    pub new_sudo_api: bool,
    /// `group.create` / `group.update` accept `allow_duplicate_gid`
    /// (dropped in 25.04).
    pub allow_duplicate_gid: bool,
    /// `pool.dataset.create` accepts `create_ancestors`.
    pub create_ancestors: bool,
    /// NFS shares carry `paths: [..]` rather than a single `path`.
    pub nfs_share_paths_list: bool,
    /// `nfs.config` uses a `protocols` list rather than the `v4` flag.
    pub nfs_protocols_list: bool,
}

impl From<&Dialect> for Capabilities {
    fn from(d: &Dialect) -> Self {
        let v = &d.version;
        let truenas = d.product_name == "TrueNAS";
        let scale = d.is_scale();

        let new_sudo_api = (truenas && scale && v.within(&[12, 12], &[13]))
            || v.within(&[22, 12, 1], &[23])
            || v.at_least(&[23, 10]);

        let community = d.product_type.eq_ignore_ascii_case("COMMUNITY_EDITION");
        let allow_duplicate_gid = !(truenas && (scale || community) && v.at_least(&[25, 4]));

        Self {
            new_sudo_api,
            allow_duplicate_gid,
            create_ancestors: !d.is_core(),
            nfs_share_paths_list: d.is_core(),
            nfs_protocols_list: !d.is_core() && v.at_least(&[22, 12]),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
