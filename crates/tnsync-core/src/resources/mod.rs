// ── Resource reconcilers ──
//
// One module per resource type. Each desired spec is a serde struct that
// implements `Reconciler`; `ResourceKind::reconciler` turns caller input
// into the right one.

pub mod app;
pub mod certificate;
pub mod filesystem;
pub mod filesystem_acl;
pub mod group;
pub mod initscript;
pub mod jail;
pub mod jail_fstab;
pub mod plugin;
pub mod pool_scrub_task;
pub mod pool_snapshot_task;
pub mod schedule;
pub mod service;
pub mod settings;
pub mod sharing_nfs;
pub mod sharing_smb;
pub mod smart_test_task;
pub mod user;

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::reconcile::Reconciler;

/// Every resource type tnsync can reconcile.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceKind {
    Certificate,
    CertificateAuthority,
    Filesystem,
    FilesystemAcl,
    Group,
    User,
    Jail,
    JailFstab,
    Jails,
    Plugin,
    SharingNfs,
    SharingSmb,
    Service,
    Nfs,
    Mail,
    Smart,
    SmartTestTask,
    PoolScrubTask,
    PoolSnapshotTask,
    Systemdataset,
    Hostname,
    Initscript,
    App,
}

impl ResourceKind {
    /// Parse `sharing-nfs` or `sharing_nfs`.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        Self::from_str(&name.trim().replace('_', "-"))
            .map_err(|_| CoreError::validation(format!("unknown resource type {name:?}")))
    }

    /// Deserialize `params` into this kind's desired spec.
    pub fn reconciler(self, params: Value) -> Result<Box<dyn Reconciler>, CoreError> {
        match self {
            Self::Certificate => build::<certificate::Certificate>(self, params),
            Self::CertificateAuthority => build::<certificate::CertificateAuthority>(self, params),
            Self::Filesystem => build::<filesystem::Filesystem>(self, params),
            Self::FilesystemAcl => build::<filesystem_acl::FilesystemAcl>(self, params),
            Self::Group => build::<group::Group>(self, params),
            Self::User => build::<user::User>(self, params),
            Self::Jail => build::<jail::Jail>(self, params),
            Self::JailFstab => build::<jail_fstab::JailFstab>(self, params),
            Self::Jails => build::<jail::Jails>(self, params),
            Self::Plugin => build::<plugin::Plugin>(self, params),
            Self::SharingNfs => build::<sharing_nfs::SharingNfs>(self, params),
            Self::SharingSmb => build::<sharing_smb::SharingSmb>(self, params),
            Self::Service => build::<service::Service>(self, params),
            Self::Nfs => build::<settings::Nfs>(self, params),
            Self::Mail => build::<settings::Mail>(self, params),
            Self::Smart => build::<settings::Smart>(self, params),
            Self::SmartTestTask => build::<smart_test_task::SmartTestTask>(self, params),
            Self::PoolScrubTask => build::<pool_scrub_task::PoolScrubTask>(self, params),
            Self::PoolSnapshotTask => build::<pool_snapshot_task::PoolSnapshotTask>(self, params),
            Self::Systemdataset => build::<settings::SystemDataset>(self, params),
            Self::Hostname => build::<settings::Hostname>(self, params),
            Self::Initscript => build::<initscript::Initscript>(self, params),
            Self::App => build::<app::App>(self, params),
        }
    }
}

fn build<T>(kind: ResourceKind, params: Value) -> Result<Box<dyn Reconciler>, CoreError>
where
    T: Reconciler + DeserializeOwned + 'static,
{
    let spec: T = serde_json::from_value(params)
        .map_err(|e| CoreError::validation(format!("{kind}: {e}")))?;
    Ok(Box::new(spec))
}

// ── Shared spec pieces ───────────────────────────────────────────────

/// `state: present | absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// The `id` field of a row returned by `method`.
pub(crate) fn row_id(method: &str, row: &Value) -> Result<Value, CoreError> {
    row.get("id")
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| CoreError::unexpected(method, "row has no id"))
}

// ── Tests ────────────────────────────────────────────────────────────
