// ── Singleton settings ──
//
// Services and subsystems with exactly one configuration object: read
// with `<ns>.config`, changed with `<ns>.update(diff)`. None of them can be
// created or deleted.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::ResourceKind;
use crate::dialect::Capabilities;
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, Diff};
use crate::reconcile::{Plan, Reconciler, Step, StepKind, Verb};
use crate::session::Session;

/// Plan for a settings object: one update carrying `diff`, or nothing.
fn update_plan(subject: &str, method: &str, kind: StepKind, row: &Value, diff: Diff) -> Plan {
    if diff.is_empty() {
        return Plan::unchanged(subject, Some(row));
    }
    let mut plan = Plan::new(subject);
    plan.act(Verb::Updated);
    let payload = Value::Object(diff.clone().into_iter().collect());
    plan.push_state(Step::new(method, kind, [payload.into()]));
    plan.with_diff(diff)
}

async fn read_config(session: &Session, method: &str) -> Result<Option<Value>, CoreError> {
    session.middleware().call(method, &[]).await.map(Some)
}

fn config_row<'a>(observed: Option<&'a Value>, method: &str) -> Result<&'a Value, CoreError> {
    observed.ok_or_else(|| CoreError::unexpected(method, "no configuration returned"))
}

// ── NFS service ──────────────────────────────────────────────────────

/// An NFS protocol version, accepting the spellings people write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, strum::IntoStaticStr)]
pub enum NfsProtocol {
    #[serde(rename = "NFSV3", alias = "nfsv3", alias = "NFSv3", alias = "v3", alias = "V3")]
    #[strum(serialize = "NFSV3")]
    V3,
    #[serde(rename = "NFSV4", alias = "nfsv4", alias = "NFSv4", alias = "v4", alias = "V4")]
    #[strum(serialize = "NFSV4")]
    V4,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct Nfs {
    pub servers: Option<u32>,
    pub udp: Option<bool>,
    pub allow_nonroot: Option<bool>,
    /// Shorthand for `protocols: [v3, v4]` (true) or `[v3]` (false).
    pub nfsv4: Option<bool>,
    pub protocols: Option<Vec<NfsProtocol>>,
    pub v3owner: Option<bool>,
    /// Sent as `v4_krb`.
    pub krb: Option<bool>,
    /// Sent as `v4_domain`.
    pub domain: Option<String>,
    pub bindip: Option<Vec<String>>,
    pub mountd_port: Option<u16>,
    pub rpcstatd_port: Option<u16>,
    pub rpclockd_port: Option<u16>,
    pub userd_manage_gids: Option<bool>,
    pub mountd_log: Option<bool>,
    pub statd_lockd_log: Option<bool>,
}

impl Nfs {
    fn wanted_protocols(&self) -> Option<BTreeSet<NfsProtocol>> {
        if let Some(list) = &self.protocols {
            return Some(list.iter().copied().collect());
        }
        self.nfsv4.map(|v4| {
            let mut set = BTreeSet::from([NfsProtocol::V3]);
            if v4 {
                set.insert(NfsProtocol::V4);
            }
            set
        })
    }

    /// Protocol change for `row`. A `protocols` list in the config marks
    /// the newer shape; older releases only have the `v4` flag, and NFSv3
    /// is always on there. When the config carries neither, the dialect
    /// decides.
    fn protocol_change(&self, caps: Capabilities, row: &Value) -> Option<(&'static str, Value)> {
        let mut want = self.wanted_protocols()?;
        let list_shape = if row.get("protocols").is_some_and(Value::is_array) {
            true
        } else if row.get("v4").is_some() {
            false
        } else {
            caps.nfs_protocols_list
        };
        if !list_shape {
            want.insert(NfsProtocol::V3);
        }

        let have: BTreeSet<&str> = match row.get("v4").and_then(Value::as_bool) {
            Some(true) => BTreeSet::from(["NFSV3", "NFSV4"]),
            Some(false) => BTreeSet::from(["NFSV3"]),
            None => row
                .get("protocols")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect(),
        };
        let want_names: BTreeSet<&str> = want.iter().map(|p| <&str>::from(*p)).collect();
        if have == want_names {
            return None;
        }
        if list_shape {
            Some(("protocols", json!(want_names)))
        } else {
            Some(("v4", json!(want.contains(&NfsProtocol::V4))))
        }
    }

    fn plan_with(&self, caps: Capabilities, row: &Value) -> Plan {
        let mut changes = Changes::against(row);
        changes
            .scalar("servers", self.servers)
            .scalar("udp", self.udp)
            .scalar("allow_nonroot", self.allow_nonroot)
            .scalar("v4_v3owner", self.v3owner)
            .scalar("v4_krb", self.krb)
            .scalar("v4_domain", self.domain.as_deref())
            .set("bindip", self.bindip.as_deref())
            .scalar("mountd_port", self.mountd_port)
            .scalar("rpcstatd_port", self.rpcstatd_port)
            .scalar("rpclockd_port", self.rpclockd_port)
            .scalar("userd_manage_gids", self.userd_manage_gids)
            .scalar("mountd_log", self.mountd_log)
            .scalar("statd_lockd_log", self.statd_lockd_log);
        if let Some((field, value)) = self.protocol_change(caps, row) {
            changes.insert(field, value);
        }
        update_plan("NFS service", "nfs.update", StepKind::Call, row, changes.into_diff())
    }
}

#[async_trait]
impl Reconciler for Nfs {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Nfs
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.nfsv4.is_some() && self.protocols.is_some() {
            return Err(CoreError::validation("nfsv4 and protocols are mutually exclusive"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        read_config(session, "nfs.config").await
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let row = config_row(observed, "nfs.config")?;
        Ok(self.plan_with(session.capabilities().await?, row))
    }
}

// ── Mail ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MailSecurity {
    Plain,
    Ssl,
    Tls,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mail {
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    /// Outgoing SMTP server.
    pub server: Option<String>,
    pub port: Option<u16>,
    pub security: Option<MailSecurity>,
    /// Authenticate to the server.
    pub smtp: Option<bool>,
    pub smtp_user: Option<String>,
    #[serde(alias = "password")]
    pub smtp_password: Option<String>,
    pub oauth_id: Option<String>,
    pub oauth_secret: Option<String>,
    pub oauth_token: Option<String>,
}

impl Mail {
    fn oauth_change(&self, row: &Value) -> Option<Value> {
        let current = row.get("oauth");
        let mut oauth = Map::new();
        for (field, want) in [
            ("client_id", &self.oauth_id),
            ("client_secret", &self.oauth_secret),
            ("refresh_token", &self.oauth_token),
        ] {
            let Some(want) = want else { continue };
            let have = current.and_then(|o| o.get(field)).and_then(Value::as_str);
            if have != Some(want.as_str()) {
                oauth.insert(field.into(), json!(want));
            }
        }
        (!oauth.is_empty()).then_some(Value::Object(oauth))
    }

    fn plan_with(&self, row: &Value) -> Plan {
        let mut changes = Changes::against(row);
        changes
            .scalar("fromname", self.from_name.as_deref())
            .scalar("fromemail", self.from_email.as_deref())
            .scalar("outgoingserver", self.server.as_deref())
            .scalar("port", self.port)
            .scalar("security", self.security.map(<&str>::from))
            .scalar("smtp", self.smtp)
            .scalar("user", self.smtp_user.as_deref())
            .scalar("pass", self.smtp_password.as_deref());
        if let Some(oauth) = self.oauth_change(row) {
            changes.insert("oauth", oauth);
        }
        update_plan("mail settings", "mail.update", StepKind::Call, row, changes.into_diff())
    }
}

#[async_trait]
impl Reconciler for Mail {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Mail
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        read_config(session, "mail.config").await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        Ok(self.plan_with(config_row(observed, "mail.config")?))
    }
}

// ── S.M.A.R.T. ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PowerMode {
    Never,
    Sleep,
    Standby,
    Idle,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Smart {
    /// Minutes between checks.
    pub interval: Option<u32>,
    pub power_mode: Option<PowerMode>,
    pub temp_difference: Option<u32>,
    pub temp_info: Option<u32>,
    pub temp_crit: Option<u32>,
}

impl Smart {
    fn plan_with(&self, row: &Value) -> Plan {
        let mut changes = Changes::against(row);
        changes
            .scalar("interval", self.interval)
            .ci("powermode", self.power_mode.map(<&str>::from))
            .scalar("difference", self.temp_difference)
            .scalar("informational", self.temp_info)
            .scalar("critical", self.temp_crit);
        update_plan("S.M.A.R.T. settings", "smart.update", StepKind::Call, row, changes.into_diff())
    }
}

#[async_trait]
impl Reconciler for Smart {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Smart
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        read_config(session, "smart.config").await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        Ok(self.plan_with(config_row(observed, "smart.config")?))
    }
}

// ── System dataset ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemDataset {
    pub pool: Option<String>,
    pub syslog: Option<bool>,
}

impl SystemDataset {
    fn plan_with(&self, row: &Value) -> Plan {
        let mut changes = Changes::against(row);
        changes
            .scalar("pool", self.pool.as_deref())
            .scalar("syslog", self.syslog);
        update_plan(
            "system dataset",
            "systemdataset.update",
            StepKind::Job,
            row,
            changes.into_diff(),
        )
    }
}

#[async_trait]
impl Reconciler for SystemDataset {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Systemdataset
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        read_config(session, "systemdataset.config").await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        Ok(self.plan_with(config_row(observed, "systemdataset.config")?))
    }
}

// ── Hostname ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hostname {
    #[serde(alias = "hostname")]
    pub name: String,
}

impl Hostname {
    fn plan_with(&self, row: &Value) -> Plan {
        let mut changes = Changes::against(row);
        changes.scalar("hostname", Some(self.name.as_str()));
        update_plan(
            "hostname",
            "network.configuration.update",
            StepKind::Call,
            row,
            changes.into_diff(),
        )
    }
}

#[async_trait]
impl Reconciler for Hostname {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Hostname
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("hostname must not be empty"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        read_config(session, "network.configuration.config").await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        Ok(self.plan_with(config_row(observed, "network.configuration.config")?))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn spec<T: serde::de::DeserializeOwned>(v: Value) -> T {
        serde_json::from_value(v).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn nfs_protocol_list_shape() {
        let row = json!({"servers": 4, "protocols": ["NFSV3"], "bindip": []});
        let nfs: Nfs = spec(json!({"protocols": ["v4", "nfsv3"], "servers": 4}));
        let plan = nfs.plan_with(Capabilities::default(), &row);
        assert_eq!(plan.diff.get("protocols"), Some(&json!(["NFSV3", "NFSV4"])));
        assert_eq!(plan.diff.len(), 1);
    }

    #[test]
    fn nfs_v4_flag_shape() {
        let row = json!({"v4": false, "servers": 4});
        let nfs: Nfs = spec(json!({"nfsv4": true}));
        assert_eq!(nfs.plan_with(Capabilities::default(), &row).diff.get("v4"), Some(&json!(true)));

        let on = json!({"v4": true});
        let nfs: Nfs = spec(json!({"protocols": ["NFSv4"]}));
        assert!(nfs.plan_with(Capabilities::default(), &on).is_noop());
    }

    #[test]
    fn nfs_shape_falls_back_to_dialect() {
        let row = json!({"servers": 4});
        let nfs: Nfs = spec(json!({"nfsv4": true}));

        let scale = Capabilities {
            nfs_protocols_list: true,
            ..Capabilities::default()
        };
        let plan = nfs.plan_with(scale, &row);
        assert_eq!(plan.diff.get("protocols"), Some(&json!(["NFSV3", "NFSV4"])));

        let plan = nfs.plan_with(Capabilities::default(), &row);
        assert_eq!(plan.diff.get("v4"), Some(&json!(true)));
        assert!(!plan.diff.contains_key("protocols"));
    }

    #[test]
    fn nfs_flag_and_list_conflict() {
        let nfs: Nfs = spec(json!({"nfsv4": true, "protocols": ["v3"]}));
        assert!(nfs.validate().is_err());
    }

    #[test]
    fn mail_oauth_only_changed_parts() {
        let row = json!({
            "fromemail": "nas@example.com", "port": 587, "security": "TLS",
            "oauth": {"client_id": "abc", "client_secret": "s1"}
        });
        let mail: Mail = spec(json!({
            "from_email": "nas@example.com", "port": 587, "security": "TLS",
            "oauth_id": "abc", "oauth_secret": "s2"
        }));
        let plan = mail.plan_with(&row);
        assert_eq!(plan.steps[0].preview(), json!([{"oauth": {"client_secret": "s2"}}]));
    }

    #[test]
    fn smart_power_mode_case() {
        let row = json!({"interval": 30, "powermode": "NEVER"});
        let smart: Smart = spec(json!({"power_mode": "never", "interval": 30}));
        assert!(smart.plan_with(&row).is_noop());

        let smart: Smart = spec(json!({"power_mode": "standby"}));
        assert_eq!(smart.plan_with(&row).diff.get("powermode"), Some(&json!("STANDBY")));
    }

    #[test]
    fn system_dataset_moves_with_a_job() {
        let row = json!({"pool": "boot-pool", "syslog": true});
        let sd: SystemDataset = spec(json!({"pool": "tank"}));
        let plan = sd.plan_with(&row);
        assert_eq!(plan.steps[0].kind, StepKind::Job);
        assert_eq!(plan.steps[0].preview(), json!([{"pool": "tank"}]));
    }

    #[test]
    fn hostname_change() {
        let row = json!({"hostname": "truenas", "domain": "local"});
        let h: Hostname = spec(json!({"name": "nas01"}));
        let plan = h.plan_with(&row);
        assert_eq!(plan.steps[0].method, "network.configuration.update");
        assert_eq!(plan.message(true), "Would have updated hostname");
        assert!(Hostname { name: "truenas".into() }.plan_with(&row).is_noop());
    }
}
