// Imported certificates and certificate authorities
//
// Both are keyed by name and can only be imported, revoked, or deleted.
// Certificates are created and deleted through jobs; CAs through plain
// calls. Revoking a freshly imported entry is a second step that uses the
// id returned by the create.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Presence, ResourceKind, row_id};
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, put};
use crate::reconcile::{Arg, Plan, Reconciler, Step, StepKind, Verb};
use crate::session::Session;

/// Desired imported certificate or CA.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateSpec {
    pub name: String,
    #[serde(default)]
    pub state: Presence,
    /// PEM text of the certificate.
    #[serde(alias = "ca", alias = "cert", alias = "ca_cert")]
    pub certificate: Option<String>,
    /// PEM text of the private key.
    pub private_key: Option<String>,
    /// Passphrase for the private key (CAs only).
    pub passphrase: Option<String>,
    pub revoked: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Certificate,
    Authority,
}

impl Flavor {
    fn namespace(self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::Authority => "certificateauthority",
        }
    }

    fn create_type(self) -> &'static str {
        match self {
            Self::Certificate => "CERTIFICATE_CREATE_IMPORTED",
            Self::Authority => "CA_CREATE_IMPORTED",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::Authority => "CA",
        }
    }

    fn method(self, verb: &str) -> String {
        format!("{}.{verb}", self.namespace())
    }

    /// Certificates go through the job queue; CAs do not.
    fn mutation_kind(self) -> StepKind {
        match self {
            Self::Certificate => StepKind::Job,
            Self::Authority => StepKind::Call,
        }
    }
}

impl CertificateSpec {
    fn validate(&self, flavor: Flavor) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        if flavor == Flavor::Certificate && self.passphrase.is_some() {
            return Err(CoreError::validation(
                "passphrase is only supported for certificate authorities",
            ));
        }
        if self.state == Presence::Present && self.certificate.is_none() && self.revoked.is_none() {
            return Err(CoreError::validation(
                "state=present requires one of certificate, src or revoked",
            ));
        }
        Ok(())
    }

    async fn observe(&self, flavor: Flavor, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one(&flavor.method("query"), "name", self.name.as_str())
            .await
    }

    fn plan(&self, flavor: Flavor, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let subject = format!("{} {}", flavor.label(), self.name);

        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(subject, None)),

            (None, Presence::Present) => {
                let mut payload = Map::new();
                payload.insert("name".into(), json!(self.name));
                payload.insert("create_type".into(), json!(flavor.create_type()));
                put(&mut payload, "certificate", self.certificate.clone());
                put(&mut payload, "privatekey", self.private_key.clone());
                put(&mut payload, "passphrase", self.passphrase.clone());

                let mut plan = Plan::new(subject);
                plan.act(Verb::Created);
                let create = plan.push_state(Step::new(
                    &flavor.method("create"),
                    flavor.mutation_kind(),
                    [Arg::Value(Value::Object(payload.clone()))],
                ));

                if self.revoked == Some(true) {
                    plan.act_on(Verb::Updated, format!("{} {} (revoked)", flavor.label(), self.name));
                    plan.push_state(Step::new(
                        &flavor.method("update"),
                        StepKind::Call,
                        [Arg::from_step(create, "/id"), Arg::Value(json!({"revoked": true}))],
                    ));
                }
                Ok(plan.with_diff(payload.into_iter().collect()))
            }

            (Some(row), Presence::Present) => {
                let mut changes = Changes::against(row);
                changes.scalar("revoked", self.revoked);
                if changes.is_empty() {
                    return Ok(Plan::unchanged(subject, Some(row)));
                }
                let diff = changes.into_diff();
                let id = row_id(&flavor.method("query"), row)?;

                let mut plan = Plan::new(subject);
                plan.act(Verb::Updated);
                plan.push_state(Step::call(
                    &flavor.method("update"),
                    [id, Value::Object(diff.clone().into_iter().collect())],
                ));
                Ok(plan.with_diff(diff))
            }

            (Some(row), Presence::Absent) => {
                let id = row_id(&flavor.method("query"), row)?;
                let mut plan = Plan::new(subject);
                plan.act(Verb::Deleted);
                plan.push(Step::new(
                    &flavor.method("delete"),
                    flavor.mutation_kind(),
                    [Arg::Value(id)],
                ));
                Ok(plan)
            }
        }
    }
}

// ── Reconcilers ──────────────────────────────────────────────────────

/// `certificate`: imported TLS certificate.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Certificate(pub CertificateSpec);

/// `certificate-authority`: imported CA.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct CertificateAuthority(pub CertificateSpec);

#[async_trait]
impl Reconciler for Certificate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Certificate
    }

    fn validate(&self) -> Result<(), CoreError> {
        self.0.validate(Flavor::Certificate)
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        self.0.observe(Flavor::Certificate, session).await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        self.0.plan(Flavor::Certificate, observed)
    }
}

#[async_trait]
impl Reconciler for CertificateAuthority {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CertificateAuthority
    }

    fn validate(&self) -> Result<(), CoreError> {
        self.0.validate(Flavor::Authority)
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        self.0.observe(Flavor::Authority, session).await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        self.0.plan(Flavor::Authority, observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
