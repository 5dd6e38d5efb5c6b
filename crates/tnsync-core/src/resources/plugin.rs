// ── iocage plugins ──
//
// A plugin is a jail created from a plugin repository. Only creation and
// removal are managed. Creating one needs the repository URL and plugin id;
// either may be given directly or looked up by name, and with neither
// repository given every official repository is searched.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{Presence, ResourceKind, row_id};
use crate::error::CoreError;
use crate::middleware::Middleware;
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plugin {
    /// Jail name of the plugin instance.
    pub name: String,
    /// Package name in the repository (`plexmediaserver`).
    pub plugin: Option<String>,
    pub plugin_id: Option<String>,
    /// Repository display name.
    pub repository: Option<String>,
    pub repository_url: Option<String>,
    /// Start the plugin at boot.
    pub enabled: Option<bool>,
    #[serde(default)]
    pub state: Presence,
}

/// Where a plugin comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Source {
    repository_url: String,
    plugin_id: String,
}

fn repositories(listing: &Value) -> Vec<(&str, &str)> {
    listing
        .as_object()
        .map(|repos| {
            repos
                .values()
                .filter_map(|r| {
                    Some((
                        r.get("name")?.as_str()?,
                        r.get("git_repository")?.as_str()?,
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl Plugin {
    fn subject(&self) -> String {
        format!("plugin {}", self.name)
    }

    fn wanted(&self) -> &str {
        self.plugin_id
            .as_deref()
            .or(self.plugin.as_deref())
            .unwrap_or_default()
    }

    /// Whether an entry of `plugin.available` is the requested package.
    fn matches(&self, pkg: &Value) -> bool {
        let field = |f: &str| pkg.get(f).and_then(Value::as_str);
        match &self.plugin_id {
            Some(id) => field("plugin") == Some(id.as_str()),
            None => field("name") == self.plugin.as_deref(),
        }
    }

    async fn find_in(&self, mw: &Middleware, repository_url: &str) -> Result<Option<String>, CoreError> {
        debug!(repository_url, plugin = self.wanted(), "searching plugin repository");
        let pkgs = mw
            .job("plugin.available", &[json!({"plugin_repository": repository_url})])
            .await?;
        Ok(pkgs
            .as_array()
            .into_iter()
            .flatten()
            .find(|pkg| self.matches(pkg))
            .and_then(|pkg| pkg.get("plugin").and_then(Value::as_str))
            .map(str::to_owned))
    }

    async fn resolve(&self, mw: &Middleware) -> Result<Source, CoreError> {
        if let (Some(url), Some(id)) = (&self.repository_url, &self.plugin_id) {
            return Ok(Source {
                repository_url: url.clone(),
                plugin_id: id.clone(),
            });
        }

        let repository_url = if let Some(url) = &self.repository_url {
            url.clone()
        } else if let Some(name) = &self.repository {
            let listing = mw.call("plugin.official_repositories", &[]).await?;
            repositories(&listing)
                .into_iter()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, url)| url.to_owned())
                .ok_or_else(|| CoreError::not_found("plugin repository", name.as_str()))?
        } else {
            let listing = mw.call("plugin.official_repositories", &[]).await?;
            for (_, url) in repositories(&listing) {
                if let Some(plugin_id) = self.find_in(mw, url).await? {
                    return Ok(Source {
                        repository_url: url.to_owned(),
                        plugin_id,
                    });
                }
            }
            return Err(CoreError::not_found("plugin package in any repository", self.wanted()));
        };
        let plugin_id = match &self.plugin_id {
            Some(id) => id.clone(),
            None => self
                .find_in(mw, &repository_url)
                .await?
                .ok_or_else(|| CoreError::not_found("plugin package", self.wanted()))?,
        };
        Ok(Source {
            repository_url,
            plugin_id,
        })
    }

    fn create_plan(&self, source: &Source) -> Plan {
        let mut payload = Map::new();
        payload.insert("jail_name".into(), json!(self.name));
        payload.insert("plugin_repository".into(), json!(source.repository_url));
        payload.insert("plugin_name".into(), json!(source.plugin_id));
        if let Some(enabled) = self.enabled {
            let boot = if enabled { "yes" } else { "no" };
            payload.insert("props".into(), json!([format!("boot={boot}")]));
        }

        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Created);
        plan.push_state(Step::job("plugin.create", [Value::Object(payload.clone())]));
        plan.with_diff(payload.into_iter().collect())
    }

    fn delete_plan(&self, row: &Value) -> Result<Plan, CoreError> {
        let id = row_id("plugin.query", row)?;
        let mut plan = Plan::new(self.subject());
        if row.get("jid").is_some_and(|j| !j.is_null()) {
            plan.act_on(Verb::Stopped, format!("jail {}", self.name));
            plan.push(Step::job("jail.stop", [json!(self.name)]));
        }
        plan.act(Verb::Deleted);
        plan.push(Step::call("plugin.delete", [id]));
        Ok(plan)
    }
}

#[async_trait]
impl Reconciler for Plugin {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Plugin
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.plugin.is_none() && self.plugin_id.is_none() {
            return Err(CoreError::validation("one of plugin or plugin_id is required"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("plugin.query", "name", self.name.as_str())
            .await
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(self.subject(), None)),
            (None, Presence::Present) => {
                let source = self.resolve(session.middleware()).await?;
                Ok(self.create_plan(&source))
            }
            (Some(row), Presence::Present) => Ok(Plan::unchanged(self.subject(), Some(row))),
            (Some(row), Presence::Absent) => self.delete_plan(row),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn plugin() -> Plugin {
        Plugin {
            name: "plex".into(),
            plugin: Some("Plex Media Server".into()),
            enabled: Some(true),
            ..Plugin::default()
        }
    }

    #[test]
    fn create_payload_with_boot_prop() {
        let source = Source {
            repository_url: "https://github.com/ix-plugin-hub/iocage-ix-plugins.git".into(),
            plugin_id: "plexmediaserver".into(),
        };
        let plan = plugin().create_plan(&source);
        assert_eq!(
            plan.steps[0].preview(),
            json!([{
                "jail_name": "plex",
                "plugin_repository": "https://github.com/ix-plugin-hub/iocage-ix-plugins.git",
                "plugin_name": "plexmediaserver",
                "props": ["boot=yes"]
            }])
        );
    }

    #[test]
    fn delete_stops_running_plugin() {
        let running = json!({"id": "plex", "name": "plex", "jid": 4});
        let plan = plugin().delete_plan(&running).unwrap_or_else(|e| panic!("{e}"));
        let methods: Vec<&str> = plan.steps.iter().map(|s| s.method.as_str()).collect();
        assert_eq!(methods, ["jail.stop", "plugin.delete"]);

        let stopped = json!({"id": "plex", "name": "plex", "jid": null});
        let plan = plugin().delete_plan(&stopped).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn package_matching_prefers_id() {
        let pkg = json!({"name": "Plex Media Server", "plugin": "plexmediaserver"});
        assert!(plugin().matches(&pkg));
        let by_id = Plugin {
            plugin_id: Some("plexmediaserver-plexpass".into()),
            ..plugin()
        };
        assert!(!by_id.matches(&pkg));
    }

    #[test]
    fn repository_listing() {
        let listing = json!({"IXSYSTEMS": {"name": "iXsystems", "git_repository": "https://x/y.git"}});
        assert_eq!(repositories(&listing), vec![("iXsystems", "https://x/y.git")]);
    }
}
