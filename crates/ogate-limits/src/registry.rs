use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use ogate_common::CredentialConfig;

/// Model alias table plus the credential -> model support map. A credential
/// registered without an explicit model list supports every model.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    aliases: RwLock<HashMap<String, String>>,
    listed: RwLock<HashMap<String, HashSet<String>>>,
    unrestricted: RwLock<HashSet<String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(
        aliases: &HashMap<String, String>,
        credentials: &[CredentialConfig],
    ) -> Self {
        let registry = Self::new();
        {
            let mut table = registry.aliases.write().expect("registry lock");
            table.extend(aliases.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        for cred in credentials {
            if cred.models.is_empty() {
                registry
                    .unrestricted
                    .write()
                    .expect("registry lock")
                    .insert(cred.name.clone());
            } else {
                let mut listed = registry.listed.write().expect("registry lock");
                listed
                    .entry(cred.name.clone())
                    .or_default()
                    .extend(cred.models.iter().cloned());
            }
        }
        registry
    }

    /// Resolve a client model id through the alias table. The bool reports
    /// whether an alias fired.
    pub fn resolve(&self, model: &str) -> (String, bool) {
        match self.aliases.read().expect("registry lock").get(model) {
            Some(resolved) => (resolved.clone(), true),
            None => (model.to_string(), false),
        }
    }

    pub fn supports(&self, cred: &str, model: &str) -> bool {
        if self
            .unrestricted
            .read()
            .expect("registry lock")
            .contains(cred)
        {
            return true;
        }
        self.listed
            .read()
            .expect("registry lock")
            .get(cred)
            .is_some_and(|models| models.contains(model))
    }

    pub fn supported_credentials(&self, model: &str) -> HashSet<String> {
        let mut out: HashSet<String> = self
            .unrestricted
            .read()
            .expect("registry lock")
            .iter()
            .cloned()
            .collect();
        for (cred, models) in self.listed.read().expect("registry lock").iter() {
            if models.contains(model) {
                out.insert(cred.clone());
            }
        }
        out
    }

    /// Teach the registry a model a credential serves (peer mirror).
    pub fn add_model(&self, cred: &str, model: &str) {
        if self
            .unrestricted
            .read()
            .expect("registry lock")
            .contains(cred)
        {
            return;
        }
        self.listed
            .write()
            .expect("registry lock")
            .entry(cred.to_string())
            .or_default()
            .insert(model.to_string());
    }

    /// Every explicitly known model id, for `GET /v1/models`.
    pub fn known_models(&self) -> Vec<String> {
        let mut models: HashSet<String> = self
            .listed
            .read()
            .expect("registry lock")
            .values()
            .flatten()
            .cloned()
            .collect();
        models.extend(self.aliases.read().expect("registry lock").keys().cloned());
        let mut out: Vec<String> = models.into_iter().collect();
        out.sort();
        out
    }
}
