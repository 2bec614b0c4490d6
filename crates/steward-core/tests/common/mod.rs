//! Mock handlers and a descriptor directory shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use steward_core::content::{
    ContainerConfig, ContentHandler, ContentUnit, HandlerContainer, HandlerDescriptor,
    HandlerError, HandlerReport, Options,
};
use tempfile::TempDir;

/// Pretends every unit changes.
pub struct MockPackages;

fn names(units: &[ContentUnit]) -> Value {
    json!(units.iter().map(|u| u.unit_key.get("name").cloned().unwrap_or(Value::Null)).collect::<Vec<_>>())
}

#[async_trait]
impl ContentHandler for MockPackages {
    async fn install(&self, units: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(units.len(), json!({ "installed": names(units) })))
    }

    async fn update(&self, units: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(units.len(), json!({ "updated": names(units) })))
    }

    async fn uninstall(&self, units: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(units.len(), json!({ "removed": names(units) })))
    }

    async fn profile(&self) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(0, json!([{ "name": "zsh", "version": "5.9" }])))
    }
}

/// Only knows how to reboot.
pub struct MockSystem;

#[async_trait]
impl ContentHandler for MockSystem {
    async fn install(&self, _: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Unsupported("install"))
    }

    async fn update(&self, _: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Unsupported("update"))
    }

    async fn uninstall(&self, _: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Unsupported("uninstall"))
    }

    async fn profile(&self) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(0, Value::Null))
    }

    async fn reboot(&self, _: &Options) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(0, json!({ "minutes": 1 })))
    }
}

/// Always errors.
pub struct Broken;

#[async_trait]
impl ContentHandler for Broken {
    async fn install(&self, _: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Failed("transaction check failed".into()))
    }

    async fn update(&self, units: &[ContentUnit], options: &Options) -> Result<HandlerReport, HandlerError> {
        self.install(units, options).await
    }

    async fn uninstall(&self, units: &[ContentUnit], options: &Options) -> Result<HandlerReport, HandlerError> {
        self.install(units, options).await
    }

    async fn profile(&self) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Failed("rpmdb locked".into()))
    }
}

pub fn write_descriptor(dir: &Path, file: &str, handler: &str, types: &[&str]) {
    let body = json!({ "enabled": true, "handler": handler, "types": types, "settings": {} });
    std::fs::write(dir.join(file), body.to_string()).unwrap();
}

/// Container over a temp dir declaring `rpm` and `system` handlers, plus a
/// `broken` one for `deb`.
pub fn deployed_container() -> (TempDir, Arc<HandlerContainer>) {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "10-rpm.json", "packages", &["rpm"]);
    write_descriptor(dir.path(), "20-system.json", "system", &["system"]);
    write_descriptor(dir.path(), "30-deb.json", "broken", &["deb"]);

    let mut container =
        HandlerContainer::new(ContainerConfig::default().with_location(dir.path()));
    register_mocks(&mut container);
    container.load();
    (dir, Arc::new(container))
}

type Built = Result<Arc<dyn ContentHandler>, HandlerError>;

fn packages(_: &str, _: &HandlerDescriptor) -> Built {
    Ok(Arc::new(MockPackages))
}

fn system(_: &str, _: &HandlerDescriptor) -> Built {
    Ok(Arc::new(MockSystem))
}

fn broken(_: &str, _: &HandlerDescriptor) -> Built {
    Ok(Arc::new(Broken))
}

pub fn register_mocks(container: &mut HandlerContainer) {
    container.register_factory("packages", packages).unwrap();
    container.register_factory("system", system).unwrap();
    container.register_factory("broken", broken).unwrap();
}

pub fn zsh_and_ksh() -> Vec<ContentUnit> {
    vec![ContentUnit::named("rpm", "zsh"), ContentUnit::named("rpm", "ksh")]
}
