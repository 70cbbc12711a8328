//! envs command - List configured environments

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use super::load_config;
use crate::core::types::Environment;
use crate::engine::Context;
use crate::ui::output::{self, Verbosity};

#[derive(Debug, Serialize)]
struct EnvironmentInfo<'a> {
    name: &'a str,
    prefix: String,
    address: &'a str,
    datacenter: Option<&'a str>,
}

#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PREFIX")]
    prefix: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "DATACENTER")]
    datacenter: String,
}

impl From<&EnvironmentInfo<'_>> for EnvironmentRow {
    fn from(info: &EnvironmentInfo<'_>) -> Self {
        Self {
            name: info.name.to_string(),
            prefix: format!("/{}", info.prefix),
            address: info.address.to_string(),
            datacenter: info.datacenter.unwrap_or("-").to_string(),
        }
    }
}

impl<'a> From<&'a Environment> for EnvironmentInfo<'a> {
    fn from(env: &'a Environment) -> Self {
        Self {
            name: &env.name,
            prefix: env.prefix.to_string(),
            address: &env.connection.address,
            datacenter: env.connection.datacenter.as_deref(),
        }
    }
}

/// List configured environments.
pub fn envs(ctx: &Context) -> Result<()> {
    let config = load_config(ctx)?;
    let verbosity = Verbosity::from_flags(ctx.quiet, ctx.debug);
    let infos: Vec<EnvironmentInfo<'_>> = config.environments().map(Into::into).collect();

    if ctx.json {
        output::print_json(&infos)?;
        return Ok(());
    }

    if infos.is_empty() {
        let location = config
            .path()
            .map(|p| format!(" in {}", p.display()))
            .unwrap_or_default();
        output::warn(format!("no environments configured{}", location), verbosity);
        return Ok(());
    }

    if ctx.quiet {
        for info in &infos {
            println!("{}", info.name);
        }
        return Ok(());
    }

    let rows = infos.iter().map(EnvironmentRow::from);
    output::print(output::table(rows), verbosity);
    Ok(())
}
