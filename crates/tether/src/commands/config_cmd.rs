//! Config subcommand handlers.

use std::fmt::Write;

use tether_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match &args.command {
        ConfigCommand::Path => {
            println!("{}", tether_config::config_path().display());
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = tether_config::load_config()?;
            print!("{}", format_config_redacted(&cfg, global.profile.as_deref()));
            Ok(())
        }
        ConfigCommand::Use { name } => {
            let path = tether_config::config_path();
            tether_config::set_default_profile(&path, name).map_err(|e| match e {
                tether_config::ConfigError::UnknownProfile { profile } => {
                    let cfg = tether_config::load_config_file(&path).unwrap_or_default();
                    CliError::profile_not_found(&cfg, profile, &path)
                }
                other => other.into(),
            })?;
            println!("default profile: {name}");
            Ok(())
        }
    }
}

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config, only: Option<&str>) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "preferences_file = \"{}\"", cfg.preferences_path().display());

    let mut names: Vec<_> = cfg
        .profiles
        .keys()
        .filter(|name| only.is_none_or(|o| o == name.as_str()))
        .collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "url = \"{}\"", p.url);
        if p.anon_key.is_some() {
            let _ = writeln!(out, "anon_key = \"****\"");
        }
        if let Some(ref env) = p.anon_key_env {
            let _ = writeln!(out, "anon_key_env = \"{env}\"");
        }
        if p.access_token.is_some() {
            let _ = writeln!(out, "access_token = \"****\"");
        }
        if let Some(ref env) = p.access_token_env {
            let _ = writeln!(out, "access_token_env = \"{env}\"");
        }
        if let Some(ref rpc) = p.listing_rpc {
            let _ = writeln!(out, "listing_rpc = \"{rpc}\"");
        }
        if let Some(ref rpc) = p.identity_rpc {
            let _ = writeln!(out, "identity_rpc = \"{rpc}\"");
        }
        if let Some(ref kinds) = p.kinds {
            let kinds: Vec<String> = kinds.iter().map(|k| format!("\"{k}\"")).collect();
            let _ = writeln!(out, "kinds = [{}]", kinds.join(", "));
        }
        if let Some(ref key) = p.selection_key {
            let _ = writeln!(out, "selection_key = \"{key}\"");
        }
        if let Some(private) = p.private_channels {
            let _ = writeln!(out, "private_channels = {private}");
        }
        if let Some(expose) = p.expose_connection_status {
            let _ = writeln!(out, "expose_connection_status = {expose}");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
    }

    out
}
